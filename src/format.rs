use itertools::Itertools;

/// Formats a byte count with binary multiples, e.g. `1536` → `"1.50 KB"`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut index = 0;
    while value >= 1024.0 && index < UNITS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    format!("{:.2} {}", value, UNITS[index])
}

/// Formats a number of seconds as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_time(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Formats an integer with `,` as the thousands separator
pub fn format_number(number: u64) -> String {
    let digits = number.to_string();
    let len = digits.len();
    let mut result = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Formats a long uptime compactly, e.g. `"1y 2m 3h 4m"`.
/// A year counts as 365 days and a month as 30 days.
/// Zero components are left out, so uptimes shorter than a minute give an empty string.
pub fn format_uptime(seconds: u64) -> String {
    const HOUR: u64 = 3600;
    const MONTH: u64 = 30 * 24 * HOUR;
    const YEAR: u64 = 365 * 24 * HOUR;
    let years = seconds / YEAR;
    let rest = seconds % YEAR;
    let months = rest / MONTH;
    let rest = rest % MONTH;
    let hours = rest / HOUR;
    let minutes = (rest % HOUR) / 60;
    [(years, "y"), (months, "m"), (hours, "h"), (minutes, "m")]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, suffix)| format!("{}{}", value, suffix))
        .join(" ")
}

pub fn format_rate(rate: f64) -> String {
    format!("{:.2}", rate)
}
