use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use window::{Retention, Sample, SampleWindow};

pub mod window;

/// Maximum number of samples kept by the click meter
pub const CLICK_WINDOW_LEN: usize = 60;
/// Click rates at or above this value are physically implausible
pub const CLICK_RATE_CEILING: f64 = 100.0;
/// How far back the network meter keeps samples
pub const NETWORK_WINDOW_AGE: Duration = Duration::from_secs(300);
/// Throughput at or above this value, in Mbps, is treated as a measurement artifact
pub const NETWORK_RATE_CEILING: f64 = 1000.0;

/// Lifecycle of a measurement session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing collected yet
    Idle,
    /// Accepting snapshots
    Running,
    /// Stopped, values frozen for review and export
    Reviewing,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Running => write!(f, "running"),
            Phase::Reviewing => write!(f, "reviewing"),
        }
    }
}

/// Converts a counter delta over a time span into a rate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Counts events, rate in events per second
    PerSecond,
    /// Counts bytes, rate in megabits per second
    Megabits,
}

impl Unit {
    pub fn rate(&self, delta: u64, seconds: f64) -> f64 {
        match self {
            Unit::PerSecond => delta as f64 / seconds,
            Unit::Megabits => delta as f64 * 8.0 / seconds / 1_000_000.0,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::PerSecond => "/s",
            Unit::Megabits => "Mbps",
        }
    }
}

/// Absolute counter values observed at a given instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot<const N: usize> {
    pub values: [u64; N],
    pub timestamp: Instant,
}

/// What a meter did with a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The meter is not running, snapshot dropped
    Inactive,
    /// First snapshot after start, stored as the reference
    Baseline,
    /// Counters didn't move since the reference
    Unchanged,
    /// Snapshot is not newer than the reference
    ClockSkew,
    /// First change after start; moves the reference but the interval is not representative
    Warmup,
    /// A counter went backwards
    CounterReset,
    /// The implied rate is out of the plausible range
    Spike,
    /// A new sample was recorded
    Accepted,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        *self == Outcome::Accepted
    }
}

/// Sample history and aggregates of a single counter.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    name: &'static str,
    window: SampleWindow,
    peak: f64,
    average: f64,
    total: u64,
}

impl Channel {
    fn new(name: &'static str, retention: Retention) -> Channel {
        Channel {
            name,
            window: SampleWindow::new(retention),
            peak: 0.0,
            average: 0.0,
            total: 0,
        }
    }

    fn record(&mut self, sample: Sample) {
        self.window.push(sample);
        self.peak = self.peak.max(sample.rate);
        self.average = self.window.mean();
    }

    fn clear(&mut self) {
        self.window.clear();
        self.peak = 0.0;
        self.average = 0.0;
        self.total = 0;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn samples(&self) -> &SampleWindow {
        &self.window
    }

    /// Highest rate seen since the last reset
    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Mean of the rates currently in the window
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Most recent rate or 0.0 if nothing was measured yet
    pub fn current(&self) -> f64 {
        self.window.last().map(|s| s.rate).unwrap_or(0.0)
    }

    /// Sum of all non-negative counter deltas seen while running,
    /// including the ones rejected as spikes
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            name: self.name.to_string(),
            current: self.current(),
            peak: self.peak,
            average: self.average,
            std_dev: self.window.std_dev(),
            sample_count: self.window.len(),
            total: self.total,
        }
    }
}

/// Turns periodic absolute counter snapshots into rate samples.
///
/// A meter tracks `N` counters that always move together, e.g. clicks alone
/// or downloaded and uploaded bytes. All state changes go through
/// `start`, `stop`, `reset`, `tick_second` and `on_snapshot`,
/// so the meter can be driven by any single-threaded scheduler or directly by tests.
///
/// The reference point advances past rejected ticks (spikes and counter resets),
/// so a single bad reading never contaminates the next delta.
#[derive(Clone, Debug, PartialEq)]
pub struct RateMeter<const N: usize> {
    unit: Unit,
    ceiling: f64,
    phase: Phase,
    reference: Option<Snapshot<N>>,
    measured_once: bool,
    elapsed_secs: u64,
    channels: [Channel; N],
}

pub type ClickMeter = RateMeter<1>;
pub type NetworkMeter = RateMeter<2>;

impl RateMeter<1> {
    /// Measures clicks per second over the last 60 samples
    pub fn clicks() -> ClickMeter {
        RateMeter::new(
            Unit::PerSecond,
            Retention::Count(CLICK_WINDOW_LEN),
            CLICK_RATE_CEILING,
            ["clicks"],
        )
    }

    pub fn clicks_channel(&self) -> &Channel {
        &self.channels[0]
    }
}

impl RateMeter<2> {
    /// Measures download and upload throughput in Mbps over the last 5 minutes
    pub fn network() -> NetworkMeter {
        RateMeter::new(
            Unit::Megabits,
            Retention::Age(NETWORK_WINDOW_AGE),
            NETWORK_RATE_CEILING,
            ["download", "upload"],
        )
    }

    pub fn download(&self) -> &Channel {
        &self.channels[0]
    }

    pub fn upload(&self) -> &Channel {
        &self.channels[1]
    }
}

impl<const N: usize> RateMeter<N> {
    pub fn new(
        unit: Unit,
        retention: Retention,
        ceiling: f64,
        names: [&'static str; N],
    ) -> RateMeter<N> {
        RateMeter {
            unit,
            ceiling,
            phase: Phase::Idle,
            reference: None,
            measured_once: false,
            elapsed_secs: 0,
            channels: names.map(|name| Channel::new(name, retention)),
        }
    }

    /// Switches an idle meter to `Running`.
    /// The next snapshot becomes the reference point and produces no sample.
    /// Returns false if the meter was not idle.
    pub fn start(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Running;
        self.reference = None;
        self.measured_once = false;
        true
    }

    /// Freezes a running meter for review. Returns false if the meter was not running.
    pub fn stop(&mut self) -> bool {
        if self.phase != Phase::Running {
            return false;
        }
        self.phase = Phase::Reviewing;
        true
    }

    /// Discards everything measured so far and returns to `Idle`
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.reference = None;
        self.measured_once = false;
        self.elapsed_secs = 0;
        for channel in self.channels.iter_mut() {
            channel.clear();
        }
    }

    /// Drops the reference point of a running meter, so the next snapshot
    /// becomes a new baseline followed by a warmup tick.
    /// Samples, peak, totals and elapsed time are kept.
    pub fn forget_reference(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        if self.reference.take().is_some() {
            debug!("Counters unavailable, dropping the reference point");
        }
        self.measured_once = false;
    }

    /// Advances the session clock by one second while running
    pub fn tick_second(&mut self) {
        if self.phase == Phase::Running {
            self.elapsed_secs += 1;
        }
    }

    /// Feeds the current absolute counter values observed at `timestamp`.
    pub fn on_snapshot(&mut self, values: [u64; N], timestamp: Instant) -> Outcome {
        if self.phase != Phase::Running {
            return Outcome::Inactive;
        }
        let snapshot = Snapshot { values, timestamp };
        let reference = match self.reference {
            Some(reference) => reference,
            None => {
                self.reference = Some(snapshot);
                return Outcome::Baseline;
            }
        };
        if values == reference.values {
            return Outcome::Unchanged;
        }
        let seconds = match timestamp.checked_duration_since(reference.timestamp) {
            Some(dt) if !dt.is_zero() => dt.as_secs_f64(),
            _ => return Outcome::ClockSkew,
        };
        if !self.measured_once {
            self.measured_once = true;
            self.reference = Some(snapshot);
            return Outcome::Warmup;
        }

        self.reference = Some(snapshot);
        let mut deltas = [0; N];
        for (i, delta) in deltas.iter_mut().enumerate() {
            match values[i].checked_sub(reference.values[i]) {
                Some(d) => *delta = d,
                None => {
                    warn!(
                        "Counter {} went backwards from {} to {}, skipping tick",
                        self.channels[i].name, reference.values[i], values[i]
                    );
                    return Outcome::CounterReset;
                }
            }
        }
        for (channel, delta) in self.channels.iter_mut().zip(deltas.iter()) {
            channel.total += delta;
        }

        let rates = deltas.map(|d| self.unit.rate(d, seconds));
        if rates.iter().any(|r| !(0.0..self.ceiling).contains(r)) {
            debug!(
                "Unrealistic spike detected, skipping sample: {:?} {}",
                rates,
                self.unit.symbol()
            );
            return Outcome::Spike;
        }
        for (channel, rate) in self.channels.iter_mut().zip(rates.iter()) {
            channel.record(Sample {
                timestamp,
                rate: *rate,
            });
        }
        Outcome::Accepted
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_reviewing(&self) -> bool {
        self.phase == Phase::Reviewing
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn channels(&self) -> &[Channel; N] {
        &self.channels
    }

    pub fn summary(&self) -> MeterSummary {
        MeterSummary {
            unit: self.unit,
            phase: self.phase,
            elapsed_secs: self.elapsed_secs,
            channels: self.channels.iter().map(Channel::summary).collect(),
        }
    }
}

/// Aggregates of a single channel, detached from the live meter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub name: String,
    pub current: f64,
    pub peak: f64,
    pub average: f64,
    pub std_dev: Option<f64>,
    pub sample_count: usize,
    pub total: u64,
}

/// Read-only view of a meter, suitable for display and export
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeterSummary {
    pub unit: Unit,
    pub phase: Phase,
    pub elapsed_secs: u64,
    pub channels: Vec<ChannelSummary>,
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use assert_approx_eq::assert_approx_eq;
    use more_asserts::{assert_ge, assert_le};
    use rstest::rstest;

    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    /// Starts a click meter and brings it past the baseline and warmup ticks,
    /// with the reference at `value` and `t = 200 ms`
    fn warmed_up_clicks(base: Instant, value: u64) -> ClickMeter {
        let mut meter = RateMeter::clicks();
        assert!(meter.start());
        assert_eq!(meter.on_snapshot([0], at(base, 0)), Outcome::Baseline);
        assert_eq!(meter.on_snapshot([value], at(base, 200)), Outcome::Warmup);
        meter
    }

    #[test]
    fn click_scenario() {
        let base = Instant::now();
        let mut meter = RateMeter::clicks();
        meter.start();
        assert_eq!(meter.on_snapshot([0], at(base, 0)), Outcome::Baseline);
        assert_eq!(meter.on_snapshot([0], at(base, 200)), Outcome::Unchanged);
        assert_eq!(meter.on_snapshot([10], at(base, 400)), Outcome::Warmup);
        assert_eq!(meter.on_snapshot([20], at(base, 600)), Outcome::Accepted);

        let clicks = meter.clicks_channel();
        assert_eq!(clicks.samples().len(), 1);
        assert_approx_eq!(clicks.current(), 50.0);
        assert_approx_eq!(clicks.peak(), 50.0);
        assert_approx_eq!(clicks.average(), 50.0);
    }

    #[rstest]
    #[case(1)]
    #[case(19)]
    #[case(10_000)]
    fn first_change_never_produces_sample(#[case] value: u64) {
        let base = Instant::now();
        let mut meter = RateMeter::clicks();
        meter.start();
        meter.on_snapshot([0], at(base, 0));
        assert_eq!(meter.on_snapshot([value], at(base, 200)), Outcome::Warmup);
        assert!(meter.clicks_channel().samples().is_empty());
        assert_eq!(meter.clicks_channel().peak(), 0.0);
    }

    #[test]
    fn spike_is_discarded() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        assert!(meter.on_snapshot([20], at(base, 400)).is_accepted());
        // 30 clicks in 200 ms is 150 clicks/s
        assert_eq!(meter.on_snapshot([50], at(base, 600)), Outcome::Spike);
        let clicks = meter.clicks_channel();
        assert_eq!(clicks.samples().len(), 1);
        assert_approx_eq!(clicks.peak(), 50.0);
        assert_approx_eq!(clicks.average(), 50.0);
    }

    #[test]
    fn reference_advances_past_spike() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        assert_eq!(meter.on_snapshot([60], at(base, 400)), Outcome::Spike);
        // the delta is taken from the spike tick, not from the tick before it
        assert!(meter.on_snapshot([62], at(base, 600)).is_accepted());
        assert_approx_eq!(meter.clicks_channel().current(), 10.0);
    }

    #[test]
    fn rate_at_ceiling_is_rejected() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        // 20 clicks in 200 ms is exactly 100 clicks/s
        assert_eq!(meter.on_snapshot([30], at(base, 400)), Outcome::Spike);
        assert!(meter.clicks_channel().samples().is_empty());
    }

    #[test]
    fn counter_reset_is_discarded() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        assert_eq!(meter.on_snapshot([3], at(base, 400)), Outcome::CounterReset);
        assert!(meter.clicks_channel().samples().is_empty());
        assert_eq!(meter.clicks_channel().total(), 0);
        // counting continues from the new, lower value
        assert!(meter.on_snapshot([5], at(base, 600)).is_accepted());
        assert_approx_eq!(meter.clicks_channel().current(), 10.0);
    }

    #[test]
    fn non_positive_time_delta_is_ignored() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        let before = meter.clone();
        assert_eq!(meter.on_snapshot([12], at(base, 200)), Outcome::ClockSkew);
        assert_eq!(meter.on_snapshot([12], at(base, 100)), Outcome::ClockSkew);
        assert_eq!(meter, before);
    }

    #[test]
    fn peak_is_monotonic_and_average_matches_window() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 1);
        let increments = [3, 1, 7, 0, 2, 15, 4, 4, 9, 1, 30, 2];
        let mut value = 1;
        let mut last_peak = 0.0;
        for (i, inc) in increments.iter().cycle().take(200).enumerate() {
            value += inc;
            let outcome = meter.on_snapshot([value], at(base, 400 + 200 * i as u64));
            let clicks = meter.clicks_channel();
            assert_ge!(clicks.peak(), last_peak);
            last_peak = clicks.peak();
            if outcome.is_accepted() {
                let rates: Vec<f64> = clicks.samples().rates().collect();
                let mean = rates.iter().sum::<f64>() / rates.len() as f64;
                assert_approx_eq!(clicks.average(), mean);
                assert!(rates.iter().all(|r| *r >= 0.0));
            }
            assert_le!(clicks.samples().len(), CLICK_WINDOW_LEN);
        }
        assert_eq!(meter.clicks_channel().samples().len(), CLICK_WINDOW_LEN);
    }

    #[test]
    fn stopped_meter_ignores_snapshots() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        meter.on_snapshot([20], at(base, 400));
        meter.tick_second();
        assert!(meter.stop());
        assert!(meter.is_reviewing());

        let frozen = meter.clone();
        assert_eq!(meter.on_snapshot([30], at(base, 600)), Outcome::Inactive);
        meter.tick_second();
        assert!(!meter.stop());
        assert!(!meter.start());
        assert_eq!(meter, frozen);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        meter.on_snapshot([20], at(base, 400));
        meter.tick_second();
        meter.stop();

        meter.reset();
        assert_eq!(meter, RateMeter::clicks());
        meter.reset();
        assert_eq!(meter, RateMeter::clicks());
        assert_eq!(meter.phase(), Phase::Idle);
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        assert!(!meter.start());
        // the reference survived the second start
        assert!(meter.on_snapshot([20], at(base, 400)).is_accepted());
    }

    #[test]
    fn forgotten_reference_keeps_statistics() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        meter.on_snapshot([20], at(base, 400));
        meter.tick_second();

        meter.forget_reference();
        let clicks = meter.clicks_channel();
        assert_eq!(clicks.samples().len(), 1);
        assert_eq!(clicks.total(), 10);
        assert_approx_eq!(clicks.peak(), 50.0);
        assert_eq!(meter.elapsed_secs(), 1);

        // a jump across the gap is neither a sample nor part of the total
        assert_eq!(meter.on_snapshot([5000], at(base, 3000)), Outcome::Baseline);
        assert_eq!(meter.on_snapshot([5002], at(base, 3200)), Outcome::Warmup);
        assert!(meter.on_snapshot([5004], at(base, 3400)).is_accepted());
        assert_eq!(meter.clicks_channel().total(), 12);
        assert_eq!(meter.clicks_channel().samples().len(), 2);
    }

    #[test]
    fn stopped_meter_keeps_reference() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        meter.stop();
        let frozen = meter.clone();
        meter.forget_reference();
        assert_eq!(meter, frozen);
    }

    #[test]
    fn elapsed_counts_only_while_running() {
        let mut meter = RateMeter::clicks();
        meter.tick_second();
        assert_eq!(meter.elapsed_secs(), 0);
        meter.start();
        meter.tick_second();
        meter.tick_second();
        meter.stop();
        meter.tick_second();
        assert_eq!(meter.elapsed_secs(), 2);
    }

    #[test]
    fn network_rates_in_megabits() {
        let base = Instant::now();
        let mut meter = RateMeter::network();
        meter.start();
        meter.on_snapshot([0, 0], at(base, 0));
        assert_eq!(meter.on_snapshot([1000, 0], at(base, 200)), Outcome::Warmup);
        // 2.5 MB down and 0.25 MB up in 200 ms
        let outcome = meter.on_snapshot([2_501_000, 250_000], at(base, 400));
        assert!(outcome.is_accepted());
        assert_approx_eq!(meter.download().current(), 100.0);
        assert_approx_eq!(meter.upload().current(), 10.0);
        assert_eq!(meter.download().total(), 2_500_000);
        assert_eq!(meter.upload().total(), 250_000);
    }

    #[test]
    fn network_unchanged_only_when_both_directions_flat() {
        let base = Instant::now();
        let mut meter = RateMeter::network();
        meter.start();
        meter.on_snapshot([10, 10], at(base, 0));
        assert_eq!(meter.on_snapshot([10, 10], at(base, 200)), Outcome::Unchanged);
        assert_eq!(meter.on_snapshot([10, 11], at(base, 400)), Outcome::Warmup);
        assert!(meter.on_snapshot([10, 12], at(base, 600)).is_accepted());
        assert_eq!(meter.download().current(), 0.0);
        assert_eq!(meter.download().samples().len(), 1);
    }

    #[rstest]
    #[case([30_000_000, 0])]
    #[case([0, 25_000_000])]
    fn network_spike_in_either_direction(#[case] delta: [u64; 2]) {
        let base = Instant::now();
        let mut meter = RateMeter::network();
        meter.start();
        meter.on_snapshot([0, 0], at(base, 0));
        meter.on_snapshot([1, 1], at(base, 200));
        let values = [1 + delta[0], 1 + delta[1]];
        assert_eq!(meter.on_snapshot(values, at(base, 400)), Outcome::Spike);
        assert!(meter.download().samples().is_empty());
        assert!(meter.upload().samples().is_empty());
        // transferred bytes are still accounted for
        assert_eq!(meter.download().total(), delta[0]);
        assert_eq!(meter.upload().total(), delta[1]);
    }

    #[test]
    fn network_window_is_time_bounded() {
        let base = Instant::now();
        let mut meter = RateMeter::network();
        meter.start();
        meter.on_snapshot([0, 0], at(base, 0));
        meter.on_snapshot([1, 1], at(base, 1000));
        let mut value = 1;
        for second in 2..=1000u64 {
            value += 125_000;
            let timestamp = at(base, second * 1000);
            assert!(meter.on_snapshot([value, value], timestamp).is_accepted());
            let cutoff = timestamp - NETWORK_WINDOW_AGE;
            assert!(meter.download().samples().iter().all(|s| s.timestamp >= cutoff));
        }
        assert_eq!(meter.download().samples().len(), 301);
        assert_approx_eq!(meter.download().average(), 1.0);
        assert_approx_eq!(meter.upload().peak(), 1.0);
    }

    #[test]
    fn summary_reflects_meter() {
        let base = Instant::now();
        let mut meter = warmed_up_clicks(base, 10);
        meter.on_snapshot([20], at(base, 400));
        meter.on_snapshot([22], at(base, 600));
        meter.tick_second();
        meter.stop();

        let summary = meter.summary();
        assert_eq!(summary.phase, Phase::Reviewing);
        assert_eq!(summary.unit, Unit::PerSecond);
        assert_eq!(summary.elapsed_secs, 1);
        assert_eq!(summary.channels.len(), 1);
        let clicks = &summary.channels[0];
        assert_eq!(clicks.name, "clicks");
        assert_eq!(clicks.sample_count, 2);
        assert_eq!(clicks.total, 12);
        assert_approx_eq!(clicks.peak, 50.0);
        assert_approx_eq!(clicks.average, 30.0);
        assert!(clicks.std_dev.is_some());
    }
}
