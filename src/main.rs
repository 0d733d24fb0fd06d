use std::future::pending;
use std::io;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::Parser;
use tokio::runtime::Builder;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::config::{AppConfig, Command, Connection, MeterCommand, ShowCommand, StatsCommand};
use crate::error::Result;
use crate::meter::RateMeter;
use crate::poller::StatsPoller;
use crate::report::{
    click_report_text, default_output_name, fmt_section_header, network_report_text,
    print_log_header, LogLine, MeterKind, Report,
};
use crate::session::{click_probe, network_probe, Control, Probe, Session, SessionOptions};

mod api;
mod config;
mod error;
mod format;
mod meter;
mod poller;
mod report;
mod session;

/// Timeout of one-shot requests like ping or pulse
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const WATCH_PERIOD: Duration = Duration::from_secs(1);

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("pulsemeter={}", level))),
        )
        .init();
}

/// Sends `Control::Stop` when the user presses Ctrl-C.
/// The sender is kept alive otherwise, so the session ends only on its own terms.
fn stop_on_interrupt(control: mpsc::Sender<Control>) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, stopping measurement");
                let _ = control.send(Control::Stop).await;
            }
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {}", e);
                pending::<()>().await;
            }
        }
    });
}

fn report_path(kind: MeterKind, conf: &MeterCommand) -> Option<PathBuf> {
    match &conf.output {
        Some(path) => Some(path.clone()),
        None if conf.save => Some(default_output_name(kind, &conf.connection)),
        None => None,
    }
}

async fn measure<const N: usize>(
    kind: MeterKind,
    conf: MeterCommand,
    meter: RateMeter<N>,
    probe: Probe<N>,
    share_text: fn(&RateMeter<N>) -> String,
) -> Result<()> {
    let client = ApiClient::new(&conf.connection, conf.timeout()?)?;
    let options = SessionOptions {
        snapshot_period: conf.sampling_period()?,
        duration: conf.duration()?,
        ..Default::default()
    };
    let poller = StatsPoller::spawn(client, conf.poll_period()?);

    info!(
        "Measuring {} from {}, press Ctrl-C to stop",
        kind,
        conf.connection.base_url()?
    );
    let (control_tx, control_rx) = mpsc::channel(1);
    stop_on_interrupt(control_tx);

    if !conf.quiet {
        print_log_header(&meter);
    }
    let quiet = conf.quiet;
    let session = Session::new(meter, probe, poller.subscribe(), options);
    let meter = session
        .run(control_rx, |m| {
            if !quiet {
                println!("{}", LogLine(m))
            }
        })
        .await;

    if poller.latest().demo {
        warn!("Stats API was not reachable, counters were demo values");
    }

    let summary = meter.summary();
    println!();
    println!("{}", summary);
    println!("{}", fmt_section_header("SHARE"));
    println!("{}", share_text(&meter));

    if let Some(path) = report_path(kind, &conf) {
        let report = Report::new(kind, conf.connection, summary);
        match report.save(&path) {
            Ok(()) => info!("Report saved to {}", path.display()),
            Err(e) => {
                eprintln!("error: Failed to save report to {}: {}", path.display(), e);
                exit(1)
            }
        }
    }
    Ok(())
}

async fn stats(conf: StatsCommand) -> Result<()> {
    let client = ApiClient::new(&conf.connection, REQUEST_TIMEOUT)?;
    if !conf.watch {
        print!("{}", client.all_stats().await?);
        return Ok(());
    }

    let poller = StatsPoller::spawn(client, WATCH_PERIOD);
    let mut updates = poller.subscribe();
    let interrupted = signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if state.demo {
                    println!("(stats API not reachable, showing demo values)");
                }
                println!("{}", state.stats);
            }
            _ = &mut interrupted => break,
        }
    }
    Ok(())
}

async fn pulse(conf: Connection) -> Result<()> {
    let client = ApiClient::new(&conf, REQUEST_TIMEOUT)?;
    let status = client.pulse().await?;
    if (200..300).contains(&status) {
        println!("Pulse accepted (HTTP {})", status);
    } else {
        warn!("Pulse rejected by the stats client");
        println!("Pulse failed (HTTP {})", status);
    }
    Ok(())
}

async fn ping(conf: Connection) -> Result<()> {
    let client = ApiClient::new(&conf, REQUEST_TIMEOUT)?;
    client.ping().await?;
    println!("Success: stats API is reachable at {}", client.base_url());
    Ok(())
}

async fn show(conf: ShowCommand) -> Result<()> {
    let report = Report::load(&conf.report)?;
    println!("{}", report);
    Ok(())
}

async fn async_main(command: Command) -> Result<()> {
    match command {
        Command::Clicks(conf) => {
            measure(
                MeterKind::Clicks,
                conf,
                RateMeter::clicks(),
                click_probe,
                click_report_text,
            )
            .await?
        }
        Command::Network(conf) => {
            measure(
                MeterKind::Network,
                conf,
                RateMeter::network(),
                network_probe,
                network_report_text,
            )
            .await?
        }
        Command::Stats(conf) => stats(conf).await?,
        Command::Pulse(conf) => pulse(conf).await?,
        Command::Ping(conf) => ping(conf).await?,
        Command::Show(conf) => show(conf).await?,
    }
    Ok(())
}

fn main() {
    console::set_colors_enabled(true);
    let config = AppConfig::parse();
    init_logging(config.verbose);
    let runtime = Builder::new_current_thread().enable_all().build();
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: Failed to start async runtime: {}", e);
            exit(1);
        }
    };
    if let Err(e) = runtime.block_on(async_main(config.command)) {
        eprintln!("error: {}", e);
        exit(128);
    }
}
