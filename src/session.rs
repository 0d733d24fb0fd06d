use std::future::pending;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::api::StatsSnapshot;
use crate::meter::{Outcome, RateMeter};
use crate::poller::PollerState;

/// Default interval between two meter snapshots
pub const SNAPSHOT_PERIOD: Duration = Duration::from_millis(200);
/// Interval of the session clock
pub const CLOCK_PERIOD: Duration = Duration::from_secs(1);

/// Extracts the counters a meter consumes from the polled stats
pub type Probe<const N: usize> = fn(&StatsSnapshot) -> [u64; N];

pub fn click_probe(stats: &StatsSnapshot) -> [u64; 1] {
    [stats.clicks]
}

pub fn network_probe(stats: &StatsSnapshot) -> [u64; 2] {
    [stats.download, stats.upload]
}

/// Requests sent to a running session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Ends the session, leaving the meter in review
    Stop,
    /// Discards everything measured so far and starts over
    Reset,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    pub snapshot_period: Duration,
    pub clock_period: Duration,
    /// Ends the session automatically after this long
    pub duration: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            snapshot_period: SNAPSHOT_PERIOD,
            clock_period: CLOCK_PERIOD,
            duration: None,
        }
    }
}

/// Drives a single measurement session.
///
/// All timers and the meter live in this one future, so snapshot ticks,
/// clock ticks and control requests are processed strictly one after another.
pub struct Session<const N: usize> {
    meter: RateMeter<N>,
    probe: Probe<N>,
    source: watch::Receiver<PollerState>,
    options: SessionOptions,
}

impl<const N: usize> Session<N> {
    pub fn new(
        meter: RateMeter<N>,
        probe: Probe<N>,
        source: watch::Receiver<PollerState>,
        options: SessionOptions,
    ) -> Session<N> {
        Session {
            meter,
            probe,
            source,
            options,
        }
    }

    /// Feeds the current cached counters into the meter.
    /// Demo values are never metered; they only drop the reference point,
    /// so the first real snapshot after an outage becomes a new baseline.
    fn sample(&mut self) -> Option<Outcome> {
        let (demo, values) = {
            let state = self.source.borrow();
            (state.demo, (self.probe)(&state.stats))
        };
        if demo {
            self.meter.forget_reference();
            return None;
        }
        Some(self.meter.on_snapshot(values, Instant::now().into_std()))
    }

    fn begin(&mut self) {
        self.meter.start();
        let outcome = self.sample();
        debug!("Measurement started: {:?}", outcome);
    }

    /// Waits until the poller has published the result of its first fetch.
    /// Returns false if the session was stopped in the meantime.
    async fn wait_for_data(&mut self, control: &mut mpsc::Receiver<Control>) -> bool {
        loop {
            tokio::select! {
                // a closed source never gets data; go on with what's cached
                _ = self.source.wait_for(|s| s.connected || s.demo) => return true,
                request = control.recv() => match request {
                    Some(Control::Reset) => continue,
                    Some(Control::Stop) | None => return false,
                },
            }
        }
    }

    /// Runs until stopped by `control`, until the control channel is closed
    /// or until the configured duration elapses.
    /// Calls `on_clock` with the meter after every session clock tick.
    /// Returns the meter in the reviewing state.
    pub async fn run<F>(
        mut self,
        mut control: mpsc::Receiver<Control>,
        mut on_clock: F,
    ) -> RateMeter<N>
    where
        F: FnMut(&RateMeter<N>),
    {
        if !self.wait_for_data(&mut control).await {
            self.meter.start();
            self.meter.stop();
            return self.meter;
        }
        self.begin();

        let start = Instant::now();
        let mut snapshots = interval_at(
            start + self.options.snapshot_period,
            self.options.snapshot_period,
        );
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clock = interval_at(start + self.options.clock_period, self.options.clock_period);

        let deadline = self.options.duration.map(|d| start + d);
        let timeout = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = snapshots.tick() => {
                    let outcome = self.sample();
                    if !outcome.map_or(false, |o| o.is_accepted()) {
                        trace!("Snapshot skipped: {:?}", outcome);
                    }
                }
                _ = clock.tick() => {
                    self.meter.tick_second();
                    if self.meter.is_running() {
                        on_clock(&self.meter);
                    }
                }
                request = control.recv() => match request {
                    Some(Control::Reset) => {
                        debug!("Measurement reset");
                        self.meter.reset();
                        self.begin();
                        snapshots.reset();
                        clock.reset();
                    }
                    Some(Control::Stop) | None => break,
                },
                _ = &mut timeout => break,
            }
        }

        self.meter.stop();
        self.meter
    }
}
