use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, StatsSnapshot};

/// The most recent result of polling the stats API
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollerState {
    pub stats: StatsSnapshot,
    pub connected: bool,
    /// Set when `stats` holds placeholder demo values
    pub demo: bool,
}

impl PollerState {
    pub fn online(stats: StatsSnapshot) -> PollerState {
        PollerState {
            stats,
            connected: true,
            demo: false,
        }
    }

    pub fn offline() -> PollerState {
        PollerState {
            stats: StatsSnapshot::demo(),
            connected: false,
            demo: true,
        }
    }
}

/// Periodically fetches the counters of the stats client in a background task
/// and keeps the last known value.
///
/// Consumers never wait for a request; they read the cached value whenever they like.
/// Dropping the poller stops the task.
pub struct StatsPoller {
    state: watch::Receiver<PollerState>,
    task: JoinHandle<()>,
}

impl StatsPoller {
    /// Starts polling. The first request is issued immediately.
    pub fn spawn(client: ApiClient, period: Duration) -> StatsPoller {
        let (tx, rx) = watch::channel(PollerState::default());
        let task = tokio::spawn(poll_loop(client, period, tx));
        StatsPoller { state: rx, task }
    }

    /// Returns the last known state
    pub fn latest(&self) -> PollerState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes every update
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_loop(client: ApiClient, period: Duration, tx: watch::Sender<PollerState>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let was_connected = tx.borrow().connected;
        let state = match client.all_stats().await {
            Ok(stats) => {
                if !was_connected {
                    info!("Connected to stats API at {}", client.base_url());
                }
                PollerState::online(stats)
            }
            Err(e) => {
                if was_connected {
                    warn!("Lost connection to stats API: {}", e);
                } else {
                    debug!("Stats API unavailable, using demo data: {}", e);
                }
                PollerState::offline()
            }
        };
        tx.send_replace(state);
        if tx.is_closed() {
            break;
        }
    }
}
