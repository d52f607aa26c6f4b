//! Background session keep-alive.
//!
//! Sends a lightweight profile refresh on a fixed interval for as long as the
//! task runs. Each tick is spawned on its own so a slow portal never delays the
//! next one; failures are logged by the portal client and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sources::PortalClient;

pub struct KeepAliveService {
    client: Arc<PortalClient>,
    period: Duration,
}

/// Running keep-alive task; stops when [`KeepAliveHandle::stop`] is called or the handle is dropped
pub struct KeepAliveHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl KeepAliveService {
    pub fn new(client: Arc<PortalClient>, period: Duration) -> Self {
        Self { client, period }
    }

    pub fn start(self) -> KeepAliveHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = self.period;

        info!("Starting portal keep-alive every {:?}", period);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let client = Arc::clone(&self.client);
                        tokio::spawn(async move {
                            client.keep_alive().await;
                        });
                    }
                    _ = cancelled.cancelled() => {
                        debug!("Keep-alive task cancelled");
                        break;
                    }
                }
            }
        });

        KeepAliveHandle {
            token,
            task: Some(task),
        }
    }
}

impl KeepAliveHandle {
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Cancel the timer and wait for the loop to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Portal keep-alive stopped");
    }
}

impl Drop for KeepAliveHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
