use std::time::Duration;

use tracing::warn;

use crate::{client::WeakClient, runtime};

pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);

pub(crate) const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// Drives the periodic discovery sweeps for one client.
///
/// Holds only a weak handle: the monitor must not keep the client alive, and it
/// exits on the first tick after the client is dropped or shut down.
pub(crate) struct Monitor {
    client: WeakClient,
}

impl Monitor {
    /// Spawns the monitor task. Called once the first sweep (run inline by
    /// `connect`) has succeeded.
    pub(crate) fn start(client: WeakClient) {
        let monitor = Self { client };
        runtime::execute(monitor.execute())
    }

    async fn execute(self) {
        loop {
            // Re-read the frequency every tick so runtime changes take effect on
            // the next schedule.
            let frequency = match self.client.upgrade() {
                Some(client) => client.heartbeat_frequency(),
                None => break,
            };
            runtime::delay_for(frequency).await;

            let client = match self.client.upgrade() {
                Some(client) => client,
                None => break,
            };
            if let Err(error) = client.rediscover().await {
                if error.is_shutdown() {
                    break;
                }
                warn!(%error, "discovery sweep failed");
            }
        }
    }
}
