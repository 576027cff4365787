use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    connection::ConnectionId,
    protocol::{Message, encode_publish},
    registry::Registry,
    stats::RelayStats,
};

/// Outcome of one broadcast. Consumed for stats and logging only; failures
/// never reach the originating connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans each decoded publish out to every other registered connection.
#[derive(Debug, Clone, Default)]
pub struct Relay {
    registry: Arc<Registry>,
    stats: Arc<RelayStats>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Holds the registry lock for the whole fan-out, so broadcasts are
    /// serialized against each other and against membership changes. A target
    /// whose socket blocks on write stalls every other broadcast meanwhile.
    pub async fn broadcast(&self, origin: ConnectionId, message: &Message) -> BroadcastReport {
        let frame = match encode_publish(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection = %origin, error = %err, "cannot re-encode publish");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let members = self.registry.lock().await;
        for target in members.except(origin) {
            match target.send_frame(&frame).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    debug!(
                        origin = %origin,
                        target = %target.id(),
                        peer = %target.peer(),
                        error = ?err,
                        "send failed; leaving cleanup to the target's decode loop"
                    );
                }
            }
        }
        drop(members);

        self.stats.record(message, &report);
        report
    }
}
