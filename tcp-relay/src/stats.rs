use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::info;

use crate::{
    protocol::Message,
    relay::{BroadcastReport, Relay},
};

/// Counters exposed for the periodic throughput reporter.
#[derive(Debug, Default)]
pub struct RelayStats {
    window_bytes: AtomicU64,
    total_bytes: AtomicU64,
    messages: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_relayed: u64,
    pub messages_relayed: u64,
    pub send_failures: u64,
}

impl RelayStats {
    /// Counts one inbound publish, regardless of how many peers it reached.
    pub fn record(&self, message: &Message, report: &BroadcastReport) {
        let bytes = message.relayed_bytes();
        self.window_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.send_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_relayed: self.total_bytes.load(Ordering::Relaxed),
            messages_relayed: self.messages.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    fn take_window(&self) -> u64 {
        self.window_bytes.swap(0, Ordering::Relaxed)
    }
}

pub fn kilobytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / 1024.0 / secs
}

pub fn spawn_reporter(relay: Relay, every: Duration) -> JoinHandle<()> {
    tokio::spawn(report_loop(relay, every))
}

/// Logs throughput and peer count once per `every` until the task is aborted.
pub async fn report_loop(relay: Relay, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately.
    ticker.tick().await;

    let started = Instant::now();
    let mut last = started;
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let bytes = relay.stats().take_window();
        let clients = relay.registry().len().await;

        info!(
            elapsed = %format!("{:.2}s", now.duration_since(started).as_secs_f64()),
            rate = %format!("{:.2} kB/s", kilobytes_per_second(bytes, now.duration_since(last))),
            clients,
            "relay throughput"
        );
        last = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_channel_payload_and_length_fields() {
        let stats = RelayStats::default();
        let report = BroadcastReport {
            delivered: 2,
            failed: 1,
        };
        stats.record(&Message::new("TEST", "foobar"), &report);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_relayed, 4 + 6 + 8);
        assert_eq!(snapshot.messages_relayed, 1);
        assert_eq!(snapshot.send_failures, 1);

        assert_eq!(stats.take_window(), 18);
        assert_eq!(stats.take_window(), 0);
        assert_eq!(stats.snapshot().bytes_relayed, 18);
    }

    #[test]
    fn throughput_math() {
        assert_eq!(kilobytes_per_second(2048, Duration::from_secs(2)), 1.0);
        assert_eq!(kilobytes_per_second(2048, Duration::ZERO), 0.0);
    }
}
