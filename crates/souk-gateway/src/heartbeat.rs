//! Periodic liveness probing of every live connection.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use souk_types::close;
use souk_types::events::ServerEvent;

use crate::dispatcher::Dispatcher;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Probes every connection once per interval. A connection that has not
/// answered the previous probe by the next sweep is closed; one miss is
/// enough.
pub struct HeartbeatMonitor {
    dispatcher: Dispatcher,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let interval = dispatcher.config().heartbeat_interval;
        Self { dispatcher, interval }
    }

    /// Run until `cancel` fires. The first sweep happens immediately.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report.probed + report.evicted > 0 {
                        debug!("heartbeat sweep: {} probed, {} evicted", report.probed, report.evicted);
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for conn in self.dispatcher.registry().connections().await {
            if conn.take_alive() {
                conn.send(ServerEvent::HeartbeatProbe);
                report.probed += 1;
            } else {
                warn!(
                    "{} ({}) missed heartbeat, dropping connection {}",
                    conn.identity().username,
                    conn.user_id(),
                    conn.id()
                );
                self.dispatcher
                    .evict(&conn, close::HEARTBEAT_TIMEOUT, "Heartbeat timeout")
                    .await;
                report.evicted += 1;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::registry::Outbound;
    use crate::testing::{dispatcher, frames, identity};

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_dropped_after_one_interval() {
        let (dispatcher, _store) = dispatcher();
        let clock = dispatcher.presence().clock();
        let alice = identity("alice");
        let (_conn, mut rx) = dispatcher.attach(alice.clone()).await;
        frames(&mut rx);

        let cancel = CancellationToken::new();
        let monitor = HeartbeatMonitor::new(dispatcher.clone()).spawn(cancel.clone());

        time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            frames(&mut rx).as_slice(),
            [Outbound::Event(ServerEvent::HeartbeatProbe)]
        ));

        time::sleep(Duration::from_secs(30)).await;
        assert!(frames(&mut rx).iter().any(|f| matches!(
            f,
            Outbound::Close { code: close::HEARTBEAT_TIMEOUT, .. }
        )));
        assert!(!dispatcher.registry().is_reachable(alice.user_id).await);
        // Still inside the offline debounce window
        assert!(dispatcher.presence().is_online(alice.user_id).await);

        time::sleep(Duration::from_secs(2)).await;
        assert!(!dispatcher.presence().is_online(alice.user_id).await);
        let last_active = dispatcher.presence().last_active(alice.user_id).await.unwrap();
        let expected = clock.anchor() + TimeDelta::seconds(30);
        assert!((last_active - expected).abs() < TimeDelta::seconds(1), "{last_active}");

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answering_connection_survives() {
        let (dispatcher, _store) = dispatcher();
        let (conn, mut rx) = dispatcher.attach(identity("alice")).await;

        let cancel = CancellationToken::new();
        let monitor = HeartbeatMonitor::new(dispatcher.clone()).spawn(cancel.clone());

        for _ in 0..5 {
            time::sleep(Duration::from_secs(10)).await;
            conn.mark_alive();
        }

        assert!(
            !frames(&mut rx)
                .iter()
                .any(|f| matches!(f, Outbound::Close { .. }))
        );
        assert_eq!(dispatcher.registry().connection_count().await, 1);

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn sweep_probes_then_evicts() {
        let (dispatcher, _store) = dispatcher();
        let (_a, _a_rx) = dispatcher.attach(identity("alice")).await;
        let (b, _b_rx) = dispatcher.attach(identity("bob")).await;
        let monitor = HeartbeatMonitor::new(dispatcher.clone());

        assert_eq!(monitor.sweep().await, SweepReport { probed: 2, evicted: 0 });
        b.mark_alive();
        assert_eq!(monitor.sweep().await, SweepReport { probed: 1, evicted: 1 });
        assert_eq!(dispatcher.registry().connection_count().await, 1);
    }
}
