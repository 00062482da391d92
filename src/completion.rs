use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::peer_protocol::PeerMessage;
use crate::prelude::*;
use crate::swarm::SwarmState;

/// waits for every peer of the swarm to hold the whole file, tells the neighbors,
/// then ends the process.
pub struct CompletionMonitor {
    swarm: Arc<SwarmState>,
    poll: Duration,
    grace: Duration,
}

impl CompletionMonitor {
    pub fn new(swarm: Arc<SwarmState>, poll: Duration, grace: Duration) -> Self {
        Self { swarm, poll, grace }
    }

    #[instrument(name = "completion monitor", level = "info", skip_all)]
    pub async fn run(self) {
        let shutdown = self.swarm.shutdown_token().clone();
        let mut ticker = interval_at(Instant::now() + self.poll, self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            debug!(
                completed = self.swarm.completed_count(),
                swarm_size = self.swarm.swarm_size(),
                "checking swarm completion"
            );
            if self.swarm.swarm_complete() {
                break;
            }
        }

        info!("every peer has the complete file");
        self.broadcast_complete();

        // give the writers time to flush COMPLETE before everything is torn down.
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = sleep(self.grace) => {}
        }
        self.swarm.request_shutdown();
    }

    fn broadcast_complete(&self) {
        for session in self.swarm.sessions() {
            if let Err(err) = session.send(PeerMessage::Complete) {
                debug!(peer = %session.peer_id(), %err, "could not queue complete");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peers::SessionHandle;
    use crate::swarm::{PeerId, PieceLayout};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    fn id(id: u32) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn swarm(local_complete: bool) -> Arc<SwarmState> {
        Arc::new(SwarmState::new(
            id(1001),
            2,
            PieceLayout::new(8, 4).unwrap(),
            local_complete,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_complete_swarm_broadcasts_then_shuts_down() {
        let swarm = swarm(true);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        swarm
            .register(Arc::new(SessionHandle::new(id(1002), outbound_tx)))
            .unwrap();
        swarm.mark_completed(id(1002));

        let monitor = CompletionMonitor::new(
            swarm.clone(),
            Duration::from_millis(10),
            Duration::from_millis(200),
        );
        let task = tokio::spawn(monitor.run());

        let msg = timeout(Duration::from_secs(5), outbound_rx.recv())
            .await
            .unwrap();
        assert_eq!(msg, Some(PeerMessage::Complete));
        // still inside the grace period.
        assert!(!swarm.shutdown_token().is_cancelled());

        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(swarm.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_incomplete_swarm_keeps_waiting() {
        let swarm = swarm(true);
        let monitor = CompletionMonitor::new(
            swarm.clone(),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        let task = tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!swarm.shutdown_token().is_cancelled());
        assert!(!task.is_finished());

        swarm.mark_completed(id(1002));
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(swarm.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_exits_on_external_shutdown() {
        let swarm = swarm(false);
        let monitor = CompletionMonitor::new(
            swarm.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let task = tokio::spawn(monitor.run());

        swarm.request_shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
