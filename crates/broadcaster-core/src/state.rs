use std::sync::Arc;

use broadcaster_proto::protocol::PlayerSnapshot;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// WARN/ERROR log lines forwarded to connected remotes.
    Log(String),
}

/// Published view of the player core.  Only the core writes; everyone else
/// reads snapshots and listens for `StateUpdated`.
pub struct StateManager {
    state: Arc<RwLock<PlayerSnapshot>>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl StateManager {
    pub fn new(broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        let state = PlayerSnapshot {
            rev: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            broadcast_tx,
        }
    }

    pub async fn get_state(&self) -> PlayerSnapshot {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Replace the snapshot.  `rev` is assigned here; an unchanged snapshot
    /// neither bumps it nor notifies.  Returns whether anything changed.
    pub async fn publish(&self, mut next: PlayerSnapshot) -> bool {
        {
            let mut state = self.state.write().await;
            next.rev = state.rev;
            if *state == next {
                return false;
            }
            next.rev += 1;
            *state = next;
        }
        // no receivers is fine
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        true
    }
}
