// Table session: membership and frame fan-out between participants

use crate::messages::PeerMessage;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tablesync::ActorId;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// A participant seated at the table
#[derive(Debug, Clone)]
pub struct Participant {
    pub actor: ActorId,
    pub sender: mpsc::UnboundedSender<PeerMessage>,
}

/// Stand-in for the transport: knows who is seated and forwards messages.
/// Delivery order and timing are decided by whoever reads the channels.
#[derive(Debug)]
pub struct TableSession {
    pub id: Uuid,

    participants: BTreeMap<ActorId, Participant>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl TableSession {
    pub fn new() -> Self {
        TableSession {
            id: Uuid::new_v4(),
            participants: BTreeMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Seat a participant and tell everyone else
    pub fn join(
        &mut self,
        actor: ActorId,
        sender: mpsc::UnboundedSender<PeerMessage>,
    ) -> Result<()> {
        if self.participants.contains_key(&actor) {
            bail!("Actor {} is already seated at {}", actor, self.id);
        }

        self.participants.insert(actor, Participant { actor, sender });
        self.broadcast_except(actor, PeerMessage::Joined { actor });

        tracing::info!("Actor {} joined table {}", actor, self.id);
        Ok(())
    }

    pub fn leave(&mut self, actor: ActorId) {
        if self.participants.remove(&actor).is_some() {
            self.broadcast_except(actor, PeerMessage::Left { actor });
            tracing::info!("Actor {} left table {}", actor, self.id);
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.participants.keys().copied()
    }

    /// Send to everyone but `except`; returns how many received it
    pub fn broadcast_except(&self, except: ActorId, message: PeerMessage) -> usize {
        let mut sent = 0;
        for (actor, participant) in &self.participants {
            if *actor != except && participant.sender.send(message.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Senders of everyone but `except`, for callers that schedule delivery themselves
    pub fn senders_except(
        &self,
        except: ActorId,
    ) -> Vec<(ActorId, mpsc::UnboundedSender<PeerMessage>)> {
        self.participants
            .values()
            .filter(|participant| participant.actor != except)
            .map(|participant| (participant.actor, participant.sender.clone()))
            .collect()
    }
}

impl Default for TableSession {
    fn default() -> Self {
        TableSession::new()
    }
}

/// Shared session state
pub type SharedSession = Arc<RwLock<TableSession>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_membership() {
        let mut session = TableSession::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        session.join(ActorId(1), tx1).unwrap();
        session.join(ActorId(2), tx2.clone()).unwrap();
        assert_eq!(session.participant_count(), 2);
        assert!(session.join(ActorId(2), tx2).is_err());

        // actor 1 hears about actor 2
        match rx1.recv().await {
            Some(PeerMessage::Joined { actor }) => assert_eq!(actor, ActorId(2)),
            other => panic!("unexpected message {:?}", other),
        }

        session.leave(ActorId(2));
        assert!(matches!(
            rx1.recv().await,
            Some(PeerMessage::Left { actor }) if actor == ActorId(2)
        ));
        session.leave(ActorId(1));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let session: SharedSession = Arc::new(RwLock::new(TableSession::new()));
        let mut receivers = Vec::new();
        for actor in 1..=3 {
            let (tx, rx) = mpsc::unbounded_channel();
            session.write().await.join(ActorId(actor), tx).unwrap();
            receivers.push(rx);
        }
        // drain join notices
        for rx in &mut receivers {
            while rx.try_recv().is_ok() {}
        }

        let sent = session.read().await.broadcast_except(
            ActorId(1),
            PeerMessage::Operation {
                from: ActorId(1),
                frame: vec![1, 2, 3],
            },
        );
        assert_eq!(sent, 2);
        assert!(receivers[0].try_recv().is_err());
        assert!(receivers[1].try_recv().is_ok());
        assert!(receivers[2].try_recv().is_ok());

        assert_eq!(session.read().await.senders_except(ActorId(2)).len(), 2);
    }
}
