// One participant's replica: the engine plus its outbound plumbing

use crate::op_log::AuditRecord;
use anyhow::{Context, Result};
use std::sync::Arc;
use tablesync::{
    wire, ActorId, Delivery, Diagnostics, Engine, EngineConfig, EngineOutcome, EntityId,
    Operation, Payload, Table, TableSnapshot,
};
use tokio::sync::{mpsc, Mutex};

/// Owns the engine of one participant. The engine is synchronous; the mutex
/// around a shared replica gives it the single-writer discipline it needs.
pub struct Replica {
    engine: Engine,
    frames_received: usize,
}

impl Replica {
    /// Create a replica; every Applied / NoOp delivery is forwarded to `audit` if given
    pub fn new(
        config: EngineConfig,
        table: Table,
        audit: Option<mpsc::UnboundedSender<AuditRecord>>,
    ) -> Result<Self> {
        let actor = config.actor;
        let mut engine =
            Engine::standard(config, table).context("Failed to start synchronization engine")?;

        if let Some(audit) = audit {
            engine.on_applied(move |delivery: &Delivery| {
                let _ = audit.send(AuditRecord::from_delivery(actor, delivery));
            });
        }

        Ok(Replica {
            engine,
            frames_received: 0,
        })
    }

    pub fn actor(&self) -> ActorId {
        self.engine.actor()
    }

    /// Issue locally and return the frame to broadcast
    pub fn issue(&mut self, target: EntityId, payload: Payload) -> Result<(Operation, Vec<u8>)> {
        let op = self
            .engine
            .issue(target, payload)
            .context("Operation rejected locally")?;
        let frame = wire::encode(&op).context("Failed to encode operation")?;
        Ok((op, frame))
    }

    pub fn receive_frame(&mut self, frame: &[u8]) -> EngineOutcome {
        self.frames_received += 1;
        self.engine.receive(frame)
    }

    pub fn frames_received(&self) -> usize {
        self.frames_received
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.engine.snapshot()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.engine.diagnostics()
    }
}

/// Shared replica state
pub type SharedReplica = Arc<Mutex<Replica>>;

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync::{ApplyStatus, Zone};

    fn config(actor: u32) -> EngineConfig {
        EngineConfig::new(ActorId(actor), [ActorId(1), ActorId(2)])
    }

    #[tokio::test]
    async fn test_frames_flow_between_replicas() {
        let (audit_tx, mut audit_rx) = mpsc::unbounded_channel();
        let mut alice = Replica::new(config(1), Table::new(ActorId(1)), Some(audit_tx)).unwrap();
        let mut bob = Replica::new(config(2), Table::new(ActorId(1)), None).unwrap();

        let (_, frame) = alice
            .issue(
                EntityId::new("token-1"),
                Payload::PlaceEntity {
                    zone: Zone::Battlefield,
                    position: 0,
                },
            )
            .unwrap();

        assert!(matches!(
            bob.receive_frame(&frame),
            EngineOutcome::Applied(_)
        ));
        assert_eq!(bob.receive_frame(&frame), EngineOutcome::Duplicate);
        assert_eq!(bob.frames_received(), 2);
        assert_eq!(alice.snapshot(), bob.snapshot());

        let record = audit_rx.recv().await.unwrap();
        assert_eq!(record.replica, ActorId(1));
        assert_eq!(record.status, ApplyStatus::Applied);
        assert!(record.local);
    }

    #[tokio::test]
    async fn test_invalid_issue_is_an_error() {
        let mut alice = Replica::new(config(1), Table::new(ActorId(1)), None).unwrap();
        let result = alice.issue(
            EntityId::new("card-1"),
            Payload::AdjustScalar {
                field_name: "life".to_string(),
                delta: 0,
            },
        );
        assert!(result.is_err());
        assert!(alice.diagnostics().clock.is_empty());
    }
}
