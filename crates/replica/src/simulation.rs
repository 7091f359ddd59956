// In-process table simulation
//
// One replica per participant, each behind its own receive task. Frames are
// delivered after a random delay, sometimes twice, so replicas see concurrent
// operations in different orders. When the network is quiet every replica
// must hold the same table.

use crate::config::SimulationConfig;
use crate::messages::PeerMessage;
use crate::op_log::OpLog;
use crate::replica::{Replica, SharedReplica};
use crate::session::{SharedSession, TableSession};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tablesync::{
    ActorId, EngineConfig, EngineOutcome, EntityId, FaceState, Payload, Phase, Placement, Table,
    TableSnapshot, Zone,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

const CARDS: usize = 20;

#[derive(Debug)]
pub struct SimulationReport {
    pub session_id: Uuid,
    pub replicas: usize,
    pub operations: usize,
    pub duplicates_ignored: usize,
    pub rejected: usize,
    pub converged: bool,

    /// Final table, if every replica agreed on it
    pub snapshot: Option<TableSnapshot>,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    duplicates: AtomicUsize,
    rejected: AtomicUsize,
}

fn card(i: usize) -> EntityId {
    EntityId::new(format!("card-{}", i))
}

/// Starting table every replica agrees on
pub fn seed_table() -> Table {
    let mut table = Table::new(ActorId(1));
    for i in 0..CARDS {
        table.seed(card(i), Placement::at(Zone::Library, i as u32));
    }
    table
}

fn random_delta(rng: &mut StdRng) -> i64 {
    let magnitude = rng.gen_range(1..=3);
    if rng.gen_bool(0.5) {
        -magnitude
    } else {
        magnitude
    }
}

/// Some plausible table action by any of `members` actors
pub fn random_operation(rng: &mut StdRng, members: usize) -> (EntityId, Payload) {
    let target = card(rng.gen_range(0..CARDS));

    match rng.gen_range(0..100) {
        0..=24 => (
            target,
            Payload::MoveEntity {
                from_zone: Zone::ALL[rng.gen_range(0..Zone::ALL.len())],
                to_zone: Zone::ALL[rng.gen_range(0..Zone::ALL.len())],
            },
        ),
        25..=39 => {
            let desired_state = if rng.gen_bool(0.5) {
                FaceState::Tapped
            } else {
                FaceState::Untapped
            };
            (target, Payload::ToggleState { desired_state })
        }
        40..=49 => (
            target,
            Payload::DrawFromSource {
                source_zone: Zone::Library,
            },
        ),
        50..=59 => (
            EntityId::new(format!("token-{}", rng.gen_range(0..6))),
            Payload::PlaceEntity {
                zone: Zone::Battlefield,
                position: rng.gen_range(0..10),
            },
        ),
        60..=74 => (
            target,
            Payload::AdjustCounter {
                counter_name: "+1/+1".to_string(),
                delta: random_delta(rng),
            },
        ),
        75..=84 => (
            target,
            Payload::AdjustScalar {
                field_name: "life".to_string(),
                delta: random_delta(rng),
            },
        ),
        85..=91 => (
            EntityId::table(),
            Payload::ChangePhase {
                new_phase: Phase::ALL[rng.gen_range(0..Phase::ALL.len())],
            },
        ),
        92..=97 => (
            EntityId::table(),
            Payload::EndTurn {
                next_actor_id: ActorId(rng.gen_range(1..=members as u32)),
            },
        ),
        _ => (target, Payload::RemoveEntity),
    }
}

pub async fn run(config: &SimulationConfig) -> Result<SimulationReport> {
    config.validate()?;

    let members: Vec<ActorId> = (1..=config.replicas as u32).map(ActorId).collect();
    let session: SharedSession = Arc::new(RwLock::new(TableSession::new()));
    let session_id = session.read().await.id;
    let counters = Arc::new(Counters::default());

    // Optional audit log fed by every replica
    let (audit_tx, writer) = match &config.op_log_path {
        Some(path) => {
            let log = OpLog::open(path).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(log.spawn_writer(rx)))
        }
        None => (None, None),
    };

    tracing::info!(
        "Starting table {} with {} replicas, {} operations each",
        session_id,
        config.replicas,
        config.ops_per_actor
    );

    let mut replicas: Vec<SharedReplica> = Vec::new();
    let mut receivers: Vec<JoinHandle<()>> = Vec::new();

    for &actor in &members {
        let engine_config = EngineConfig::new(actor, members.clone())
            .with_retention_floor(config.retention_floor);
        let replica = Replica::new(engine_config, seed_table(), audit_tx.clone())
            .with_context(|| format!("Failed to start replica {}", actor))?;
        let replica: SharedReplica = Arc::new(Mutex::new(replica));

        let (tx, rx) = mpsc::unbounded_channel();
        session.write().await.join(actor, tx)?;

        receivers.push(spawn_receiver(actor, replica.clone(), rx, counters.clone()));
        replicas.push(replica);
    }
    drop(audit_tx);

    // Every participant plays concurrently
    let mut issuers = Vec::new();
    for replica in &replicas {
        issuers.push(spawn_issuer(
            replica.clone(),
            session.clone(),
            counters.clone(),
            config.clone(),
        ));
    }
    for issuer in issuers {
        issuer.await.context("Issuer task panicked")??;
    }

    // Quiescence: every scheduled frame has reached its replica
    while counters.in_flight.load(Ordering::SeqCst) > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    {
        let mut session = session.write().await;
        tracing::info!(
            "Table {} quiet after {:?}, {} participants leaving",
            session.id,
            chrono::Utc::now() - session.created_at,
            session.participant_count()
        );
        let actors: Vec<ActorId> = session.actors().collect();
        for actor in actors {
            session.leave(actor);
        }
    }
    for receiver in receivers {
        receiver.await.context("Receiver task panicked")?;
    }

    let mut snapshots = Vec::new();
    for replica in &replicas {
        let replica = replica.lock().await;
        let diagnostics = replica.diagnostics();
        if diagnostics.pending > 0 {
            tracing::warn!(
                "Replica {} still holds {} pending operations (oldest {:?})",
                replica.actor(),
                diagnostics.pending,
                diagnostics.oldest_pending_age
            );
        }
        tracing::debug!(
            "Replica {}: clock {}, {} buffered, {} frames received",
            replica.actor(),
            diagnostics.clock,
            diagnostics.buffered,
            replica.frames_received()
        );
        snapshots.push(replica.snapshot());
    }
    // Dropping the replicas closes the audit channel
    drop(replicas);

    if let Some(writer) = writer {
        let written = writer.await.context("Op log writer panicked")??;
        tracing::info!("Op log holds {} records", written);
    }

    let mut encoded = Vec::with_capacity(snapshots.len());
    for snapshot in &snapshots {
        encoded.push(snapshot.to_bytes().context("Failed to encode snapshot")?);
    }
    let converged = encoded.iter().all(|bytes| bytes == &encoded[0]);

    Ok(SimulationReport {
        session_id,
        replicas: config.replicas,
        operations: config.replicas * config.ops_per_actor,
        duplicates_ignored: counters.duplicates.load(Ordering::SeqCst),
        rejected: counters.rejected.load(Ordering::SeqCst),
        converged,
        snapshot: converged.then(|| snapshots.swap_remove(0)),
    })
}

fn spawn_receiver(
    actor: ActorId,
    replica: SharedReplica,
    mut inbox: mpsc::UnboundedReceiver<PeerMessage>,
    counters: Arc<Counters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            match message {
                PeerMessage::Operation { from, frame } => {
                    let outcome = replica.lock().await.receive_frame(&frame);
                    match outcome {
                        EngineOutcome::Duplicate => {
                            counters.duplicates.fetch_add(1, Ordering::SeqCst);
                        }
                        EngineOutcome::Rejected(e) => {
                            tracing::warn!("Replica {} rejected frame from {}: {}", actor, from, e);
                            counters.rejected.fetch_add(1, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                PeerMessage::Joined { actor: other } => {
                    tracing::debug!("Replica {} sees {} join", actor, other);
                }
                PeerMessage::Left { actor: other } => {
                    tracing::debug!("Replica {} sees {} leave", actor, other);
                }
            }
        }
    })
}

fn spawn_issuer(
    replica: SharedReplica,
    session: SharedSession,
    counters: Arc<Counters>,
    config: SimulationConfig,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let actor = replica.lock().await.actor();
        let mut rng =
            StdRng::seed_from_u64(config.seed ^ u64::from(actor.0).wrapping_mul(0x9e37_79b9));

        for _ in 0..config.ops_per_actor {
            let (target, payload) = random_operation(&mut rng, config.replicas);
            let (_, frame) = replica.lock().await.issue(target, payload)?;

            let recipients = session.read().await.senders_except(actor);
            for (_, sender) in recipients {
                let copies = if rng.gen_bool(config.duplicate_rate) { 2 } else { 1 };
                for _ in 0..copies {
                    let delay = Duration::from_millis(rng.gen_range(0..=config.max_delay_ms));
                    let message = PeerMessage::Operation {
                        from: actor,
                        frame: frame.clone(),
                    };
                    let sender = sender.clone();
                    let counters = counters.clone();

                    counters.in_flight.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if sender.send(message).is_err() {
                            counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                        }
                    });
                }
            }

            // let other participants act in between
            tokio::time::sleep(Duration::from_millis(rng.gen_range(0..=2))).await;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_small_table_converges() {
        let config = SimulationConfig {
            replicas: 3,
            ops_per_actor: 20,
            max_delay_ms: 5,
            duplicate_rate: 0.2,
            seed: 11,
            op_log_path: None,
            retention_floor: 16,
        };

        let report = run(&config).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.operations, 60);
        assert_eq!(report.rejected, 0);
        assert!(report.snapshot.is_some());
    }

    #[tokio::test]
    async fn test_op_log_records_every_delivery() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ops.jsonl");
        let config = SimulationConfig {
            replicas: 2,
            ops_per_actor: 10,
            max_delay_ms: 2,
            duplicate_rate: 0.0,
            seed: 3,
            op_log_path: Some(path.clone()),
            retention_floor: 256,
        };

        let report = run(&config).await.unwrap();
        assert!(report.converged);

        // each operation is applied (or no-op'd) once on each replica
        let records = OpLog::read_all(&path).await.unwrap();
        assert_eq!(records.len(), 2 * 20);
        assert_eq!(records.iter().filter(|record| record.local).count(), 20);
    }
}
