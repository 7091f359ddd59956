// Synchronization engine: one instance per replica
//
// Pipeline per inbound operation:
// Received -> Validated -> (Pending) -> Transformed -> Applied | NoOp
// with Rejected at validation. Single-threaded and synchronous; the host owns
// any locking around it.

use crate::clock::{ActorId, CausalClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, ValidationError};
use crate::operation::{EntityId, Operation, Payload};
use crate::stamp::OpId;
use crate::table::{Table, TableSnapshot};
use crate::transform::{TransformRegistry, TransformTable};
use crate::wire;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Result of handing one operation to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Applied, carrying the (possibly transformed) operation
    Applied(Operation),
    /// Accepted without any state change (tombstoned or superseded target)
    NoOp(Operation),
    /// Held until its causal dependencies arrive
    Pending,
    /// Already applied or already pending
    Duplicate,
    /// Refused locally; never applied, never re-broadcast
    Rejected(ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    NoOp,
}

/// Passed to `on_applied` listeners once per Applied / NoOp outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: ApplyStatus,

    /// Final form of the operation after transformation
    pub operation: Operation,

    /// The operation as issued
    pub original: Operation,

    /// Issued by this replica
    pub local: bool,
}

/// Point-in-time health of a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub clock: CausalClock,
    pub pending: usize,
    pub buffered: usize,
    pub tombstones: usize,
    pub oldest_pending_age: Option<Duration>,
}

// Applied operation kept for transforming later concurrent arrivals
#[derive(Debug, Clone)]
struct BufferedOp {
    original: Operation,
    transformed: Operation,
    superseded: bool,
    sequence: u64,
}

#[derive(Debug, Clone)]
struct PendingOp {
    op: Operation,
    received_at: Instant,
}

type Listener = Box<dyn FnMut(&Delivery) + Send>;

pub struct Engine {
    config: EngineConfig,
    transforms: TransformTable,
    table: Table,
    clock: CausalClock,

    /// Latest integrated clock of every member; the meet of these bounds pruning
    known: BTreeMap<ActorId, CausalClock>,

    buffer: BTreeMap<OpId, BufferedOp>,
    applied_count: u64,
    pending: BTreeMap<OpId, PendingOp>,
    listeners: Vec<Listener>,
    wall_clock: fn() -> u64,
    last_issued_at: u64,
}

fn system_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

impl Engine {
    /// Build an engine. Fails if the registry misses any (kind, kind) pair or
    /// the configuration is inconsistent; the session must not start then.
    pub fn new(
        config: EngineConfig,
        registry: &TransformRegistry,
        table: Table,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let transforms = registry.freeze()?;

        info!(
            "Engine for actor {} started with {} members",
            config.actor,
            config.members.len()
        );

        Ok(Engine {
            config,
            transforms,
            table,
            clock: CausalClock::new(),
            known: BTreeMap::new(),
            buffer: BTreeMap::new(),
            applied_count: 0,
            pending: BTreeMap::new(),
            listeners: Vec::new(),
            wall_clock: system_millis,
            last_issued_at: 0,
        })
    }

    /// Engine with the built-in transform registry
    pub fn standard(config: EngineConfig, table: Table) -> Result<Self, EngineError> {
        Engine::new(config, &TransformRegistry::standard(), table)
    }

    /// Replace the source of `issued_at` (milliseconds)
    pub fn with_wall_clock(mut self, wall_clock: fn() -> u64) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Register a callback fired for every Applied / NoOp delivery, local or remote
    pub fn on_applied<F>(&mut self, listener: F)
    where
        F: FnMut(&Delivery) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Issue a local operation: stamp it with the next clock, validate it, apply
    /// it, and return it for broadcast. Invalid operations change nothing.
    pub fn issue(
        &mut self,
        target: impl Into<EntityId>,
        payload: Payload,
    ) -> Result<Operation, ValidationError> {
        let actor = self.config.actor;
        let causal_snapshot = self.clock.incremented(actor);
        let issued_at = (self.wall_clock)().max(self.last_issued_at);

        let op = Operation {
            id: OpId::new(actor, causal_snapshot.get(actor)),
            actor,
            target: target.into(),
            payload,
            causal_snapshot,
            issued_at,
            resolved_by: None,
        };
        self.check(&op)?;

        self.last_issued_at = issued_at;
        self.integrate(op.clone(), true);
        Ok(op)
    }

    /// Decode and process a wire frame
    pub fn receive(&mut self, frame: &[u8]) -> EngineOutcome {
        match wire::decode(frame) {
            Ok(op) => self.receive_operation(op),
            Err(e) => {
                warn!("Rejected frame on actor {}: {}", self.config.actor, e);
                EngineOutcome::Rejected(e)
            }
        }
    }

    /// Process an already-decoded remote operation
    pub fn receive_operation(&mut self, op: Operation) -> EngineOutcome {
        if let Err(e) = self.check(&op) {
            warn!(
                "Rejected operation {} on actor {}: {}",
                op.id, self.config.actor, e
            );
            return EngineOutcome::Rejected(e);
        }

        if op.id.seq <= self.clock.get(op.actor) || self.pending.contains_key(&op.id) {
            trace!("Ignoring duplicate {}", op.id);
            return EngineOutcome::Duplicate;
        }

        if !self.is_ready(&op) {
            debug!(
                "Holding {} until its dependencies arrive (local clock {}, snapshot {})",
                op.id, self.clock, op.causal_snapshot
            );
            self.pending.insert(
                op.id,
                PendingOp {
                    op,
                    received_at: Instant::now(),
                },
            );
            return EngineOutcome::Pending;
        }

        let outcome = self.integrate(op, false);
        self.drain_pending();
        outcome
    }

    // Validation plus membership checks
    fn check(&self, op: &Operation) -> Result<(), ValidationError> {
        op.validate(&self.config.limits)?;

        let members = &self.config.members;
        if let Some((stranger, _)) = op
            .causal_snapshot
            .iter()
            .find(|(actor, _)| !members.contains(actor))
        {
            return Err(ValidationError::UnknownActor(stranger));
        }
        if let Payload::EndTurn { next_actor_id } = op.payload {
            if !members.contains(&next_actor_id) {
                return Err(ValidationError::UnknownActor(next_actor_id));
            }
        }
        Ok(())
    }

    // Causal delivery: next from its issuer, and everything it saw is applied
    fn is_ready(&self, op: &Operation) -> bool {
        let issuer = op.actor;
        op.causal_snapshot.get(issuer) == self.clock.get(issuer) + 1
            && op
                .causal_snapshot
                .iter()
                .filter(|(actor, _)| *actor != issuer)
                .all(|(actor, count)| count <= self.clock.get(actor))
    }

    fn drain_pending(&mut self) {
        loop {
            let next = self
                .pending
                .values()
                .filter(|pending| self.is_ready(&pending.op))
                .min_by_key(|pending| (pending.op.causal_snapshot.depth(), pending.op.id))
                .map(|pending| pending.op.id);

            let Some(id) = next else {
                break;
            };
            if let Some(pending) = self.pending.remove(&id) {
                trace!("Releasing pending {}", id);
                self.integrate(pending.op, false);
            }
        }
    }

    fn integrate(&mut self, op: Operation, local: bool) -> EngineOutcome {
        self.clock.absorb(&op.causal_snapshot);
        self.known
            .entry(op.actor)
            .or_default()
            .absorb(&op.causal_snapshot);
        self.known.insert(self.config.actor, self.clock.clone());

        let transformed = if self.table.is_tombstoned(&op.target) {
            debug!("{} targets removed entity {}", op.id, op.target);
            op.to_noop()
        } else {
            let mut transformed = self.transform(&op);
            if !transformed.is_noop() {
                self.table.apply(&op, &transformed);
                self.report_resolved_slot(&op.target, &mut transformed);
            }
            self.mark_superseded(&op);
            self.buffer.insert(
                op.id,
                BufferedOp {
                    original: op.clone(),
                    transformed: transformed.clone(),
                    superseded: false,
                    sequence: self.applied_count,
                },
            );
            self.applied_count += 1;
            self.prune();
            transformed
        };

        let status = if transformed.is_noop() {
            ApplyStatus::NoOp
        } else {
            ApplyStatus::Applied
        };
        debug!(
            "Actor {} {:?} {} ({}) on {}, clock {}",
            self.config.actor,
            status,
            op.id,
            op.kind(),
            op.target,
            self.clock
        );

        let delivery = Delivery {
            status,
            operation: transformed.clone(),
            original: op,
            local,
        };
        for listener in &mut self.listeners {
            listener(&delivery);
        }

        match status {
            ApplyStatus::Applied => EngineOutcome::Applied(transformed),
            ApplyStatus::NoOp => EngineOutcome::NoOp(transformed),
        }
    }

    // Placements carry the slot the zone layout settled on, which can sit
    // further up than the pairwise transforms alone suggest
    fn report_resolved_slot(&self, target: &EntityId, transformed: &mut Operation) {
        if let Payload::PlaceEntity { zone, position } = &mut transformed.payload {
            if let Some(slot) = self.table.slot_of(*zone, target) {
                *position = slot;
            }
        }
    }

    /// Fold `op` through every concurrent frontier operation in ascending OpId order
    fn transform(&self, op: &Operation) -> Operation {
        let mut current = op.clone();

        for entry in self.buffer.values() {
            if entry.superseded
                || !entry
                    .original
                    .causal_snapshot
                    .is_concurrent_with(&op.causal_snapshot)
            {
                continue;
            }

            let next = self.transforms.transform(&current, &entry.original);
            if next != current {
                trace!(
                    "{} transformed against {}: {:?} -> {:?}",
                    op.id,
                    entry.original.id,
                    current.payload,
                    next.payload
                );
            }
            current = next;

            if current.is_noop() {
                break;
            }
        }

        current
    }

    // Buffered writes to the same register that `op` causally follows stop
    // taking part in resolution
    fn mark_superseded(&mut self, op: &Operation) {
        let Some(attribute) = op.payload.attribute().filter(|a| a.is_register()) else {
            return;
        };

        for entry in self.buffer.values_mut() {
            if entry.superseded
                || entry.original.target != op.target
                || entry.original.payload.attribute().as_ref() != Some(&attribute)
            {
                continue;
            }
            if entry
                .original
                .causal_snapshot
                .dominated_by(&op.causal_snapshot)
            {
                entry.superseded = true;
            }
        }
    }

    /// Drop entries every member has already seen, keeping the most recent
    /// `retention_floor` regardless
    fn prune(&mut self) {
        let horizon = self
            .config
            .members
            .iter()
            .map(|member| self.known.get(member).cloned().unwrap_or_default())
            .reduce(|a, b| a.meet(&b))
            .unwrap_or_default();

        let cutoff = self
            .applied_count
            .saturating_sub(self.config.retention_floor as u64);
        let before = self.buffer.len();

        self.buffer.retain(|_, entry| {
            entry.sequence >= cutoff || !entry.original.causal_snapshot.dominated_by(&horizon)
        });

        let pruned = before - self.buffer.len();
        if pruned > 0 {
            trace!("Pruned {} stable operations, horizon {}", pruned, horizon);
        }
    }

    pub fn actor(&self) -> ActorId {
        self.config.actor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &CausalClock {
        &self.clock
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.table.snapshot()
    }

    /// Transformed forms of the operations still buffered, in OpId order
    pub fn buffered(&self) -> impl Iterator<Item = &Operation> {
        self.buffer.values().map(|entry| &entry.transformed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Age of the oldest operation waiting for dependencies. A growing value
    /// means the transport lost something; the engine does not recover it.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.pending
            .values()
            .map(|pending| pending.received_at.elapsed())
            .max()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            clock: self.clock.clone(),
            pending: self.pending.len(),
            buffered: self.buffer.len(),
            tombstones: self.table.tombstones().len(),
            oldest_pending_age: self.oldest_pending_age(),
        }
    }
}
