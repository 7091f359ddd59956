// Transformation registry and the built-in conflict-resolution functions
//
// A transform rewrites an incoming operation against one already-applied
// operation it is concurrent with. The engine folds the incoming operation
// through every concurrent frontier operation in ascending OpId order.

use crate::error::UnregisteredTransformError;
use crate::operation::{OpKind, Operation, Payload, Zone};
use crate::stamp::ConflictPolicy;
use std::collections::BTreeMap;

/// `fn(incoming, applied) -> transformed incoming`
pub type TransformFn = fn(&Operation, &Operation) -> Operation;

/// Mutable registration table, filled once at session start
#[derive(Clone, Default)]
pub struct TransformRegistry {
    functions: BTreeMap<(OpKind, OpKind), TransformFn>,
}

impl TransformRegistry {
    /// Empty registry; an engine cannot be built from it until every pair is registered
    pub fn new() -> Self {
        TransformRegistry::default()
    }

    /// Registry with the built-in resolution for every pair of kinds
    pub fn standard() -> Self {
        let mut registry = TransformRegistry::new();

        for incoming in OpKind::ALL {
            for applied in OpKind::ALL {
                let function: TransformFn = match (incoming, applied) {
                    (_, OpKind::RemoveEntity) => superseded_by_removal,
                    (a, b) if is_placement(a) && is_placement(b) => placement_vs_placement,
                    (OpKind::ToggleState, OpKind::ToggleState) => toggle_vs_toggle,
                    (OpKind::ChangePhase, OpKind::ChangePhase) => phase_vs_phase,
                    (OpKind::EndTurn, OpKind::EndTurn) => end_turn_vs_end_turn,
                    // counters and scalars sum; everything else writes disjoint attributes
                    _ => commute,
                };
                registry.register(incoming, applied, function);
            }
        }

        registry
    }

    pub fn register(&mut self, incoming: OpKind, applied: OpKind, function: TransformFn) {
        self.functions.insert((incoming, applied), function);
    }

    /// Drop a registration (used to exercise construction failures)
    pub fn unregister(&mut self, incoming: OpKind, applied: OpKind) -> Option<TransformFn> {
        self.functions.remove(&(incoming, applied))
    }

    pub fn resolve(
        &self,
        incoming: OpKind,
        applied: OpKind,
    ) -> Result<TransformFn, UnregisteredTransformError> {
        self.functions
            .get(&(incoming, applied))
            .copied()
            .ok_or(UnregisteredTransformError { incoming, applied })
    }

    /// Fails on the first (kind, kind) pair without a function
    pub fn verify(&self) -> Result<(), UnregisteredTransformError> {
        self.freeze().map(|_| ())
    }

    /// Immutable lookup table used by the engine for the rest of the session
    pub fn freeze(&self) -> Result<TransformTable, UnregisteredTransformError> {
        let mut functions = [[commute as TransformFn; OpKind::COUNT]; OpKind::COUNT];
        for incoming in OpKind::ALL {
            for applied in OpKind::ALL {
                functions[incoming.index()][applied.index()] = self.resolve(incoming, applied)?;
            }
        }
        Ok(TransformTable { functions })
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Complete, frozen transform table; lookups cannot fail
#[derive(Clone)]
pub struct TransformTable {
    functions: [[TransformFn; OpKind::COUNT]; OpKind::COUNT],
}

impl TransformTable {
    pub fn get(&self, incoming: OpKind, applied: OpKind) -> TransformFn {
        self.functions[incoming.index()][applied.index()]
    }

    pub fn transform(&self, incoming: &Operation, applied: &Operation) -> Operation {
        self.get(incoming.kind(), applied.kind())(incoming, applied)
    }
}

fn is_placement(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::MoveEntity | OpKind::DrawFromSource | OpKind::PlaceEntity
    )
}

/// Disjoint targets or attributes, or commutative sums: nothing to rewrite
pub fn commute(incoming: &Operation, _applied: &Operation) -> Operation {
    incoming.clone()
}

/// Any operation concurrent with the removal of its target does nothing
pub fn superseded_by_removal(incoming: &Operation, applied: &Operation) -> Operation {
    if incoming.target == applied.target {
        incoming.to_noop()
    } else {
        incoming.clone()
    }
}

/// Move / Draw / Place against Move / Draw / Place.
///
/// Same entity: the lower actor decides where it ends up and the loser is
/// rewritten to follow the winner. Different entities placed on the same slot
/// of the same zone: the loser is offset to the next slot.
pub fn placement_vs_placement(incoming: &Operation, applied: &Operation) -> Operation {
    let policy = ConflictPolicy::LowestActor;
    let holder = incoming.effective_stamp();
    let challenger = applied.stamp();

    if incoming.target == applied.target {
        if !policy.prefers(&challenger, &holder) {
            return incoming.clone();
        }
        let Some(won) = applied.payload.placement_for(applied.actor) else {
            return incoming.clone();
        };
        let payload = match won.slot {
            Some(slot) => Payload::PlaceEntity {
                zone: won.zone,
                position: slot,
            },
            None => Payload::MoveEntity {
                from_zone: origin_zone(&incoming.payload),
                to_zone: won.zone,
            },
        };
        return incoming.rewritten(payload, challenger);
    }

    match (&incoming.payload, &applied.payload) {
        (
            Payload::PlaceEntity { zone, position },
            Payload::PlaceEntity {
                zone: taken_zone,
                position: taken,
            },
        ) if zone == taken_zone && position == taken && policy.prefers(&challenger, &holder) => {
            incoming.rewritten(
                Payload::PlaceEntity {
                    zone: *zone,
                    position: position.saturating_add(1),
                },
                challenger,
            )
        }
        _ => incoming.clone(),
    }
}

// Zone the entity was taken from, as the issuer saw it
fn origin_zone(payload: &Payload) -> Zone {
    match payload {
        Payload::MoveEntity { from_zone, .. } => *from_zone,
        Payload::DrawFromSource { source_zone } => *source_zone,
        Payload::PlaceEntity { zone, .. } => *zone,
        _ => Zone::Library,
    }
}

/// Same face or tap attribute: later issuedAt wins, then lower actor
pub fn toggle_vs_toggle(incoming: &Operation, applied: &Operation) -> Operation {
    match (&incoming.payload, &applied.payload) {
        (
            Payload::ToggleState { desired_state },
            Payload::ToggleState {
                desired_state: winning_state,
            },
        ) if incoming.target == applied.target
            && desired_state.attribute() == winning_state.attribute() =>
        {
            resolve_register(
                ConflictPolicy::LatestIssued,
                incoming,
                applied,
                Payload::ToggleState {
                    desired_state: *winning_state,
                },
            )
        }
        _ => incoming.clone(),
    }
}

/// Later issuedAt wins, then lower actor
pub fn phase_vs_phase(incoming: &Operation, applied: &Operation) -> Operation {
    match applied.payload {
        Payload::ChangePhase { new_phase } => resolve_register(
            ConflictPolicy::LatestIssued,
            incoming,
            applied,
            Payload::ChangePhase { new_phase },
        ),
        _ => incoming.clone(),
    }
}

/// Lower actor decides who acts next
pub fn end_turn_vs_end_turn(incoming: &Operation, applied: &Operation) -> Operation {
    match applied.payload {
        Payload::EndTurn { next_actor_id } => resolve_register(
            ConflictPolicy::LowestActor,
            incoming,
            applied,
            Payload::EndTurn { next_actor_id },
        ),
        _ => incoming.clone(),
    }
}

fn resolve_register(
    policy: ConflictPolicy,
    incoming: &Operation,
    applied: &Operation,
    winning: Payload,
) -> Operation {
    let challenger = applied.stamp();
    if policy.prefers(&challenger, &incoming.effective_stamp()) {
        incoming.rewritten(winning, challenger)
    } else {
        incoming.clone()
    }
}
