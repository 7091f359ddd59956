use crate::clock::ActorId;
use crate::entity::{Claim, Entity, Placement, Register};
use crate::operation::{EntityId, FaceState, Operation, Payload, Phase, Zone};
use crate::stamp::{ConflictPolicy, OpId};
use crate::tombstone::TombstoneRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory entity graph of one replica
///
/// Uses:
/// - BTreeMap for entities so that iteration (and therefore snapshots) is
///   identical on every replica
/// - Registers for every assigned attribute, sums for counters and scalars
/// - Tombstone registry for entities that left the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    entities: BTreeMap<EntityId, Entity>,
    tombstones: TombstoneRegistry,
    phase: Register<Phase>,
    active_actor: Register<ActorId>,
}

impl Table {
    /// Empty table in the first phase with `first_actor` to act
    pub fn new(first_actor: ActorId) -> Self {
        Table {
            entities: BTreeMap::new(),
            tombstones: TombstoneRegistry::new(),
            phase: Register::new(ConflictPolicy::LatestIssued, Phase::default()),
            active_actor: Register::new(ConflictPolicy::LowestActor, first_actor),
        }
    }

    /// Builder-style seeding; every replica must start from the same seed
    pub fn with_entity(mut self, id: impl Into<EntityId>, placement: Placement) -> Self {
        self.seed(id, placement);
        self
    }

    pub fn seed(&mut self, id: impl Into<EntityId>, placement: Placement) {
        self.entities.insert(id.into(), Entity::new(placement));
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityId, &Entity)> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.value()
    }

    pub fn active_actor(&self) -> ActorId {
        *self.active_actor.value()
    }

    pub fn tombstones(&self) -> &TombstoneRegistry {
        &self.tombstones
    }

    pub fn is_tombstoned(&self, id: &EntityId) -> bool {
        self.tombstones.is_tombstoned(id)
    }

    /// Resolved slots of every entity in `zone`, in slot order.
    ///
    /// Every requested slot first goes to its strongest claimant: a seeded
    /// occupant, otherwise the lowest winning writer. Entities that lost their
    /// slot then take the first slot at or above their request that is still
    /// free, so occupants nobody touched keep their place. Moved and drawn
    /// entities are appended last in placement-stamp order. Only the final
    /// placements matter, never the order they were applied in.
    pub fn zone_layout(&self, zone: Zone) -> Vec<(EntityId, u32)> {
        let mut slotted: Vec<(u32, Option<OpId>, &EntityId)> = Vec::new();
        let mut appended: Vec<(Option<(u64, OpId)>, &EntityId)> = Vec::new();

        for (id, entity) in &self.entities {
            let placement = entity.placement();
            if placement.zone != zone {
                continue;
            }
            let stamp = entity.placed_by();
            match placement.slot {
                Some(slot) => slotted.push((slot, stamp.map(|s| s.id), id)),
                None => appended.push((stamp.map(|s| (s.depth, s.id)), id)),
            }
        }
        slotted.sort();
        appended.sort();

        let mut taken = BTreeSet::new();
        let mut layout = Vec::with_capacity(slotted.len() + appended.len());
        let mut displaced = Vec::new();

        for (requested, _, id) in slotted {
            if taken.insert(requested) {
                layout.push((id.clone(), requested));
            } else {
                displaced.push((requested, id));
            }
        }

        for (requested, id) in displaced {
            let slot = next_free(&taken, requested);
            taken.insert(slot);
            layout.push((id.clone(), slot));
        }

        let mut cursor = taken
            .iter()
            .next_back()
            .map_or(0, |last| last.saturating_add(1));
        for (_, id) in appended {
            cursor = next_free(&taken, cursor);
            taken.insert(cursor);
            layout.push((id.clone(), cursor));
        }

        layout.sort_by_key(|(_, slot)| *slot);
        layout
    }

    /// Slot `id` resolved to in `zone`, if it is there
    pub fn slot_of(&self, zone: Zone, id: &EntityId) -> Option<u32> {
        self.zone_layout(zone)
            .into_iter()
            .find(|(entity, _)| entity == id)
            .map(|(_, slot)| slot)
    }

    /// Apply an operation that survived transformation.
    ///
    /// Register writes record the original operation's intent as a claim; the
    /// register then exposes the same winner the transform fold chose.
    /// Counters and scalars add the (commutative) delta.
    pub(crate) fn apply(&mut self, original: &Operation, transformed: &Operation) {
        let stamp = original.stamp();
        let clock = original.causal_snapshot.clone();

        match &transformed.payload {
            Payload::Noop { .. } => {}
            Payload::RemoveEntity => {
                self.tombstones.mark(original.target.clone());
                self.entities.remove(&original.target);
            }
            Payload::ChangePhase { .. } => {
                if let Payload::ChangePhase { new_phase } = original.payload {
                    self.phase.observe(Claim {
                        stamp,
                        clock,
                        value: new_phase,
                    });
                }
            }
            Payload::EndTurn { .. } => {
                if let Payload::EndTurn { next_actor_id } = original.payload {
                    self.active_actor.observe(Claim {
                        stamp,
                        clock,
                        value: next_actor_id,
                    });
                }
            }
            Payload::AdjustCounter { counter_name, delta } => {
                self.entity_mut(&original.target)
                    .adjust_counter(counter_name, *delta);
            }
            Payload::AdjustScalar { field_name, delta } => {
                self.entity_mut(&original.target)
                    .adjust_scalar(field_name, *delta);
            }
            Payload::ToggleState { .. } => {
                if let Payload::ToggleState { desired_state } = original.payload {
                    let claim = Claim {
                        stamp,
                        clock,
                        value: desired_state.value(),
                    };
                    let entity = self.entity_mut(&original.target);
                    match desired_state {
                        FaceState::FaceUp | FaceState::FaceDown => entity.claim_face(claim),
                        FaceState::Tapped | FaceState::Untapped => entity.claim_tap(claim),
                    }
                }
            }
            Payload::MoveEntity { .. }
            | Payload::DrawFromSource { .. }
            | Payload::PlaceEntity { .. } => {
                if let Some(placement) = original.payload.placement_for(original.actor) {
                    self.entity_mut(&original.target).claim_placement(Claim {
                        stamp,
                        clock,
                        value: placement,
                    });
                }
            }
        }
    }

    // Unknown targets are materialized with default attributes
    fn entity_mut(&mut self, id: &EntityId) -> &mut Entity {
        self.entities.entry(id.clone()).or_default()
    }

    /// Serializable view of the graph with resolved slots
    pub fn snapshot(&self) -> TableSnapshot {
        let mut slots = BTreeMap::new();
        for zone in Zone::ALL {
            slots.extend(self.zone_layout(zone));
        }

        let entities = self
            .entities
            .iter()
            .map(|(id, entity)| {
                let placement = entity.placement();
                let view = EntityView {
                    zone: placement.zone,
                    slot: slots.get(id).copied().unwrap_or_default(),
                    holder: placement.holder,
                    face_up: entity.is_face_up(),
                    tapped: entity.is_tapped(),
                    counters: entity.counters().clone(),
                    scalars: entity.scalars().clone(),
                };
                (id.clone(), view)
            })
            .collect();

        TableSnapshot {
            phase: self.phase(),
            active_actor: self.active_actor(),
            entities,
            tombstones: self.tombstones.iter().cloned().collect(),
        }
    }
}

// First slot at or above `from` nobody holds; wraps to the bottom of the zone
// when the top is exhausted
fn next_free(taken: &BTreeSet<u32>, from: u32) -> u32 {
    let mut slot = from;
    while taken.contains(&slot) {
        slot = slot.checked_add(1).unwrap_or(0);
    }
    slot
}

/// Visible state of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityView {
    pub zone: Zone,
    pub slot: u32,
    pub holder: Option<ActorId>,
    pub face_up: bool,
    pub tapped: bool,
    pub counters: BTreeMap<String, i64>,
    pub scalars: BTreeMap<String, i64>,
}

/// Visible state of the whole table; equal snapshots serialize to identical bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub phase: Phase,
    pub active_actor: ActorId,
    pub entities: BTreeMap<EntityId, EntityView>,
    pub tombstones: Vec<EntityId>,
}

impl TableSnapshot {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
