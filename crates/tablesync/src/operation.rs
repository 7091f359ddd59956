use crate::clock::{ActorId, CausalClock};
use crate::config::Limits;
use crate::entity::Placement;
use crate::error::ValidationError;
use crate::stamp::{OpId, Stamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an entity in the shared graph (card, token, player).
///
/// The reserved id [`EntityId::TABLE`] addresses session-level state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub const TABLE: &'static str = "table";

    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn table() -> Self {
        EntityId(Self::TABLE.to_string())
    }

    pub fn is_table(&self) -> bool {
        self.0 == Self::TABLE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Library,
    Hand,
    Battlefield,
    Graveyard,
    Exile,
    Stack,
    Command,
}

impl Zone {
    pub const ALL: [Zone; 7] = [
        Zone::Library,
        Zone::Hand,
        Zone::Battlefield,
        Zone::Graveyard,
        Zone::Exile,
        Zone::Stack,
        Zone::Command,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Untap,
    Upkeep,
    Draw,
    PrecombatMain,
    Combat,
    PostcombatMain,
    End,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Untap,
        Phase::Upkeep,
        Phase::Draw,
        Phase::PrecombatMain,
        Phase::Combat,
        Phase::PostcombatMain,
        Phase::End,
        Phase::Cleanup,
    ];
}

/// Desired state of a ToggleState operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceState {
    FaceUp,
    FaceDown,
    Tapped,
    Untapped,
}

impl FaceState {
    pub fn attribute(self) -> Attribute {
        match self {
            FaceState::FaceUp | FaceState::FaceDown => Attribute::Face,
            FaceState::Tapped | FaceState::Untapped => Attribute::Tap,
        }
    }

    /// Boolean written to the attribute (face up / tapped)
    pub fn value(self) -> bool {
        matches!(self, FaceState::FaceUp | FaceState::Tapped)
    }
}

/// Kind of an operation, used to index the transformation registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    MoveEntity = 0,
    ToggleState = 1,
    DrawFromSource = 2,
    PlaceEntity = 3,
    AdjustCounter = 4,
    AdjustScalar = 5,
    ChangePhase = 6,
    EndTurn = 7,
    RemoveEntity = 8,
}

impl OpKind {
    pub const COUNT: usize = 9;

    pub const ALL: [OpKind; OpKind::COUNT] = [
        OpKind::MoveEntity,
        OpKind::ToggleState,
        OpKind::DrawFromSource,
        OpKind::PlaceEntity,
        OpKind::AdjustCounter,
        OpKind::AdjustScalar,
        OpKind::ChangePhase,
        OpKind::EndTurn,
        OpKind::RemoveEntity,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Kinds addressing the session itself rather than an entity
    pub fn is_session_level(self) -> bool {
        matches!(self, OpKind::ChangePhase | OpKind::EndTurn)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::MoveEntity => "MoveEntity",
            OpKind::ToggleState => "ToggleState",
            OpKind::DrawFromSource => "DrawFromSource",
            OpKind::PlaceEntity => "PlaceEntity",
            OpKind::AdjustCounter => "AdjustCounter",
            OpKind::AdjustScalar => "AdjustScalar",
            OpKind::ChangePhase => "ChangePhase",
            OpKind::EndTurn => "EndTurn",
            OpKind::RemoveEntity => "RemoveEntity",
        };
        f.write_str(name)
    }
}

/// The attribute an operation writes. Two operations conflict only when they
/// write the same attribute of the same target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Placement,
    Face,
    Tap,
    Counter(String),
    Scalar(String),
    Phase,
    ActiveActor,
    Presence,
}

impl Attribute {
    /// Registers keep one winning value; counters and scalars accumulate
    pub fn is_register(&self) -> bool {
        !matches!(
            self,
            Attribute::Counter(_) | Attribute::Scalar(_) | Attribute::Presence
        )
    }
}

/// Kind-specific payload of an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    MoveEntity { from_zone: Zone, to_zone: Zone },
    ToggleState { desired_state: FaceState },
    DrawFromSource { source_zone: Zone },
    PlaceEntity { zone: Zone, position: u32 },
    AdjustCounter { counter_name: String, delta: i64 },
    AdjustScalar { field_name: String, delta: i64 },
    ChangePhase { new_phase: Phase },
    EndTurn { next_actor_id: ActorId },
    RemoveEntity,

    /// Transformed form of an operation that must not change any state
    Noop { original: OpKind },
}

impl Payload {
    pub fn kind(&self) -> OpKind {
        match self {
            Payload::MoveEntity { .. } => OpKind::MoveEntity,
            Payload::ToggleState { .. } => OpKind::ToggleState,
            Payload::DrawFromSource { .. } => OpKind::DrawFromSource,
            Payload::PlaceEntity { .. } => OpKind::PlaceEntity,
            Payload::AdjustCounter { .. } => OpKind::AdjustCounter,
            Payload::AdjustScalar { .. } => OpKind::AdjustScalar,
            Payload::ChangePhase { .. } => OpKind::ChangePhase,
            Payload::EndTurn { .. } => OpKind::EndTurn,
            Payload::RemoveEntity => OpKind::RemoveEntity,
            Payload::Noop { original } => *original,
        }
    }

    pub fn attribute(&self) -> Option<Attribute> {
        match self {
            Payload::MoveEntity { .. }
            | Payload::DrawFromSource { .. }
            | Payload::PlaceEntity { .. } => Some(Attribute::Placement),
            Payload::ToggleState { desired_state } => Some(desired_state.attribute()),
            Payload::AdjustCounter { counter_name, .. } => {
                Some(Attribute::Counter(counter_name.clone()))
            }
            Payload::AdjustScalar { field_name, .. } => Some(Attribute::Scalar(field_name.clone())),
            Payload::ChangePhase { .. } => Some(Attribute::Phase),
            Payload::EndTurn { .. } => Some(Attribute::ActiveActor),
            Payload::RemoveEntity => Some(Attribute::Presence),
            Payload::Noop { .. } => None,
        }
    }

    /// Placement written by a placement-class payload issued by `actor`.
    ///
    /// Entities moved into a hand belong to the hand of the issuing actor.
    pub fn placement_for(&self, actor: ActorId) -> Option<Placement> {
        let holder = |zone: Zone| (zone == Zone::Hand).then_some(actor);
        match self {
            Payload::MoveEntity { to_zone, .. } => Some(Placement {
                zone: *to_zone,
                slot: None,
                holder: holder(*to_zone),
            }),
            Payload::DrawFromSource { .. } => Some(Placement {
                zone: Zone::Hand,
                slot: None,
                holder: Some(actor),
            }),
            Payload::PlaceEntity { zone, position } => Some(Placement {
                zone: *zone,
                slot: Some(*position),
                holder: holder(*zone),
            }),
            _ => None,
        }
    }
}

/// Immutable record of one atomic mutation to the shared graph.
///
/// Transformation never edits an operation in place; it produces a new one and
/// the original is kept alongside for audit and duplicate checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OpId,
    pub actor: ActorId,
    pub target: EntityId,
    pub payload: Payload,

    /// Issuer's clock including this operation
    pub causal_snapshot: CausalClock,

    /// Wall-clock hint in milliseconds, never authoritative
    pub issued_at: u64,

    /// Stamp of the concurrent operation whose result this one adopted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<Stamp>,
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.id, self.issued_at, self.causal_snapshot.depth())
    }

    /// Stamp this operation competes with: its own, or the one it was resolved to
    pub fn effective_stamp(&self) -> Stamp {
        self.resolved_by.unwrap_or_else(|| self.stamp())
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.payload, Payload::Noop { .. })
    }

    pub fn to_noop(&self) -> Operation {
        Operation {
            payload: Payload::Noop {
                original: self.kind(),
            },
            ..self.clone()
        }
    }

    /// New operation with `payload`, recording that it now carries the outcome of `by`
    pub fn rewritten(&self, payload: Payload, by: Stamp) -> Operation {
        Operation {
            payload,
            resolved_by: Some(by),
            ..self.clone()
        }
    }

    /// Structural validation. Never consults replica state.
    pub fn validate(&self, limits: &Limits) -> Result<(), ValidationError> {
        if self.is_noop() || self.resolved_by.is_some() {
            return Err(ValidationError::NotIssuable(self.id));
        }
        if self.id.actor != self.actor {
            return Err(ValidationError::ForeignId {
                id: self.id,
                actor: self.actor,
            });
        }
        if self.id.seq == 0
            || self.causal_snapshot.get(self.actor) != self.id.seq
            || self.causal_snapshot.iter().any(|(_, count)| count == 0)
        {
            return Err(ValidationError::SnapshotMismatch { id: self.id });
        }
        if self.target.as_str().is_empty() {
            return Err(ValidationError::EmptyTarget(self.id));
        }

        let kind = self.kind();
        if kind.is_session_level() != self.target.is_table() {
            return Err(ValidationError::WrongTarget {
                kind,
                target: self.target.clone(),
            });
        }

        match &self.payload {
            Payload::AdjustCounter {
                counter_name: name,
                delta,
            }
            | Payload::AdjustScalar {
                field_name: name,
                delta,
            } => {
                validate_name(name, limits)?;
                validate_delta(*delta, limits)
            }
            Payload::PlaceEntity { position, .. } if *position > limits.max_position => {
                Err(ValidationError::PositionOutOfRange {
                    position: *position,
                    max: limits.max_position,
                })
            }
            _ => Ok(()),
        }
    }
}

fn validate_name(name: &str, limits: &Limits) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > limits.max_name_len || name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn validate_delta(delta: i64, limits: &Limits) -> Result<(), ValidationError> {
    if delta == 0 {
        return Err(ValidationError::ZeroDelta);
    }
    if delta.unsigned_abs() > limits.max_abs_delta {
        return Err(ValidationError::DeltaOutOfRange {
            delta,
            max: limits.max_abs_delta,
        });
    }
    Ok(())
}
