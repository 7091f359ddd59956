use crate::clock::ActorId;
use crate::operation::{EntityId, OpKind};
use crate::stamp::OpId;
use thiserror::Error;

/// Reasons an operation is refused before it enters the transformation pipeline.
///
/// Rejections are local only: the operation is discarded, never applied and
/// never re-broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed operation: {0}")]
    Malformed(String),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),

    #[error("operation {id} is attributed to actor {actor}")]
    ForeignId { id: OpId, actor: ActorId },

    #[error("causal snapshot of {id} does not record its own sequence number")]
    SnapshotMismatch { id: OpId },

    #[error("operation {0} has an empty target")]
    EmptyTarget(OpId),

    #[error("{kind} cannot target entity {target}")]
    WrongTarget { kind: OpKind, target: EntityId },

    #[error("{name:?} is not a valid counter or field name")]
    InvalidName { name: String },

    #[error("delta must be non-zero")]
    ZeroDelta,

    #[error("delta {delta} is outside of the allowed range ±{max}")]
    DeltaOutOfRange { delta: i64, max: u64 },

    #[error("position {position} exceeds the largest slot {max}")]
    PositionOutOfRange { position: u32, max: u32 },

    #[error("operation {0} is a transformed form and cannot be issued or received")]
    NotIssuable(OpId),

    #[error("actor {0} is not a member of this session")]
    UnknownActor(ActorId),
}

/// A (kind, kind) pair with no conflict-resolution function.
///
/// Raised while constructing an engine, never at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no transform registered for incoming {incoming} against applied {applied}")]
pub struct UnregisteredTransformError {
    pub incoming: OpKind,
    pub applied: OpKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("session has no members")]
    NoMembers,

    #[error("local actor {0} is not a member of the session")]
    LocalActorNotMember(ActorId),

    #[error("limit {name} must be positive")]
    ZeroLimit { name: &'static str },

    #[error("max_position {0} leaves no room for displaced placements")]
    PositionLimitTooLarge(u32),
}

/// Fatal errors from engine construction; the session must not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    UnregisteredTransform(#[from] UnregisteredTransformError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
