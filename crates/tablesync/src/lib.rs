// Concurrent state synchronization for a shared game table
// Vector clocks for causal order, operational transformation for concurrent
// writes, registers and sums for an order-independent entity graph.

pub mod clock;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod operation;
pub mod stamp;
pub mod table;
pub mod tombstone;
pub mod transform;
pub mod wire;

pub use {
    clock::{ActorId, CausalClock, ClockOrdering},
    config::{EngineConfig, Limits},
    engine::{ApplyStatus, Delivery, Diagnostics, Engine, EngineOutcome},
    entity::{Entity, Placement},
    error::{ConfigError, EngineError, UnregisteredTransformError, ValidationError},
    operation::{EntityId, FaceState, OpKind, Operation, Payload, Phase, Zone},
    stamp::{ConflictPolicy, OpId, Stamp},
    table::{EntityView, Table, TableSnapshot},
    tombstone::TombstoneRegistry,
    transform::{TransformFn, TransformRegistry, TransformTable},
};
