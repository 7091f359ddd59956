use crate::clock::ActorId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Globally unique operation identifier: issuing actor plus that actor's own
/// counter in the operation's causal snapshot.
///
/// Ordered by (actor, seq), which is the deterministic fold order used when an
/// incoming operation is transformed against its concurrent operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub actor: ActorId,
    pub seq: u64,
}

impl OpId {
    pub fn new(actor: ActorId, seq: u64) -> Self {
        OpId { actor, seq }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.seq)
    }
}

/// Stamp: the fields of an operation that take part in conflict resolution
///
/// Fields:
/// - id: operation id (actor + own sequence number)
/// - issued_at: wall-clock hint in milliseconds, tie-break only
/// - depth: sum of the causal snapshot, strictly increasing along causal paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub id: OpId,
    pub issued_at: u64,
    pub depth: u64,
}

impl Stamp {
    pub fn new(id: OpId, issued_at: u64, depth: u64) -> Self {
        Stamp {
            id,
            issued_at,
            depth,
        }
    }

    /// Placement order: (depth, actor, seq).
    ///
    /// If `self` causally precedes `other` its depth is strictly smaller, so this
    /// total order never contradicts causality.
    pub fn precedes(&self, other: &Stamp) -> bool {
        if self.depth != other.depth {
            return self.depth < other.depth;
        }
        self.id < other.id
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.precedes(other) {
            Ordering::Less
        } else if other.precedes(self) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Deterministic rule deciding which of two concurrent writes to the same
/// attribute survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Lower actor id wins (structural writes: placement, turn handover)
    LowestActor,
    /// Later `issued_at` wins, ties go to the lower actor id
    LatestIssued,
}

impl ConflictPolicy {
    /// Whether `challenger` beats `holder`. Total and antisymmetric for distinct ids.
    pub fn prefers(self, challenger: &Stamp, holder: &Stamp) -> bool {
        match self {
            ConflictPolicy::LowestActor => challenger.id < holder.id,
            ConflictPolicy::LatestIssued => match challenger.issued_at.cmp(&holder.issued_at) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => challenger.id < holder.id,
            },
        }
    }

    pub fn winner<'a>(self, a: &'a Stamp, b: &'a Stamp) -> &'a Stamp {
        if self.prefers(b, a) {
            b
        } else {
            a
        }
    }
}
