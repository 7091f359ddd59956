use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a session participant.
///
/// Ids are totally ordered; "lower actor wins" tie-breaks use this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of comparing two causal clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Before,
    After,
    Equal,
    Concurrent,
}

/// Per-actor logical clock (vector clock).
///
/// Backed by an ordered map so that comparison, merge and serialization never
/// depend on hash iteration order. Actors missing from the map count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CausalClock(BTreeMap<ActorId, u64>);

impl CausalClock {
    pub fn new() -> Self {
        CausalClock(BTreeMap::new())
    }

    /// Counter recorded for `actor` (zero when absent)
    pub fn get(&self, actor: ActorId) -> u64 {
        self.0.get(&actor).copied().unwrap_or(0)
    }

    /// Bump the counter of `actor` in place and return its new value
    pub fn increment(&mut self, actor: ActorId) -> u64 {
        let counter = self.0.entry(actor).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Copy of this clock with `actor`'s counter bumped by one
    pub fn incremented(&self, actor: ActorId) -> CausalClock {
        let mut next = self.clone();
        next.increment(actor);
        next
    }

    /// Pointwise maximum. Commutative, associative and idempotent.
    pub fn merge(&self, other: &CausalClock) -> CausalClock {
        let mut merged = self.clone();
        merged.absorb(other);
        merged
    }

    /// In-place pointwise maximum
    pub fn absorb(&mut self, other: &CausalClock) {
        for (&actor, &count) in &other.0 {
            let slot = self.0.entry(actor).or_insert(0);
            *slot = (*slot).max(count);
        }
    }

    /// Pointwise minimum over the union of actors.
    ///
    /// Used to compute the stability frontier: everything at or below the meet
    /// of all members' clocks has been seen by every member.
    pub fn meet(&self, other: &CausalClock) -> CausalClock {
        let mut met = BTreeMap::new();
        for (&actor, &count) in &self.0 {
            let low = count.min(other.get(actor));
            if low > 0 {
                met.insert(actor, low);
            }
        }
        CausalClock(met)
    }

    /// Sum of all counters; strictly grows along every causal path
    pub fn depth(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn compare(&self, other: &CausalClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        for actor in self.0.keys().chain(other.0.keys()) {
            let mine = self.get(*actor);
            let theirs = other.get(*actor);
            if mine < theirs {
                less = true;
            } else if mine > theirs {
                greater = true;
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// `self` happened before or is equal to `other`
    pub fn dominated_by(&self, other: &CausalClock) -> bool {
        matches!(
            self.compare(other),
            ClockOrdering::Before | ClockOrdering::Equal
        )
    }

    pub fn is_concurrent_with(&self, other: &CausalClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorId, u64)> + '_ {
        self.0.iter().map(|(&actor, &count)| (actor, count))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ActorId, u64)> for CausalClock {
    fn from_iter<I: IntoIterator<Item = (ActorId, u64)>>(iter: I) -> Self {
        CausalClock(iter.into_iter().collect())
    }
}

impl fmt::Display for CausalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (actor, count)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{actor}:{count}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(u32, u64)]) -> CausalClock {
        entries.iter().map(|&(a, c)| (ActorId(a), c)).collect()
    }

    #[test]
    fn test_compare_all_orderings() {
        let a = clock(&[(1, 1)]);
        let b = clock(&[(1, 1), (2, 1)]);
        let c = clock(&[(2, 1)]);

        assert_eq!(a.compare(&b), ClockOrdering::Before);
        assert_eq!(b.compare(&a), ClockOrdering::After);
        assert_eq!(a.compare(&a.clone()), ClockOrdering::Equal);
        assert_eq!(a.compare(&c), ClockOrdering::Concurrent);
        assert_eq!(c.compare(&a), ClockOrdering::Concurrent);
    }

    #[test]
    fn test_missing_entries_count_as_zero() {
        let empty = CausalClock::new();
        let zeroed = clock(&[(3, 0)]);
        assert_eq!(empty.compare(&zeroed), ClockOrdering::Equal);
        assert_eq!(empty.compare(&clock(&[(3, 2)])), ClockOrdering::Before);
    }

    #[test]
    fn test_compare_independent_of_insertion_order() {
        let mut forward = CausalClock::new();
        for actor in 1..=5 {
            forward.increment(ActorId(actor));
        }
        let mut backward = CausalClock::new();
        for actor in (1..=5).rev() {
            backward.increment(ActorId(actor));
        }

        assert_eq!(forward, backward);
        assert_eq!(forward.compare(&backward), ClockOrdering::Equal);
        assert_eq!(forward.to_string(), backward.to_string());
    }

    #[test]
    fn test_merge_is_commutative_and_idempotent() {
        let a = clock(&[(1, 3), (2, 1)]);
        let b = clock(&[(2, 4), (3, 2)]);

        let ab = a.merge(&b);
        let ba = b.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab, clock(&[(1, 3), (2, 4), (3, 2)]));
        assert_eq!(ab.merge(&ab), ab);
        assert_eq!(ab.merge(&a), ab);
    }

    #[test]
    fn test_increment_and_depth() {
        let base = clock(&[(1, 2)]);
        let next = base.incremented(ActorId(2));

        assert_eq!(base.get(ActorId(2)), 0);
        assert_eq!(next.get(ActorId(2)), 1);
        assert_eq!(next.depth(), base.depth() + 1);
        assert_eq!(base.compare(&next), ClockOrdering::Before);
    }

    #[test]
    fn test_meet_is_pointwise_minimum() {
        let a = clock(&[(1, 3), (2, 5)]);
        let b = clock(&[(1, 4), (2, 2), (3, 7)]);

        assert_eq!(a.meet(&b), clock(&[(1, 3), (2, 2)]));
        assert!(a.meet(&b).dominated_by(&a));
        assert!(a.meet(&b).dominated_by(&b));
    }

    #[test]
    fn test_serialization_uses_actor_keys() {
        let a = clock(&[(2, 1), (1, 4)]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, r#"{"1":4,"2":1}"#);

        let back: CausalClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
