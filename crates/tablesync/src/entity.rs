use crate::clock::{ActorId, CausalClock, ClockOrdering};
use crate::operation::Zone;
use crate::stamp::{ConflictPolicy, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where an entity sits: zone, requested slot and (for hands) whose hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub zone: Zone,

    /// Requested slot; `None` means "append" (moves and draws)
    pub slot: Option<u32>,

    pub holder: Option<ActorId>,
}

impl Placement {
    pub fn in_zone(zone: Zone) -> Self {
        Placement {
            zone,
            slot: None,
            holder: None,
        }
    }

    pub fn at(zone: Zone, slot: u32) -> Self {
        Placement {
            zone,
            slot: Some(slot),
            holder: None,
        }
    }
}

impl Default for Placement {
    fn default() -> Self {
        Placement::in_zone(Zone::Library)
    }
}

/// One write to a register, with the causal context it was issued in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim<V> {
    pub stamp: Stamp,
    pub clock: CausalClock,
    pub value: V,
}

/// Register attribute.
///
/// Keeps every causally-maximal claim (its heads) and exposes the one the
/// conflict policy prefers. The exposed value is a function of the set of
/// claims only, so replicas agree whatever order the claims arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register<V> {
    policy: ConflictPolicy,
    initial: V,
    heads: Vec<Claim<V>>,
}

impl<V: Clone> Register<V> {
    pub fn new(policy: ConflictPolicy, initial: V) -> Self {
        Register {
            policy,
            initial,
            heads: Vec::new(),
        }
    }

    /// Record a claim; heads it causally follows stop competing.
    ///
    /// Claims must arrive in causal order, which the engine guarantees.
    pub fn observe(&mut self, claim: Claim<V>) {
        self.heads
            .retain(|head| head.clock.compare(&claim.clock) != ClockOrdering::Before);
        self.heads.push(claim);
        self.heads.sort_by_key(|head| head.stamp.id);
    }

    pub fn winner(&self) -> Option<&Claim<V>> {
        self.heads.iter().reduce(|best, head| {
            if self.policy.prefers(&head.stamp, &best.stamp) {
                head
            } else {
                best
            }
        })
    }

    pub fn value(&self) -> &V {
        self.winner().map_or(&self.initial, |claim| &claim.value)
    }

    pub fn heads(&self) -> &[Claim<V>] {
        &self.heads
    }

    /// More than one concurrent write is still competing
    pub fn is_conflicted(&self) -> bool {
        self.heads.len() > 1
    }
}

/// Mutable unit of the shared graph (card, token, player seat).
///
/// The engine only moves it and mutates its attributes; whether a mutation
/// is legal is a rules-engine concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    placement: Register<Placement>,
    face_up: Register<bool>,
    tapped: Register<bool>,
    counters: BTreeMap<String, i64>,
    scalars: BTreeMap<String, i64>,
}

impl Entity {
    pub fn new(placement: Placement) -> Self {
        Entity {
            placement: Register::new(ConflictPolicy::LowestActor, placement),
            face_up: Register::new(ConflictPolicy::LatestIssued, false),
            tapped: Register::new(ConflictPolicy::LatestIssued, false),
            counters: BTreeMap::new(),
            scalars: BTreeMap::new(),
        }
    }

    pub fn placement(&self) -> &Placement {
        self.placement.value()
    }

    /// Stamp of the write that decided the current placement
    pub fn placed_by(&self) -> Option<Stamp> {
        self.placement.winner().map(|claim| claim.stamp)
    }

    pub fn is_face_up(&self) -> bool {
        *self.face_up.value()
    }

    pub fn is_tapped(&self) -> bool {
        *self.tapped.value()
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn scalar(&self, name: &str) -> i64 {
        self.scalars.get(name).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> &BTreeMap<String, i64> {
        &self.counters
    }

    pub fn scalars(&self) -> &BTreeMap<String, i64> {
        &self.scalars
    }

    pub fn has_placement_conflict(&self) -> bool {
        self.placement.is_conflicted()
    }

    pub(crate) fn claim_placement(&mut self, claim: Claim<Placement>) {
        self.placement.observe(claim);
    }

    pub(crate) fn claim_face(&mut self, claim: Claim<bool>) {
        self.face_up.observe(claim);
    }

    pub(crate) fn claim_tap(&mut self, claim: Claim<bool>) {
        self.tapped.observe(claim);
    }

    // Wrapping keeps addition associative at the bounds
    pub(crate) fn adjust_counter(&mut self, name: &str, delta: i64) {
        let value = self.counters.entry(name.to_string()).or_insert(0);
        *value = value.wrapping_add(delta);
    }

    pub(crate) fn adjust_scalar(&mut self, name: &str, delta: i64) {
        let value = self.scalars.entry(name.to_string()).or_insert(0);
        *value = value.wrapping_add(delta);
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::new(Placement::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::OpId;

    fn claim<V>(actor: u32, clock: &[(u32, u64)], issued_at: u64, value: V) -> Claim<V> {
        let clock: CausalClock = clock.iter().map(|&(a, c)| (ActorId(a), c)).collect();
        let id = OpId::new(ActorId(actor), clock.get(ActorId(actor)));
        Claim {
            stamp: Stamp::new(id, issued_at, clock.depth()),
            clock,
            value,
        }
    }

    #[test]
    fn test_register_initial_value() {
        let register: Register<Zone> = Register::new(ConflictPolicy::LowestActor, Zone::Library);
        assert_eq!(register.value(), &Zone::Library);
        assert!(register.winner().is_none());
    }

    #[test]
    fn test_causal_successor_replaces_head() {
        let mut register = Register::new(ConflictPolicy::LowestActor, Zone::Library);
        register.observe(claim(1, &[(1, 1)], 0, Zone::Hand));
        register.observe(claim(2, &[(1, 1), (2, 1)], 0, Zone::Graveyard));

        // actor 2 saw actor 1's write, so it simply overwrites it
        assert_eq!(register.value(), &Zone::Graveyard);
        assert!(!register.is_conflicted());
    }

    #[test]
    fn test_concurrent_heads_resolve_by_policy_in_any_order() {
        let a = claim(1, &[(1, 1)], 10, Zone::Battlefield);
        let b = claim(2, &[(2, 1)], 20, Zone::Graveyard);

        let mut forward = Register::new(ConflictPolicy::LowestActor, Zone::Library);
        forward.observe(a.clone());
        forward.observe(b.clone());

        let mut backward = Register::new(ConflictPolicy::LowestActor, Zone::Library);
        backward.observe(b.clone());
        backward.observe(a.clone());

        assert_eq!(forward, backward);
        assert_eq!(forward.value(), &Zone::Battlefield);
        assert!(forward.is_conflicted());

        let mut latest = Register::new(ConflictPolicy::LatestIssued, Zone::Library);
        latest.observe(a);
        latest.observe(b);
        assert_eq!(latest.value(), &Zone::Graveyard);
    }

    #[test]
    fn test_superseded_head_stops_competing() {
        // a(1) -> c(3) causally; b(2) concurrent with both
        let a = claim(1, &[(1, 1)], 0, Zone::Battlefield);
        let b = claim(2, &[(2, 1)], 0, Zone::Graveyard);
        let c = claim(3, &[(1, 1), (3, 1)], 0, Zone::Exile);

        let orders = [
            vec![a.clone(), b.clone(), c.clone()],
            vec![b.clone(), a.clone(), c.clone()],
            vec![a.clone(), c.clone(), b.clone()],
        ];
        for order in orders {
            let mut register = Register::new(ConflictPolicy::LowestActor, Zone::Library);
            for claim in order {
                register.observe(claim);
            }
            assert_eq!(register.value(), &Zone::Graveyard);
            assert_eq!(register.heads().len(), 2);
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let mut entity = Entity::default();
        entity.adjust_counter("+1/+1", 1);
        entity.adjust_counter("+1/+1", 2);
        entity.adjust_scalar("life", -3);

        assert_eq!(entity.counter("+1/+1"), 3);
        assert_eq!(entity.counter("missing"), 0);
        assert_eq!(entity.scalar("life"), -3);
        assert_eq!(entity.placement().zone, Zone::Library);
        assert!(!entity.is_tapped());
        assert!(!entity.is_face_up());
    }
}
