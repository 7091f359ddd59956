// Shared helpers for the integration tests: a simulated network of replicas
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::Rng;
use tablesync::{
    wire, ActorId, Engine, EngineConfig, EngineOutcome, EntityId, FaceState, Payload, Phase,
    Placement, Table, Zone,
};

pub const CARDS: usize = 12;

pub fn card(i: usize) -> EntityId {
    EntityId::new(format!("card-{}", i))
}

/// Starting table shared by every replica: a library of cards in slot order
pub fn seed_table() -> Table {
    let mut table = Table::new(ActorId(1));
    for i in 0..CARDS {
        table.seed(card(i), Placement::at(Zone::Library, i as u32));
    }
    table
}

#[derive(Clone)]
pub struct Frame {
    pub from: usize,
    pub to: usize,
    pub bytes: Vec<u8>,
}

/// Replicas plus the frames still travelling between them.
/// Replica `i` runs as actor `i + 1`.
pub struct Network {
    pub replicas: Vec<Engine>,
    pub in_flight: Vec<Frame>,
}

impl Network {
    pub fn new(num_replicas: usize) -> Self {
        let members: Vec<ActorId> = (1..=num_replicas as u32).map(ActorId).collect();
        let replicas = members
            .iter()
            .map(|&actor| {
                let config = EngineConfig::new(actor, members.clone());
                Engine::standard(config, seed_table()).unwrap()
            })
            .collect();

        Network {
            replicas,
            in_flight: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Issue locally and queue one frame per other replica
    pub fn issue(
        &mut self,
        replica: usize,
        target: impl Into<EntityId>,
        payload: Payload,
    ) -> tablesync::Operation {
        let op = self.replicas[replica].issue(target, payload).unwrap();
        let bytes = wire::encode(&op).unwrap();

        for to in 0..self.replicas.len() {
            if to != replica {
                self.in_flight.push(Frame {
                    from: replica,
                    to,
                    bytes: bytes.clone(),
                });
            }
        }
        op
    }

    /// Deliver every queued frame addressed to `to`, in queue order
    pub fn deliver(&mut self, to: usize) -> Vec<EngineOutcome> {
        let (mine, rest): (Vec<Frame>, Vec<Frame>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|frame| frame.to == to);
        self.in_flight = rest;

        mine.iter()
            .map(|frame| self.replicas[to].receive(&frame.bytes))
            .collect()
    }

    pub fn deliver_all(&mut self) {
        for to in 0..self.replicas.len() {
            self.deliver(to);
        }
    }

    /// Deliver up to `count` random frames; a delivered frame is queued again
    /// with probability `duplicate_rate`. Returns the Duplicate outcomes seen.
    pub fn deliver_random(&mut self, rng: &mut StdRng, count: usize, duplicate_rate: f64) -> usize {
        let mut duplicates = 0;
        for _ in 0..count {
            if self.in_flight.is_empty() {
                break;
            }
            let index = rng.gen_range(0..self.in_flight.len());
            let frame = self.in_flight.swap_remove(index);
            if rng.gen_bool(duplicate_rate) {
                self.in_flight.push(frame.clone());
            }
            if self.replicas[frame.to].receive(&frame.bytes) == EngineOutcome::Duplicate {
                duplicates += 1;
            }
        }
        duplicates
    }

    pub fn flush_random(&mut self, rng: &mut StdRng, duplicate_rate: f64) -> usize {
        let mut duplicates = 0;
        while !self.in_flight.is_empty() {
            duplicates += self.deliver_random(rng, self.in_flight.len(), duplicate_rate);
        }
        duplicates
    }

    pub fn snapshots(&self) -> Vec<Vec<u8>> {
        self.replicas
            .iter()
            .map(|replica| replica.snapshot().to_bytes().unwrap())
            .collect()
    }

    pub fn check_convergence(&self) -> bool {
        let snapshots = self.snapshots();
        snapshots.iter().all(|snapshot| snapshot == &snapshots[0])
    }

    pub fn print_states(&self) {
        for replica in &self.replicas {
            let snapshot = replica.snapshot();
            println!(
                "  Actor {}: phase {:?}, active {}, {} entities, {} removed, clock {}",
                replica.actor(),
                snapshot.phase,
                snapshot.active_actor,
                snapshot.entities.len(),
                snapshot.tombstones.len(),
                replica.clock()
            );
        }
    }
}

fn random_zone(rng: &mut StdRng) -> Zone {
    Zone::ALL[rng.gen_range(0..Zone::ALL.len())]
}

fn random_delta(rng: &mut StdRng) -> i64 {
    let magnitude = rng.gen_range(1..=5);
    if rng.gen_bool(0.5) {
        -magnitude
    } else {
        magnitude
    }
}

/// Random valid operation for a session of `members` actors
pub fn random_operation(rng: &mut StdRng, members: usize) -> (EntityId, Payload) {
    let target = card(rng.gen_range(0..CARDS));
    let roll = rng.gen_range(0..100);

    match roll {
        0..=19 => (
            target,
            Payload::MoveEntity {
                from_zone: random_zone(rng),
                to_zone: random_zone(rng),
            },
        ),
        20..=34 => {
            let states = [
                FaceState::FaceUp,
                FaceState::FaceDown,
                FaceState::Tapped,
                FaceState::Untapped,
            ];
            (
                target,
                Payload::ToggleState {
                    desired_state: states[rng.gen_range(0..states.len())],
                },
            )
        }
        35..=44 => (
            target,
            Payload::DrawFromSource {
                source_zone: Zone::Library,
            },
        ),
        45..=54 => {
            // sometimes a fresh token instead of a seeded card
            let target = if rng.gen_bool(0.3) {
                EntityId::new(format!("token-{}", rng.gen_range(0..4)))
            } else {
                target
            };
            (
                target,
                Payload::PlaceEntity {
                    zone: Zone::Battlefield,
                    position: rng.gen_range(0..8),
                },
            )
        }
        55..=69 => {
            let names = ["+1/+1", "charge", "loyalty"];
            (
                target,
                Payload::AdjustCounter {
                    counter_name: names[rng.gen_range(0..names.len())].to_string(),
                    delta: random_delta(rng),
                },
            )
        }
        70..=79 => {
            let fields = ["life", "poison"];
            (
                target,
                Payload::AdjustScalar {
                    field_name: fields[rng.gen_range(0..fields.len())].to_string(),
                    delta: random_delta(rng),
                },
            )
        }
        80..=88 => (
            EntityId::table(),
            Payload::ChangePhase {
                new_phase: Phase::ALL[rng.gen_range(0..Phase::ALL.len())],
            },
        ),
        89..=97 => (
            EntityId::table(),
            Payload::EndTurn {
                next_actor_id: ActorId(rng.gen_range(1..=members as u32)),
            },
        ),
        _ => (target, Payload::RemoveEntity),
    }
}
