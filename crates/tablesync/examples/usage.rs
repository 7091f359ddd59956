// Example usage of the synchronization engine
// Two players share a table and issue conflicting operations concurrently

use tablesync::{
    wire, ActorId, Engine, EngineConfig, EngineOutcome, EntityId, FaceState, Operation, Payload,
    Placement, Table, Zone,
};

fn main() {
    println!("=== Shared Table Example ===\n");

    // Example 1: Concurrent moves of the same card
    example_concurrent_moves();

    // Example 2: Counters from two players add up
    example_counters();

    // Example 3: A card leaves the table
    example_removal();
}

fn table() -> Table {
    Table::new(ActorId(1))
        .with_entity("card-7", Placement::in_zone(Zone::Hand))
        .with_entity("card-3", Placement::at(Zone::Battlefield, 0))
}

fn players() -> (Engine, Engine) {
    let members = [ActorId(1), ActorId(2)];
    let alice = Engine::standard(EngineConfig::new(ActorId(1), members), table()).unwrap();
    let bob = Engine::standard(EngineConfig::new(ActorId(2), members), table()).unwrap();
    (alice, bob)
}

fn exchange(to: &mut Engine, op: &Operation) -> EngineOutcome {
    let frame = wire::encode(op).unwrap();
    to.receive(&frame)
}

fn example_concurrent_moves() {
    println!("Example 1: Concurrent Moves");
    println!("===========================");

    let (mut alice, mut bob) = players();

    let alice_op = alice
        .issue(
            "card-7",
            Payload::MoveEntity {
                from_zone: Zone::Hand,
                to_zone: Zone::Battlefield,
            },
        )
        .unwrap();
    let bob_op = bob
        .issue(
            "card-7",
            Payload::MoveEntity {
                from_zone: Zone::Hand,
                to_zone: Zone::Graveyard,
            },
        )
        .unwrap();

    println!("Alice receives Bob's move: {:?}", exchange(&mut alice, &bob_op));
    println!("Bob receives Alice's move: {:?}", exchange(&mut bob, &alice_op));

    println!("Alice: {:?}", alice.snapshot().entities);
    println!("Bob:   {:?}", bob.snapshot().entities);
    println!("Converged: {}\n", alice.snapshot() == bob.snapshot());
}

fn example_counters() {
    println!("Example 2: Concurrent Counters");
    println!("==============================");

    let (mut alice, mut bob) = players();
    let adjust = |delta| Payload::AdjustCounter {
        counter_name: "+1/+1".to_string(),
        delta,
    };

    let alice_op = alice.issue("card-3", adjust(1)).unwrap();
    let bob_op = bob.issue("card-3", adjust(2)).unwrap();
    exchange(&mut alice, &bob_op);
    exchange(&mut bob, &alice_op);

    let snapshot = alice.snapshot();
    println!("card-3 counters: {:?}", snapshot.entities[&EntityId::new("card-3")].counters);
    println!("Converged: {}\n", snapshot == bob.snapshot());
}

fn example_removal() {
    println!("Example 3: Removal");
    println!("==================");

    let (mut alice, mut bob) = players();

    let removal = alice.issue("card-3", Payload::RemoveEntity).unwrap();
    let tap = bob
        .issue(
            "card-3",
            Payload::ToggleState {
                desired_state: FaceState::Tapped,
            },
        )
        .unwrap();

    println!("Alice receives Bob's tap: {:?}", exchange(&mut alice, &tap));
    println!("Bob receives the removal: {:?}", exchange(&mut bob, &removal));
    println!("Tombstones: {:?}", alice.snapshot().tombstones);
    println!("Diagnostics: {:?}", alice.diagnostics());
    println!("Converged: {}\n", alice.snapshot() == bob.snapshot());
}
