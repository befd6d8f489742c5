//! Walkthrough of the clock rules on a single replica.
//!
//! Shows the harm cap replacing the least-filled label, the addiction
//! singleton, and consumables freezing and thawing together.
//!
//! Run with: cargo run --example clock_rules

use session_sync::clock::{Clock, ClockRequest, ClockType, Rarity};
use session_sync::command::{CharacterCommand, ClockCommand, CrewCommand};
use session_sync::sync::Replica;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Clock Rules ===\n");

    let mut replica = Replica::new(Some("gm".into()));
    replica.execute(CharacterCommand::Create {
        id: "e1".into(),
        name: "Arlyn".into(),
        playbook: "Cutter".into(),
    })?;
    replica.execute(CrewCommand::Create {
        id: "crew-1".into(),
        name: "Red Sashes".into(),
    })?;

    harm_cap(&mut replica)?;
    println!();
    addiction_singleton(&mut replica);
    println!();
    consumable_freezing(&mut replica)?;
    Ok(())
}

fn print_clocks(replica: &Replica, clock_type: ClockType) {
    let mut clocks: Vec<&Clock> = replica
        .state()
        .clocks
        .values()
        .filter(|c| c.clock_type == clock_type)
        .collect();
    clocks.sort_by_key(|c| c.created_at);
    for clock in clocks {
        println!(
            "  {:<16} {}/{}{}",
            clock.subtype,
            clock.segments,
            clock.max_segments,
            if clock.metadata.frozen { " (frozen)" } else { "" }
        );
    }
}

fn harm_cap(replica: &mut Replica) -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Harm cap ---");
    for (label, segments) in [("Broken Arm", 2), ("Stabbed", 5), ("Bruised", 1)] {
        replica.create_clock(ClockRequest::harm("e1", label).with_segments(segments))?;
    }
    print_clocks(replica, ClockType::Harm);

    println!("Arlyn takes a fourth harm, \"Fire\":");
    let change = replica.create_clock(ClockRequest::harm("e1", "Fire"))?;
    println!("  logged as {}", change.commands[0].type_name());
    print_clocks(replica, ClockType::Harm);
    Ok(())
}

fn addiction_singleton(replica: &mut Replica) {
    println!("--- Addiction singleton ---");
    let first = replica.create_clock(ClockRequest::addiction("e1", "Weird"));
    let second = replica.create_clock(ClockRequest::addiction("e1", "Gambling"));
    println!("  first:  {}", if first.is_ok() { "created" } else { "rejected" });
    match second {
        Ok(_) => println!("  second: created"),
        Err(e) => println!("  second: rejected ({})", e),
    }
}

fn consumable_freezing(replica: &mut Replica) -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Consumables ---");
    let request = ClockRequest::consumable("crew-1", "Frag Grenades", Rarity::Uncommon);
    let first = replica.create_clock(request.clone().with_segments(5))?;
    replica.create_clock(request.with_segments(3))?;
    let id = first.primary_id().cloned().ok_or("clock was not created")?;
    print_clocks(replica, ClockType::Consumable);

    println!("The first stash runs dry:");
    let change = replica.execute(ClockCommand::AddSegments { id: id.clone(), amount: 3 })?;
    for command in &change.commands {
        println!("  logged {}", command.type_name());
    }
    print_clocks(replica, ClockType::Consumable);

    println!("The crew restocks the first stash:");
    replica.execute(ClockCommand::ClearSegments { id, amount: 4 })?;
    print_clocks(replica, ClockType::Consumable);
    Ok(())
}
