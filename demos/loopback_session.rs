//! Three sessions kept in sync through the in-process loopback hub.
//!
//! The game master's session is the persistence authority; two players edit
//! concurrently, one of them while briefly offline, and everyone converges.
//!
//! Run with: cargo run --example loopback_session

use std::collections::BTreeSet;
use std::sync::Arc;

use session_sync::command::{CharacterCommand, CrewCommand};
use session_sync::persistence::MemorySettings;
use session_sync::session::{RefreshNotifier, SessionOptions, SharedSession, SyncSession};
use session_sync::sync::LoopbackHub;
use session_sync::types::EntityId;

struct PrintRefresh(&'static str);

impl RefreshNotifier for PrintRefresh {
    fn refresh(&self, entity_ids: &BTreeSet<EntityId>) {
        println!("  [{}] refresh {:?}", self.0, entity_ids);
    }
}

fn join(hub: &LoopbackHub, id: &'static str, privileged: bool) -> Result<SharedSession, Box<dyn std::error::Error>> {
    let options = SessionOptions::new(id).label(id).privileged(privileged);
    let (session, _) = SyncSession::start(
        Arc::new(hub.connect(id)),
        Arc::new(MemorySettings::new()),
        options,
    )?;
    Ok(session.with_notifier(Arc::new(PrintRefresh(id))).into_shared())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    println!("=== Loopback Session ===\n");

    let hub = LoopbackHub::new();
    let gm = join(&hub, "gm", true)?;
    let alice = join(&hub, "alice", false)?;
    let bob = join(&hub, "bob", false)?;

    println!("GM creates the crew:");
    gm.lock().execute(CrewCommand::Create {
        id: "crew-1".into(),
        name: "The Dimmer Sisters".into(),
    })?;

    println!("\nAlice and Bob create their characters:");
    alice.lock().execute(CharacterCommand::Create {
        id: "alice-pc".into(),
        name: "Nyryx".into(),
        playbook: "Whisper".into(),
    })?;
    bob.lock().execute(CharacterCommand::Create {
        id: "bob-pc".into(),
        name: "Crow".into(),
        playbook: "Slide".into(),
    })?;

    println!("\nBob drops off the network and earns coin anyway:");
    hub.set_offline("bob", true);
    let report = bob.lock().execute(CrewCommand::AdjustCoin { id: "crew-1".into(), delta: 2 })?;
    println!("  broadcast failures: {}", report.failures.len());
    alice.lock().execute(CrewCommand::AdjustCoin { id: "crew-1".into(), delta: 3 })?;

    println!("\nBob reconnects and flushes:");
    hub.set_offline("bob", false);
    let flushed = bob.lock().flush();
    println!("  re-sent {} command(s)", flushed.broadcast);

    println!();
    for (name, session) in [("gm", &gm), ("alice", &alice), ("bob", &bob)] {
        let session = session.lock();
        println!(
            "{:<6} coin={} characters={} commands={}",
            name,
            session.state().crews["crew-1"].coin,
            session.state().characters.len(),
            session.replica().history().total_len()
        );
    }
    Ok(())
}
