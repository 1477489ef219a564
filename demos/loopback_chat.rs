//! Two messengers talking over loopback.
//!
//! Both instances share one key. `bob` listens on an ephemeral port and
//! `alice` is pointed at it, then sends a text, a file, and a message that
//! has to wait in the retry queue.

use lan_messenger::{
    crypto::SecureTransport,
    utils::{MessengerConfig, ProcMeminfo},
    AppEvent, Messenger, Peer,
};
use std::time::Duration;
use tokio::sync::mpsc;

fn loopback_config(key: &str, received_dir: std::path::PathBuf) -> MessengerConfig {
    let mut config = MessengerConfig::default();
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.broadcast_address = "127.0.0.1".to_string();
    config.network.discovery_port = 0;
    config.network.message_port = 0;
    config.crypto.shared_key = Some(key.to_string());
    config.storage.received_dir = received_dir;
    config
}

async fn show_events(name: &str, events: &mut mpsc::UnboundedReceiver<AppEvent>) {
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(300), events.recv()).await {
        println!("[{name}] {event:?}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let key = SecureTransport::generate().key_hex();
    let workdir = std::env::temp_dir().join("lan-messenger-demo");

    let (bob, mut bob_events) = Messenger::new(loopback_config(&key, workdir.join("bob")))?;
    let bob_addrs = bob.start().await?;

    let mut alice_config = loopback_config(&key, workdir.join("alice"));
    alice_config.network.message_port = bob_addrs.message.port();
    let (alice, mut alice_events) = Messenger::new(alice_config)?;

    println!("alice = {}, bob = {}", alice.id(), bob.id());

    // Nobody known yet: the message is parked
    println!("alice: {}", alice.send_text("is anyone out there?").await?);

    alice.registry().upsert(Peer::new(bob.id(), "127.0.0.1")).await;
    println!("alice: {}", alice.send_text("hi bob").await?);

    let note = workdir.join("note.txt");
    std::fs::create_dir_all(&workdir)?;
    std::fs::write(&note, "see you at the standup")?;
    println!("alice: {}", alice.send_file(&note, &ProcMeminfo::new()).await?);

    show_events("bob", &mut bob_events).await;
    show_events("alice", &mut alice_events).await;

    println!("\nalice {}", alice.network_status().await);
    println!("{}", alice.statistics().await);
    println!("queued: {}", alice.queued().await);
    println!("\nbob {}", bob.network_status().await);
    println!("{}", bob.statistics().await);

    bob.shutdown().await;
    alice.shutdown().await;
    Ok(())
}
