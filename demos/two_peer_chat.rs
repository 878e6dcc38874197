//! Two peers exchanging DATA messages through one mesh node

use peermesh::Peer;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> peermesh::Result<()> {
    env_logger::init();

    println!("peermesh - two peer chat demo");

    // The hub listens; the other two peers dial in.
    let hub = Peer::new();
    hub.start_server(40800, 16).await?;

    let alice = Peer::new();
    alice.connect_to("127.0.0.1", 40800).await?;

    let bob = Peer::new();
    bob.connect_to("127.0.0.1", 40800).await?;

    sleep(Duration::from_millis(300)).await;
    println!("Hub has {} connections", hub.connection_count().await);

    // The hub relays this to every other member as "Peer <id> says: ...".
    alice.broadcast_message("hello from alice").await?;

    sleep(Duration::from_millis(300)).await;
    println!("{}", hub.metrics_summary());

    hub.stop_server().await;
    Ok(())
}
