//! Store a value on one DHT node and retrieve it from another

use peermesh::Peer;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> peermesh::Result<()> {
    env_logger::init();

    println!("peermesh - DHT put/get demo");

    let node1 = Peer::new();
    node1.start_server(40810, 16).await?;
    node1.enable_dht().await?;

    let node2 = Peer::new();
    node2.start_server(40811, 16).await?;
    node2.enable_dht().await?;
    node2.bootstrap_dht("127.0.0.1", 40810).await?;

    // Let the bootstrap lookup settle before replicating.
    sleep(Duration::from_millis(500)).await;

    if node1.dht_store("greeting", b"hello dht").await {
        println!("Stored 'greeting' on node 1");
    }

    match node2.dht_retrieve("greeting").await {
        Some(value) => println!("Node 2 found: {}", String::from_utf8_lossy(&value)),
        None => println!("Node 2 could not find the value"),
    }

    println!("{}", node2.dht_stats().await);

    node1.stop_server().await;
    node2.stop_server().await;
    Ok(())
}
