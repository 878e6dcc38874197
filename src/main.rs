use clap::Parser;
use log::error;
use peermesh::{setup_logging, Config, P2pError, Peer};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "peermesh")]
#[command(about = "A P2P TCP mesh with a framed message protocol and a Kademlia-style DHT")]
#[command(version)]
struct Cli {
    /// Port to listen on at startup (otherwise use the `start` command)
    #[arg(short, long)]
    port: Option<u16>,
    /// Maximum number of concurrent connections
    #[arg(long, default_value = "200")]
    max_connections: usize,
    /// Enable the DHT once the server is up
    #[arg(long)]
    dht: bool,
    /// DHT bootstrap node (host:port)
    #[arg(long)]
    bootstrap: Option<String>,
    /// Node name used in log output
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let cli = Cli::parse();
    let config = Config {
        port: cli.port,
        max_connections: cli.max_connections,
        node_name: cli.name.unwrap_or_else(|| "peermesh".to_string()),
        dht_enabled: cli.dht,
        dht_bootstrap: cli.bootstrap,
    };

    let peer = Peer::new();
    if let Err(e) = apply_config(&peer, &config).await {
        error!("{}: fatal startup failure: {}", config.node_name, e);
        std::process::exit(1);
    }

    repl(&peer).await;
    peer.stop_server().await;
}

async fn apply_config(peer: &Peer, config: &Config) -> peermesh::Result<()> {
    if let Some(port) = config.port {
        peer.start_server(port, config.max_connections).await?;

        if config.dht_enabled {
            peer.enable_dht().await?;
            if let Some(target) = &config.dht_bootstrap {
                let (host, port) = parse_endpoint(target)?;
                peer.bootstrap_dht(&host, port).await?;
            }
        }
    }
    Ok(())
}

fn parse_endpoint(s: &str) -> peermesh::Result<(String, u16)> {
    let (host, port) = s.rsplit_once(':').ok_or_else(|| {
        P2pError::InvalidArgument(format!("Expected host:port, got '{}'", s))
    })?;
    let port = port
        .parse::<u16>()
        .map_err(|_| P2pError::InvalidArgument(format!("Invalid port: '{}'", port)))?;
    Ok((host.to_string(), port))
}

const HELP: &str = "\
Commands:
  start <port>                 start listening
  connect <host> <port>        dial a peer
  send <peer_id> <message>     send a message to one connection
  broadcast <message>          send a message to every connection
  connections                  list live connections
  dht enable                   start the DHT engine
  dht bootstrap <host> <port>  join the DHT via a known node
  dht store <key> <value>      store a value in the DHT
  dht get <key>                look a value up
  dht stats                    show DHT statistics
  help                         show this help
  exit                         shut down";

async fn repl(peer: &Peer) {
    println!("peermesh {} - type 'help' for commands", peermesh::VERSION);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break, // stdin closed
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => {}
            ["help"] => println!("{}", HELP),
            ["exit"] | ["quit"] => break,
            ["start", port] => match port.parse::<u16>() {
                Ok(port) => report(peer.start_server(port, 200).await),
                Err(_) => println!("Invalid port: {}", port),
            },
            ["connect", host, port] => match port.parse::<u16>() {
                Ok(port) => match peer.connect_to(host, port).await {
                    Ok(id) => println!("Connected with ID {}", id),
                    Err(e) => println!("Error: {}", e),
                },
                Err(_) => println!("Invalid port: {}", port),
            },
            ["send", peer_id, rest @ ..] if !rest.is_empty() => match peer_id.parse::<u64>() {
                Ok(id) => report(peer.send_message(id, &rest.join(" ")).await),
                Err(_) => println!("Invalid peer id: {}", peer_id),
            },
            ["broadcast", rest @ ..] if !rest.is_empty() => {
                report(peer.broadcast_message(&rest.join(" ")).await)
            }
            ["connections"] => {
                let listing = peer.list_connections().await;
                if listing.is_empty() {
                    println!("No connections");
                } else {
                    for (id, endpoint) in listing {
                        println!("  {} -> {}", id, endpoint);
                    }
                }
                println!("{}", peer.metrics_summary());
            }
            ["dht", "enable"] => report(peer.enable_dht().await),
            ["dht", "bootstrap", host, port] => match port.parse::<u16>() {
                Ok(port) => report(peer.bootstrap_dht(host, port).await),
                Err(_) => println!("Invalid port: {}", port),
            },
            ["dht", "store", key, rest @ ..] if !rest.is_empty() => {
                let value = rest.join(" ");
                if peer.dht_store(key, value.as_bytes()).await {
                    println!("Stored");
                } else {
                    println!("Store failed");
                }
            }
            ["dht", "get", key] => match peer.dht_retrieve(key).await {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("Not found"),
            },
            ["dht", "stats"] => println!("{}", peer.dht_stats().await),
            _ => println!("Unknown command - type 'help'"),
        }
    }
}

fn report(result: peermesh::Result<()>) {
    match result {
        Ok(()) => println!("OK"),
        Err(e) => println!("Error: {}", e),
    }
}
