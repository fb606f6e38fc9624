use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "25600")]
    port: u16,

    /// Relay address for cross-server portals
    #[arg(short, long)]
    relay: Option<String>,

    /// Name this backend registers under at the relay
    #[arg(short = 'n', long, default_value = "default")]
    server_name: String,

    /// Tick rate (ticks per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// File the portals are loaded from and saved to
    #[arg(long, default_value = "portals.json")]
    portals_file: PathBuf,

    /// World to host, can be given several times. The first one is the spawn world
    #[arg(short, long = "world", default_values_t = vec!["world".to_string(), "world_nether".to_string()])]
    worlds: Vec<String>,

    /// Distance within which players activate portals
    #[arg(long, default_value = "16.0")]
    activation_distance: f64,

    /// Distance within which players see through portals
    #[arg(long, default_value = "8.0")]
    view_distance: f64,

    /// Maximum number of players
    #[arg(short, long, default_value = "64")]
    max_players: usize,

    /// Do not warn when the relay asks for a selection of an unknown player
    #[arg(long)]
    no_missing_selection_warning: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info for detailed logging");
    }

    info!(
        "Starting backend {} on {}:{}",
        args.server_name, args.host, args.port
    );

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        relay_addr: args.relay,
        server_name: args.server_name,
        tick_duration: ServerConfig::tick_duration_for(args.tick_rate),
        portals_file: args.portals_file,
        worlds: args.worlds,
        activation_distance: args.activation_distance,
        view_distance: args.view_distance,
        max_players: args.max_players,
        warn_on_missing_selection: !args.no_missing_selection_warning,
        ..Default::default()
    };

    let mut server = Server::new(config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                let _ = shutdown.send(ServerMessage::Shutdown);
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await
}
