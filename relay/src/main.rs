use clap::Parser;
use log::{error, info};
use relay::config::RelayConfig;
use relay::network::{Relay, RelayEvent};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay host address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Relay port
    #[arg(short, long, default_value = "25500")]
    port: u16,

    /// Seconds without a heartbeat before a backend is dropped
    #[arg(long, default_value = "10")]
    server_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info for detailed logging");
    }

    info!("Starting relay on {}:{}", args.host, args.port);

    let config = RelayConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        server_timeout: Duration::from_secs(args.server_timeout_secs),
    };

    let mut relay = Relay::new(config).await?;

    let shutdown = relay.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                let _ = shutdown.send(RelayEvent::Shutdown);
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    relay.run().await
}
