use clap::Parser;
use log::{error, info};
use server::config::{Location, ServerConfig};
use server::network::{Server, ServerMessage};
use std::path::PathBuf;

/// Authoritative RPG server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "7001")]
    port: u16,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "64")]
    max_connections: usize,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,
    /// Map new characters start on
    #[clap(long, default_value = "Town")]
    start_map: String,
    #[clap(long, default_value = "5")]
    start_x: u16,
    #[clap(long, default_value = "5")]
    start_y: u16,
    /// Map dead players reappear on
    #[clap(long, default_value = "Town")]
    respawn_map: String,
    #[clap(long, default_value = "5")]
    respawn_x: u16,
    #[clap(long, default_value = "5")]
    respawn_y: u16,
    /// Percent of experience lost on death
    #[clap(long, default_value = "10")]
    death_penalty: u32,
    /// Percent of the victim's experience awarded for a player kill
    #[clap(long, default_value = "10")]
    kill_exp: u32,
    /// JSON file with maps, NPCs and items
    #[clap(long)]
    content: Option<PathBuf>,
    /// Directory for persistent accounts, characters and bans
    #[clap(long)]
    data_dir: Option<PathBuf>,
    /// Directory of downloadable assets
    #[clap(long)]
    assets_dir: Option<PathBuf>,
    /// Account whose new characters get administrator access (repeatable)
    #[clap(long = "admin")]
    administrators: Vec<String>,
    /// Seed for the world's random number generators
    #[clap(long)]
    seed: Option<u64>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            address: format!("{}:{}", args.host, args.port),
            max_connections: args.max_connections,
            tick_rate: args.tick_rate,
            start: Location::new(args.start_map, args.start_x, args.start_y),
            respawn: Location::new(args.respawn_map, args.respawn_x, args.respawn_y),
            death_exp_penalty_percent: args.death_penalty.min(100),
            kill_exp_percent: args.kill_exp.min(100),
            content_path: args.content,
            data_dir: args.data_dir,
            assets_dir: args.assets_dir,
            administrators: args.administrators,
            seed: args.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!(
        "Starting server on {}:{} at {} ticks per second",
        args.host, args.port, args.tick_rate
    );

    let mut server = Server::new(args.into()).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                let _ = shutdown.send(ServerMessage::Shutdown);
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await
}
