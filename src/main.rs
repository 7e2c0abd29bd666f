use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tempo_store::Database;

/// Real-time timer sync server.
#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Real-time timer sync server", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "TEMPO_PORT", default_value_t = 8000)]
    port: u16,

    /// Database file path (defaults to ~/.tempo/tempo.db)
    #[arg(long, env = "TEMPO_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Token signing secret
    #[arg(long, env = "TEMPO_TOKEN_SECRET")]
    token_secret: Option<String>,

    /// Token lifetime in hours
    #[arg(long, env = "TEMPO_TOKEN_TTL_HOURS", default_value_t = 24)]
    token_ttl_hours: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Tempo server");

    let db_path = match cli.db_path {
        Some(path) => path,
        None => {
            let tempo_dir = dirs_home().join(".tempo");
            std::fs::create_dir_all(&tempo_dir).expect("Failed to create database directory");
            tempo_dir.join("tempo.db")
        }
    };

    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let token_secret = cli.token_secret.unwrap_or_else(|| {
        tracing::warn!("no token secret configured, using the development default");
        tempo_server::server::DEV_TOKEN_SECRET.to_owned()
    });

    let config = tempo_server::ServerConfig {
        port: cli.port,
        token_secret,
        token_ttl: Duration::from_secs(cli.token_ttl_hours * 60 * 60),
    };
    let handle = tempo_server::start(config, db)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "Tempo server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
