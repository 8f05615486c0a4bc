use clap::Parser;
use log::{error, info};
use server::config::{MatchmakingConfig, ServerConfig};
use server::network::{BoxError, Server, ServerMessage};
use server::session_store::InMemorySessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

/// How long Ctrl+C waits for the event loop to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "64")]
    max_connections: usize,

    /// Milliseconds between matchmaking passes
    #[arg(long, default_value = "2000")]
    scan_interval_ms: u64,

    /// Milliseconds a client may wait in a pool before timing out
    #[arg(long, default_value = "60000")]
    wait_timeout_ms: u64,

    /// Rating tolerance gained per second of waiting
    #[arg(long, default_value = "10")]
    tolerance_per_second: u32,

    /// Upper bound on rating tolerance
    #[arg(long, default_value = "200")]
    max_tolerance: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_connections: args.max_connections,
        matchmaking: MatchmakingConfig {
            scan_interval: Duration::from_millis(args.scan_interval_ms.max(1)),
            wait_timeout: Duration::from_millis(args.wait_timeout_ms),
            tolerance_per_second: args.tolerance_per_second,
            max_tolerance: args.max_tolerance,
        },
    };

    info!("Starting server...");
    info!(
        "Matchmaking every {:?}, timeout after {:?}",
        config.matchmaking.scan_interval, config.matchmaking.wait_timeout
    );

    let store = Arc::new(InMemorySessionStore::new());
    let mut server = Server::bind(config, store).await?;
    let shutdown = server.sender();

    let mut server_handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut server_handle => report_exit(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);

            match tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await {
                Ok(result) => report_exit(result),
                Err(_) => error!("Server did not stop within {:?}", SHUTDOWN_GRACE),
            }
        }
    }

    Ok(())
}

fn report_exit(result: Result<Result<(), BoxError>, JoinError>) {
    match result {
        Ok(Ok(())) => info!("Server stopped"),
        Ok(Err(e)) => error!("Server stopped: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config() {
        let args = Args::try_parse_from(["server"]).unwrap();
        let defaults = MatchmakingConfig::default();
        assert_eq!(args.tolerance_per_second, defaults.tolerance_per_second);
        assert_eq!(args.max_tolerance, defaults.max_tolerance);
        assert_eq!(args.port, 8080);
    }

    #[test]
    fn test_negative_tolerance_is_rejected() {
        assert!(Args::try_parse_from(["server", "--max-tolerance", "-5"]).is_err());
        assert!(Args::try_parse_from(["server", "--tolerance-per-second", "-1"]).is_err());
        assert!(Args::try_parse_from(["server", "--max-tolerance", "50"]).is_ok());
    }
}
