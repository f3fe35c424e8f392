use anyhow::Result;
use surge::{config::Config, controller::RunController};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::from_file(&config_path)?;

    let filter = if config.verbose {
        "surge=debug,info"
    } else {
        "surge=info,warn"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting surge MCP load harness");
    info!("Loaded config from {}", config_path);
    info!(
        "Target: {} | clients: {} | duration: {}s | interval: {}ms",
        config.target.url,
        config.load.clients,
        config.load.duration_secs,
        config.load.call_interval_ms
    );

    let total_clients = config.load.clients;
    let snapshot = RunController::new(config).run().await?;

    println!("Load test results");
    println!("  duration: {:.2}s", snapshot.elapsed_secs);
    println!("  clients with sessions: {}/{}", snapshot.established, total_clients);
    println!("  total tool calls: {}", snapshot.total_calls());
    println!("  successful: {}", snapshot.successes);
    println!("  failed: {}", snapshot.failures);
    println!("  push decode errors: {}", snapshot.decode_errors);
    if let Some(rate) = snapshot.success_rate() {
        println!("  success rate: {:.2}%", rate * 100.0);
        println!("  throughput: {:.2} calls/sec", snapshot.throughput());
    }

    Ok(())
}
