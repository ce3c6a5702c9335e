// scribe: Host monitoring agent.  Samples telemetry and log events, ships
// them to the collector over a persistent WebSocket, buffers while offline.

use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "scribe starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/scribe/config.json".to_owned());
    let cfg = scribe_agent::config::load_config(std::path::Path::new(&config_path));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let agent = match scribe_agent::agent::Agent::new(cfg).await {
            Ok(agent) => agent,
            Err(e) => {
                eprintln!("FATAL: failed to initialize agent: {}", e);
                std::process::exit(1);
            }
        };

        let shutdown = agent.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown.send(true);
            }
        });

        agent.run().await;
    });

    info!("scribe stopped");
}
