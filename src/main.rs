use tokio::sync::watch;
use tracing::{error, info};

use rudis::config::Config;
use rudis::server::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match Config::parse(std::env::args()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to parse command line: {err}");
            std::process::exit(1);
        }
    };

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "failed to start server");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(err) = server.run(shutdown_rx).await {
        error!(%err, "server exited with error");
        std::process::exit(1);
    }
}
