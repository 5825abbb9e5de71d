//! Entry point for the relay daemon.

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use clarity_relay::Relay;
use clarity_relayd::cli::Cli;
use clarity_relayd::http::router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clarity_relayd=info,clarity_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let relay = Relay::new(cli.worker_config());

    tracing::info!(
        worker = %cli.worker.display(),
        bind = %cli.bind,
        "starting clarity relay"
    );
    relay.start()?;

    let app = router(relay.clone());
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    tracing::info!("listening on http://{}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    relay.shutdown();
    tracing::info!("relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {error}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install signal handler: {error}");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        },
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        },
    }
}
