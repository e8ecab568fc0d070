use anyhow::{bail, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use poolsync_bridge::{
    api::{self, AppState},
    config::Config,
    coordinator::RefreshCoordinator,
    credentials_store::{self, StoredCredentials},
    entities::Entities,
    poolsync::{ClientOptions, PairingOutcome, PoolSyncClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    // Credentials: environment first, then the store written by a past pairing.
    let mut options = ClientOptions::from(&config);
    if !options.credentials.has_token() {
        if let Some(stored) = credentials_store::load(&config.credentials_path).await {
            info!(path = %config.credentials_path.display(), "Using stored PoolSync credentials");
            options.credentials = stored.credentials();
            options.mac_address = options.mac_address.or(stored.mac_address);
        }
    }
    let client = PoolSyncClient::new(options);

    let paired = if client.credentials().await.has_token() {
        None
    } else {
        info!("No PoolSync credentials; press the button on the hub to pair");
        let result = client
            .pairing_handshake(
                config.user_id.clone(),
                config.pushlink_poll_interval,
                config.pushlink_timeout,
            )
            .await;
        match &result.outcome {
            PairingOutcome::Succeeded { .. } => info!(polls = result.polls, "Push-link pairing succeeded"),
            PairingOutcome::Rejected { reason } => bail!("push-link pairing rejected: {reason}"),
            PairingOutcome::TimedOut => bail!(
                "push-link pairing timed out after {}s",
                config.pushlink_timeout.as_secs()
            ),
        }
        StoredCredentials::from_pairing(&result)
    };

    // First refresh runs before anything is served.
    let coordinator = RefreshCoordinator::new(client.clone());
    let first = coordinator.start(config.poll_interval).await;
    let entities = Entities::discover(
        first.as_ref().ok().map(|s| s.as_ref()),
        config.temperature_unit,
    );
    info!(count = entities.len(), "Entities bound");

    if let Some(mut stored) = paired {
        stored.mac_address = stored.mac_address.or(client.mac_address().await);
        if let Err(e) = credentials_store::save(&config.credentials_path, &stored).await {
            warn!(error = %e, "Failed to store PoolSync credentials; pairing will be needed again");
        }
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    // Picks up a heat pump if the hub was unreachable for the first refresh.
    let state = AppState::new(coordinator.clone(), entities);
    let discovery = state.control.watch_discovery();

    let served = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    discovery.abort();
    coordinator.shutdown().await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server stopped with an error");
    }
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
