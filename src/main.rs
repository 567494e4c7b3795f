use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flan_t5_serve::api::server::create_router;
use flan_t5_serve::{AppState, ComputeDevice, Predictor, ServeConfig};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flan_t5_serve=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServeConfig::from_env()?;
    tracing::info!("Starting flan-t5-serve v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        weights = %config.predictor.weights,
        loader = %config.predictor.loader,
        cache_dir = ?config.predictor.cache_dir,
        "configuration loaded"
    );

    let device = if config.force_cpu {
        ComputeDevice::cpu()
    } else {
        ComputeDevice::cuda_if_available(0)?
    };

    // Loading blocks on file I/O and device uploads; no request is accepted before it ends.
    let predictor_config = config.predictor.clone();
    let predictor =
        tokio::task::spawn_blocking(move || Predictor::setup(predictor_config, device)).await??;

    let state = Arc::new(AppState::new(predictor));
    let app = create_router(state);

    let addr: SocketAddr = config.bind_address().parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
