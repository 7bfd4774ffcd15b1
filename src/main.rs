use chat_relay::{router, AppState, Env};
use eyre::{Result, WrapErr};
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let env = Env::new()?;
    let addr = env.listen_addr()?;
    let app = Arc::new(AppState::new(env)?);
    warm_catalog(&app);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        router(app).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .wrap_err("server error")?;
    Ok(())
}

/// Fetches the model list once in the background so the capability table is
/// populated before the first chat request.
fn warm_catalog(app: &Arc<AppState>) {
    let app = app.clone();
    tokio::spawn(async move {
        match app.catalog.list(Default::default(), None, None, None).await {
            Ok(models) => tracing::info!("[Catalog] Warmed with {} models", models.len()),
            Err(e) => tracing::warn!("[Catalog] Warm-up failed: {}", e),
        }
    });
}
