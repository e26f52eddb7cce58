// Sharded visit-counter service.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use visit_counter::{api, app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let app_state = AppState::new(config.clone()).await?;

    let app = Router::new()
        .nest("/api/v1", api::router())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(app_state);

    let addr: SocketAddr = config.server_address().parse()?;
    tracing::info!("visit counter service listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
