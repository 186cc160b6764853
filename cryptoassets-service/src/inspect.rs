//! A minimal read-only inspection server: a sibling thread with no
//! ledger-mutation authority, bound only when `service.inspection_bind_address`
//! is configured.

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn healthz() -> Json<Health> {
    Json(Health { status: "ok" })
}

pub async fn serve(bind_address: &str) -> anyhow::Result<()> {
    let app = Router::new().route("/healthz", get(healthz));
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(%bind_address, "inspection server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
