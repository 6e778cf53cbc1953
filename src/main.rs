mod api;
mod clock;
mod db;
mod models;
mod quiz;
mod recorder;
mod session;
mod srs;
mod store;


use std::sync::Arc;

use tokio::sync::Mutex;
use tower_http::services::ServeDir;

use api::{ApiState, App};
use clock::SystemClock;
use db::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://studydeck.db?mode=rwc".to_string());
    let store = SqliteStore::connect(&database_url).await?;

    let state = ApiState {
        app: Arc::new(Mutex::new(App::new(store, Arc::new(SystemClock)))),
    };
    let static_dir = std::env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string());
    let router = api::app_router(state).fallback_service(ServeDir::new(static_dir));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("listening on {bind_addr}");
    axum::serve(listener, router).await?;
    Ok(())
}
