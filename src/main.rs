use actix_web::{App, HttpServer, web};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod model;
mod service;

use api::ApiError;
use app::AppState;
use model::Config;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr();
    let max_body_bytes = config.max_body_bytes;

    let state = AppState::new(config).map_err(std::io::Error::other)?;
    state.spawn_session_sweeper();
    let state = web::Data::new(state);

    tracing::info!("Starting document review agent on {}", bind_addr);

    HttpServer::new(move || {
        let json_config = web::JsonConfig::default()
            .limit(max_body_bytes)
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into());

        App::new()
            .app_data(state.clone())
            .app_data(json_config)
            .configure(api::analyze::configure)
            .configure(api::health::configure)
            .configure(api::openapi::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
