//! Helpdesk API server

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
};
use helpdesk_api::{create_router, security::security_headers_middleware, AppState, Config};
use helpdesk_shared::db::{create_pool, run_migrations};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helpdesk_api=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Drop expired rate limit windows and cached account snapshots
fn spawn_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let windows = state.rate_limiter.cleanup().await;
            let accounts = state.auth_cache.cleanup();
            if windows + accounts > 0 {
                tracing::debug!(windows, accounts, "Swept expired in-memory entries");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(
        bind_address = %config.bind_address,
        ai_mode = ?config.ai_mode,
        retention_days = ?config.conversation_retention_days,
        "Starting helpdesk API"
    );

    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    run_migrations(&pool).await?;

    let bind_address = config.bind_address.clone();
    let cors = cors_layer(&config);
    let state = AppState::new(pool, config);
    spawn_sweeper(state.clone());

    let app = create_router(state)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("listening on {}", bind_address);
    axum::serve(listener, app).await?;

    Ok(())
}
