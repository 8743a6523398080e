use std::sync::{Arc, Mutex};

use axum::routing::get;
use axum::Router;
use chrono_tz::Tz;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use inkgram::config::AppConfig;
use inkgram::db;
use inkgram::handlers;
use inkgram::services::ai::openai::OpenAiProvider;
use inkgram::services::booking::SlotArbiter;
use inkgram::services::calendar::google::GoogleCalendarClient;
use inkgram::services::calendar::CalendarProvider;
use inkgram::services::messaging::instagram::InstagramProvider;
use inkgram::services::retrieval::QdrantIndex;
use inkgram::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    anyhow::ensure!(
        !config.openai_api_key.is_empty(),
        "OPENAI_API_KEY must be set"
    );
    anyhow::ensure!(
        !config.ig_access_token.is_empty(),
        "IG_USER_ACCESS_TOKEN must be set"
    );
    if config.calendar_token.is_empty() {
        tracing::warn!("CALENDAR_TOKEN not set, calendar calls will fail");
    }
    if config.ig_app_secret.is_empty() {
        tracing::warn!("IG_APP_SECRET not set, webhook signatures are not verified");
    }

    let tz: Tz = config
        .studio_timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid STUDIO_TIMEZONE: {}", config.studio_timezone))?;

    let conn = db::init_db(&config.database_url)?;
    let db = Arc::new(Mutex::new(conn));
    let port = config.port;

    let calendar: Arc<dyn CalendarProvider> =
        Arc::new(GoogleCalendarClient::from_config(&config, tz));
    let arbiter = SlotArbiter::new(Arc::clone(&db), calendar, tz, config.hold_ttl_secs);

    let state = Arc::new(AppState {
        db,
        llm: Box::new(OpenAiProvider::from_config(&config)),
        embedder: Box::new(OpenAiProvider::from_config(&config)),
        index: Box::new(QdrantIndex::from_config(&config)),
        messaging: Box::new(InstagramProvider::new(config.ig_access_token.clone())),
        arbiter,
        config,
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/webhook",
            get(handlers::webhook::verify).post(handlers::webhook::receive),
        )
        .route("/privacy_policy", get(handlers::legal::privacy_policy))
        .route("/terms_of_service", get(handlers::legal::terms_of_service))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
