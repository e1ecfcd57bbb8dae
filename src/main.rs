use std::sync::Arc;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use log::info;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use deskserver::api_router::configure_api_routes;
use deskserver::config::AppConfig;
use deskserver::llm::OpenAIClient;
use deskserver::shared::state::AppState;
use deskserver::shared::utils::create_conn;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env();
    let pool = create_conn(&config.database_url())?;

    {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    }

    let llm_provider = Arc::new(OpenAIClient::new(&config.llm)?);
    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
        llm_provider,
    });

    let app = configure_api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("deskserver listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
