use clubserver::api_router::build_router;
use clubserver::chat::feed::ChangeFeed;
use clubserver::config::AppConfig;
use clubserver::shared::state::AppState;
use clubserver::shared::utils::create_conn;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::load()?;
    let conn = create_conn(&config.database.url, config.database.max_connections)?;

    {
        let mut db_conn = conn.get()?;
        db_conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    }

    let addr = config.bind_addr();
    let state = Arc::new(AppState {
        conn,
        config,
        feed: Arc::new(ChangeFeed::new()),
    });

    let app = build_router(state);

    info!("clubserver listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
