use crate::shared::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(crate::chat::configure_chat_routes())
        .merge(crate::people::configure_people_routes())
        .merge(crate::tasks::configure_tasks_routes())
        .merge(crate::events::configure_events_routes())
        .merge(crate::announcements::configure_announcements_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
