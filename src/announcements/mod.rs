use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::schema::announcements;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = announcements)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub priority: Option<String>,
    pub is_pinned: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub content: String,
    pub priority: Option<String>,
    pub is_pinned: Option<bool>,
    pub created_by: Option<Uuid>,
}

fn db_err(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}"))
}

/// Pinned first, then newest.
pub async fn list_announcements(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Announcement>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let items: Vec<Announcement> = announcements::table
        .order((announcements::is_pinned.desc(), announcements::created_at.desc()))
        .load(&mut conn)
        .map_err(db_err)?;

    Ok(Json(items))
}

pub async fn create_announcement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAnnouncementRequest>,
) -> Result<Json<Announcement>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let item = Announcement {
        id: Uuid::new_v4(),
        title: req.title,
        content: req.content,
        priority: req.priority,
        is_pinned: req.is_pinned.unwrap_or(false),
        created_by: req.created_by,
        created_at: Utc::now(),
    };

    diesel::insert_into(announcements::table)
        .values(&item)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(item))
}

pub async fn delete_announcement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let deleted = diesel::delete(announcements::table.filter(announcements::id.eq(id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if deleted == 0 {
        return Err((StatusCode::NOT_FOUND, "Announcement not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_announcements_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/announcements",
            get(list_announcements).post(create_announcement),
        )
        .route(
            "/api/announcements/:id",
            axum::routing::delete(delete_announcement),
        )
}
