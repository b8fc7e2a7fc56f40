use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::schema::{events, rsvps};
use crate::shared::state::AppState;

pub const RSVP_GOING: &str = "going";
pub const RSVP_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = events)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: Option<i32>,
    pub is_published: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = rsvps)]
pub struct Rsvp {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: Option<i32>,
    pub is_published: Option<bool>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RsvpRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct EventWithAttendance {
    #[serde(flatten)]
    pub event: Event,
    pub attending: i64,
}

fn db_err(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}"))
}

/// A capacity of None means unlimited seats.
pub fn has_capacity(capacity: Option<i32>, attending: i64) -> bool {
    match capacity {
        Some(cap) => attending < cap as i64,
        None => true,
    }
}

fn attending_count(conn: &mut PgConnection, event: Uuid) -> Result<i64, diesel::result::Error> {
    rsvps::table
        .filter(rsvps::event_id.eq(event))
        .filter(rsvps::status.eq(RSVP_GOING))
        .count()
        .get_result(conn)
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EventWithAttendance>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let published: Vec<Event> = events::table
        .filter(events::is_published.eq(true))
        .order(events::start_time.asc())
        .load(&mut conn)
        .map_err(db_err)?;

    let mut out = Vec::with_capacity(published.len());
    for event in published {
        let attending = attending_count(&mut conn, event.id).map_err(db_err)?;
        out.push(EventWithAttendance { event, attending });
    }

    Ok(Json(out))
}

pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<Event>, (StatusCode, String)> {
    if req.end_time <= req.start_time {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "Event must end after it starts".to_string(),
        ));
    }

    let mut conn = state.conn.get().map_err(db_err)?;

    let event = Event {
        id: Uuid::new_v4(),
        title: req.title,
        description: req.description,
        location: req.location,
        start_time: req.start_time,
        end_time: req.end_time,
        capacity: req.capacity,
        is_published: req.is_published.unwrap_or(false),
        created_by: req.created_by,
        created_at: Utc::now(),
    };

    diesel::insert_into(events::table)
        .values(&event)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(event))
}

/// RSVP is idempotent per (event, user): a repeat while already going just
/// returns the existing row, a cancelled one flips back to going if a seat is
/// still free.
pub async fn rsvp_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<RsvpRequest>,
) -> Result<Json<Rsvp>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let event: Event = events::table
        .filter(events::id.eq(event_id))
        .filter(events::is_published.eq(true))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Event not found".to_string()))?;

    let existing: Option<Rsvp> = rsvps::table
        .filter(rsvps::event_id.eq(event_id))
        .filter(rsvps::user_id.eq(req.user_id))
        .first(&mut conn)
        .optional()
        .map_err(db_err)?;

    if let Some(rsvp) = &existing {
        if rsvp.status == RSVP_GOING {
            return Ok(Json(rsvp.clone()));
        }
    }

    let attending = attending_count(&mut conn, event_id).map_err(db_err)?;
    if !has_capacity(event.capacity, attending) {
        return Err((StatusCode::CONFLICT, "Event is at capacity".to_string()));
    }

    let rsvp = match existing {
        Some(rsvp) => {
            diesel::update(rsvps::table.filter(rsvps::id.eq(rsvp.id)))
                .set(rsvps::status.eq(RSVP_GOING))
                .execute(&mut conn)
                .map_err(db_err)?;
            Rsvp {
                status: RSVP_GOING.to_string(),
                ..rsvp
            }
        }
        None => {
            let rsvp = Rsvp {
                id: Uuid::new_v4(),
                event_id,
                user_id: req.user_id,
                status: RSVP_GOING.to_string(),
                checked_in_at: None,
                created_at: Utc::now(),
            };
            diesel::insert_into(rsvps::table)
                .values(&rsvp)
                .execute(&mut conn)
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;
            rsvp
        }
    };

    info!("User {} going to event {}", req.user_id, event_id);
    Ok(Json(rsvp))
}

pub async fn cancel_rsvp(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<RsvpRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let updated = diesel::update(
        rsvps::table
            .filter(rsvps::event_id.eq(event_id))
            .filter(rsvps::user_id.eq(req.user_id))
            .filter(rsvps::status.eq(RSVP_GOING)),
    )
    .set(rsvps::status.eq(RSVP_CANCELLED))
    .execute(&mut conn)
    .map_err(db_err)?;

    if updated == 0 {
        return Err((StatusCode::NOT_FOUND, "No active RSVP to cancel".to_string()));
    }

    Ok(Json(serde_json::json!({ "cancelled": true })))
}

/// Why a check-in wrote no stamp: the RSVP was cancelled or already stamped.
fn check_in_refusal(status: &str, already_checked_in: bool) -> Option<&'static str> {
    if already_checked_in {
        Some("Already checked in")
    } else if status != RSVP_GOING {
        Some("RSVP is cancelled")
    } else {
        None
    }
}

/// Officer check-in at the door; the stamp is written once and stays. A
/// cancelled or already-stamped RSVP is a conflict, not a silent success.
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<RsvpRequest>,
) -> Result<Json<Rsvp>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let updated = diesel::update(
        rsvps::table
            .filter(rsvps::event_id.eq(event_id))
            .filter(rsvps::user_id.eq(req.user_id))
            .filter(rsvps::status.eq(RSVP_GOING))
            .filter(rsvps::checked_in_at.is_null()),
    )
    .set(rsvps::checked_in_at.eq(Some(Utc::now())))
    .execute(&mut conn)
    .map_err(db_err)?;

    let rsvp: Rsvp = rsvps::table
        .filter(rsvps::event_id.eq(event_id))
        .filter(rsvps::user_id.eq(req.user_id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "RSVP not found".to_string()))?;

    if updated == 0 {
        let reason = check_in_refusal(&rsvp.status, rsvp.checked_in_at.is_some())
            .unwrap_or("RSVP changed concurrently");
        return Err((StatusCode::CONFLICT, reason.to_string()));
    }

    info!("User {} checked in to event {}", req.user_id, event_id);
    Ok(Json(rsvp))
}

pub fn configure_events_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/:id/rsvp", post(rsvp_event))
        .route("/api/events/:id/rsvp/cancel", put(cancel_rsvp))
        .route("/api/events/:id/checkin", put(check_in))
}

#[cfg(test)]
mod tests {
    use super::{check_in_refusal, has_capacity, RSVP_CANCELLED, RSVP_GOING};

    #[test]
    fn unlimited_when_no_capacity() {
        assert!(has_capacity(None, 0));
        assert!(has_capacity(None, 10_000));
    }

    #[test]
    fn full_event_refuses_more() {
        assert!(has_capacity(Some(2), 0));
        assert!(has_capacity(Some(2), 1));
        assert!(!has_capacity(Some(2), 2));
        assert!(!has_capacity(Some(0), 0));
    }

    #[test]
    fn check_in_stamps_only_live_rsvps() {
        assert_eq!(check_in_refusal(RSVP_GOING, false), None);
        assert_eq!(check_in_refusal(RSVP_GOING, true), Some("Already checked in"));
        assert_eq!(check_in_refusal(RSVP_CANCELLED, false), Some("RSVP is cancelled"));
        // A stale stamp on a since-cancelled RSVP still reads as checked in.
        assert_eq!(check_in_refusal(RSVP_CANCELLED, true), Some("Already checked in"));
    }
}
