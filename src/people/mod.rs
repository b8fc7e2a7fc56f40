pub mod progress;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::schema::profiles;
use crate::shared::models::{MemberRole, Profile};
use crate::shared::state::AppState;
use self::progress::{level_for_xp, streak_after_login};

#[derive(Debug, Deserialize)]
pub struct RegisterProfileRequest {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginPingRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub full_name: String,
    pub xp: i32,
    pub level: i32,
    pub streak: i32,
}

fn db_err(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}"))
}

fn new_profile(
    id: Uuid,
    full_name: String,
    email: String,
    role: MemberRole,
    avatar_url: Option<String>,
    bio: Option<String>,
) -> Profile {
    let now = Utc::now();
    Profile {
        id,
        full_name,
        email,
        role: role.as_str().to_string(),
        xp: 0,
        level: level_for_xp(0),
        streak: 0,
        avatar_url,
        bio,
        last_login_date: None,
        created_at: now,
        updated_at: now,
    }
}

/// Provisions the local profile row for an identity minted by the external
/// auth layer. Upsert keyed on id so a repeat registration refreshes the
/// display fields; role is only taken on first insert, re-registering never
/// demotes an officer.
pub async fn register_profile(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterProfileRequest>,
) -> Result<Json<Profile>, (StatusCode, String)> {
    let role = match req.role.as_deref() {
        None => MemberRole::Member,
        Some(raw) => MemberRole::parse(raw)
            .ok_or((StatusCode::BAD_REQUEST, format!("Unknown role {raw:?}")))?,
    };

    let mut conn = state.conn.get().map_err(db_err)?;

    let profile = new_profile(req.id, req.full_name, req.email, role, req.avatar_url, req.bio);

    diesel::insert_into(profiles::table)
        .values(&profile)
        .on_conflict(profiles::id)
        .do_update()
        .set((
            profiles::full_name.eq(&profile.full_name),
            profiles::email.eq(&profile.email),
            profiles::avatar_url.eq(profile.avatar_url.clone()),
            profiles::bio.eq(profile.bio.clone()),
            profiles::updated_at.eq(profile.updated_at),
        ))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    info!("Registered profile {} ({})", profile.id, profile.email);

    let profile: Profile = profiles::table
        .filter(profiles::id.eq(req.id))
        .first(&mut conn)
        .map_err(db_err)?;

    Ok(Json(profile))
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Profile>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let profile: Profile = profiles::table
        .filter(profiles::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Profile not found".to_string()))?;

    Ok(Json(profile))
}

pub async fn list_members(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Profile>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let members: Vec<Profile> = profiles::table
        .order(profiles::full_name.asc())
        .load(&mut conn)
        .map_err(db_err)?;

    Ok(Json(members))
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let rows: Vec<(Uuid, String, i32, i32, i32)> = profiles::table
        .filter(profiles::role.eq(MemberRole::Member.as_str()))
        .order(profiles::xp.desc())
        .limit(query.limit.unwrap_or(25))
        .select((
            profiles::id,
            profiles::full_name,
            profiles::xp,
            profiles::level,
            profiles::streak,
        ))
        .load(&mut conn)
        .map_err(db_err)?;

    let entries = rows
        .into_iter()
        .map(|(id, full_name, xp, level, streak)| LeaderboardEntry {
            id,
            full_name,
            xp,
            level,
            streak,
        })
        .collect();

    Ok(Json(entries))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<Profile>, (StatusCode, String)> {
    let Some(role) = MemberRole::parse(&req.role) else {
        return Err((StatusCode::BAD_REQUEST, format!("Unknown role {:?}", req.role)));
    };

    let mut conn = state.conn.get().map_err(db_err)?;

    diesel::update(profiles::table.filter(profiles::id.eq(id)))
        .set((
            profiles::role.eq(role.as_str()),
            profiles::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .map_err(db_err)?;

    info!("Profile {} role set to {}", id, role.as_str());

    let profile: Profile = profiles::table
        .filter(profiles::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Profile not found".to_string()))?;

    Ok(Json(profile))
}

/// Daily-streak touch. The first ping of a calendar day extends or resets the
/// streak; later pings the same day change nothing.
pub async fn login_ping(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginPingRequest>,
) -> Result<Json<Profile>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let profile: Profile = profiles::table
        .filter(profiles::id.eq(req.user_id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Profile not found".to_string()))?;

    let today = Utc::now().date_naive();
    if let Some(streak) = streak_after_login(profile.last_login_date, today, profile.streak) {
        diesel::update(profiles::table.filter(profiles::id.eq(req.user_id)))
            .set((
                profiles::streak.eq(streak),
                profiles::last_login_date.eq(Some(today)),
                profiles::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .map_err(db_err)?;
        info!("User {} streak now {}", req.user_id, streak);
    }

    let profile: Profile = profiles::table
        .filter(profiles::id.eq(req.user_id))
        .first(&mut conn)
        .map_err(db_err)?;

    Ok(Json(profile))
}

pub fn configure_people_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/people", get(list_members).post(register_profile))
        .route("/api/people/leaderboard", get(leaderboard))
        .route("/api/people/login", post(login_ping))
        .route("/api/people/:id", get(get_profile))
        .route("/api/people/:id/role", put(update_role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_profile_starts_at_zero() {
        crate::tests::test_util::setup();
        let id = Uuid::new_v4();
        let profile = new_profile(
            id,
            "Ada Lovelace".to_string(),
            "ada@club.test".to_string(),
            MemberRole::Member,
            None,
            None,
        );

        assert_eq!(profile.id, id);
        assert_eq!(profile.role, "member");
        assert_eq!(profile.xp, 0);
        assert_eq!(profile.level, level_for_xp(0));
        assert_eq!(profile.streak, 0);
        assert_eq!(profile.last_login_date, None);
    }
}
