use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::people::progress::award_xp;
use crate::shared::models::schema::{profiles, task_submissions, tasks};
use crate::shared::state::AppState;

pub const SUBMISSION_PENDING: &str = "pending";
pub const SUBMISSION_APPROVED: &str = "approved";
pub const SUBMISSION_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub task_type: String,
    pub difficulty: String,
    pub xp_reward: i32,
    pub requires_proof: bool,
    pub is_active: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = task_submissions)]
pub struct TaskSubmission {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub notes: Option<String>,
    pub proof_url: Option<String>,
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub difficulty: Option<String>,
    pub xp_reward: Option<i32>,
    pub requires_proof: Option<bool>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub user_id: Uuid,
    pub notes: Option<String>,
    pub proof_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewer_id: Uuid,
    pub approve: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionQuery {
    pub status: Option<String>,
    pub user_id: Option<Uuid>,
}

fn db_err(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}"))
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Task>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let active: Vec<Task> = tasks::table
        .filter(tasks::is_active.eq(true))
        .order(tasks::created_at.desc())
        .load(&mut conn)
        .map_err(db_err)?;

    Ok(Json(active))
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let task = Task {
        id: Uuid::new_v4(),
        title: req.title,
        description: req.description,
        task_type: req.task_type.unwrap_or_else(|| "one-off".to_string()),
        difficulty: req.difficulty.unwrap_or_else(|| "easy".to_string()),
        xp_reward: req.xp_reward.unwrap_or(10),
        requires_proof: req.requires_proof.unwrap_or(false),
        is_active: true,
        due_date: req.due_date,
        created_by: req.created_by,
        created_at: Utc::now(),
    };

    diesel::insert_into(tasks::table)
        .values(&task)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(task))
}

/// Member submits a task for review. Proof is mandatory when the task asks
/// for it, and a second submission while one is still pending is refused.
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<TaskSubmission>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let task: Task = tasks::table
        .filter(tasks::id.eq(task_id))
        .filter(tasks::is_active.eq(true))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Task not found".to_string()))?;

    if task.requires_proof && req.proof_url.as_deref().map_or(true, |p| p.trim().is_empty()) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "This task requires proof of completion".to_string(),
        ));
    }

    let already_pending: i64 = task_submissions::table
        .filter(task_submissions::task_id.eq(task_id))
        .filter(task_submissions::user_id.eq(req.user_id))
        .filter(task_submissions::status.eq(SUBMISSION_PENDING))
        .count()
        .get_result(&mut conn)
        .map_err(db_err)?;

    if already_pending > 0 {
        return Err((
            StatusCode::CONFLICT,
            "A submission for this task is already awaiting review".to_string(),
        ));
    }

    let submission = TaskSubmission {
        id: Uuid::new_v4(),
        task_id,
        user_id: req.user_id,
        status: SUBMISSION_PENDING.to_string(),
        notes: req.notes,
        proof_url: req.proof_url,
        feedback: None,
        submitted_at: Utc::now(),
        reviewed_at: None,
        reviewed_by: None,
    };

    diesel::insert_into(task_submissions::table)
        .values(&submission)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    info!("Submission {} for task {} by {}", submission.id, task_id, req.user_id);
    Ok(Json(submission))
}

pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmissionQuery>,
) -> Result<Json<Vec<TaskSubmission>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let mut q = task_submissions::table.into_boxed();

    if let Some(status) = query.status {
        q = q.filter(task_submissions::status.eq(status));
    }
    if let Some(user_id) = query.user_id {
        q = q.filter(task_submissions::user_id.eq(user_id));
    }

    let submissions: Vec<TaskSubmission> = q
        .order(task_submissions::submitted_at.desc())
        .load(&mut conn)
        .map_err(db_err)?;

    Ok(Json(submissions))
}

/// Officer review. Approval awards the task's XP to the submitter and
/// recomputes their level; both verdicts stamp reviewer and time. The status
/// flip is a compare-and-set on pending, so a submission can only be judged
/// once.
pub async fn review_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<TaskSubmission>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;
    let now = Utc::now();

    let verdict = if req.approve {
        SUBMISSION_APPROVED
    } else {
        SUBMISSION_REJECTED
    };

    let updated = diesel::update(
        task_submissions::table
            .filter(task_submissions::id.eq(id))
            .filter(task_submissions::status.eq(SUBMISSION_PENDING)),
    )
    .set((
        task_submissions::status.eq(verdict),
        task_submissions::reviewed_at.eq(Some(now)),
        task_submissions::reviewed_by.eq(Some(req.reviewer_id)),
        task_submissions::feedback.eq(req.feedback.clone()),
    ))
    .execute(&mut conn)
    .map_err(db_err)?;

    if updated == 0 {
        let exists: i64 = task_submissions::table
            .filter(task_submissions::id.eq(id))
            .count()
            .get_result(&mut conn)
            .map_err(db_err)?;
        return Err(if exists == 0 {
            (StatusCode::NOT_FOUND, "Submission not found".to_string())
        } else {
            (StatusCode::CONFLICT, "Submission already reviewed".to_string())
        });
    }

    let submission: TaskSubmission = task_submissions::table
        .filter(task_submissions::id.eq(id))
        .first(&mut conn)
        .map_err(db_err)?;

    if req.approve {
        let reward: i32 = tasks::table
            .filter(tasks::id.eq(submission.task_id))
            .select(tasks::xp_reward)
            .first(&mut conn)
            .map_err(db_err)?;

        let current_xp: i32 = profiles::table
            .filter(profiles::id.eq(submission.user_id))
            .select(profiles::xp)
            .first(&mut conn)
            .map_err(db_err)?;

        let (xp, level) = award_xp(current_xp, reward);

        diesel::update(profiles::table.filter(profiles::id.eq(submission.user_id)))
            .set((
                profiles::xp.eq(xp),
                profiles::level.eq(level),
                profiles::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .map_err(db_err)?;

        info!(
            "Submission {} approved, {} XP to {} (now {} XP, level {})",
            id, reward, submission.user_id, xp, level
        );
    } else {
        info!("Submission {} rejected by {}", id, req.reviewer_id);
    }

    Ok(Json(submission))
}

pub fn configure_tasks_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/submissions", get(list_submissions))
        .route("/api/tasks/submissions/:id/review", post(review_submission))
        .route("/api/tasks/:id/submit", post(submit_task))
}
