pub mod feed;
pub mod lifecycle;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::schema::{chat_messages, chat_tickets, profiles};
use crate::shared::state::AppState;
use self::feed::FeedEvent;
use self::lifecycle::{
    clean_content, mark_read_targets, next_status, unread_for_viewer, TicketAction, TicketStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = chat_tickets)]
pub struct ChatTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub accepted_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct ChatMessage {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OpenChatRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AcceptTicketRequest {
    pub staff_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub viewer_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    pub viewer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    pub viewer_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TicketEnvelope {
    pub ticket: ChatTicket,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender_name: Option<String>,
    pub sender_role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketThread {
    pub ticket: ChatTicket,
    pub messages: Vec<MessageView>,
    pub unread: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConsoleTicket {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub requester_name: String,
    pub status: String,
    pub accepted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ConsoleView {
    pub pending: Vec<ConsoleTicket>,
    pub active: Vec<ConsoleTicket>,
    pub closed: Vec<ConsoleTicket>,
}

fn db_err(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}"))
}

fn new_pending_ticket(user_id: Uuid) -> ChatTicket {
    ChatTicket {
        id: Uuid::new_v4(),
        user_id,
        status: TicketStatus::Pending.as_str().to_string(),
        accepted_by: None,
        accepted_at: None,
        created_at: Utc::now(),
    }
}

fn find_open_ticket(
    conn: &mut PgConnection,
    user: Uuid,
) -> Result<Option<ChatTicket>, diesel::result::Error> {
    chat_tickets::table
        .filter(chat_tickets::user_id.eq(user))
        .filter(chat_tickets::status.ne(TicketStatus::Closed.as_str()))
        .order(chat_tickets::created_at.desc())
        .first(conn)
        .optional()
}

/// Member opens the chat view: hand back their most recent ticket (closed
/// ones included, so the frozen thread still renders) and only create a fresh
/// pending ticket when they have none at all.
pub async fn open_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenChatRequest>,
) -> Result<Json<TicketEnvelope>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let latest: Option<ChatTicket> = chat_tickets::table
        .filter(chat_tickets::user_id.eq(req.user_id))
        .order(chat_tickets::created_at.desc())
        .first(&mut conn)
        .optional()
        .map_err(db_err)?;

    if let Some(ticket) = latest {
        return Ok(Json(TicketEnvelope {
            ticket,
            created: false,
        }));
    }

    let ticket = insert_ticket(&state, &mut conn, req.user_id).await?;
    Ok(Json(TicketEnvelope {
        ticket,
        created: true,
    }))
}

/// Explicit ticket creation, used after a closed ticket to start a new
/// conversation. A member has at most one non-closed ticket: if one already
/// exists it is returned instead of inserting a duplicate.
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenChatRequest>,
) -> Result<Json<TicketEnvelope>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    if let Some(ticket) = find_open_ticket(&mut conn, req.user_id).map_err(db_err)? {
        info!("User {} already has open ticket {}", req.user_id, ticket.id);
        return Ok(Json(TicketEnvelope {
            ticket,
            created: false,
        }));
    }

    let ticket = insert_ticket(&state, &mut conn, req.user_id).await?;
    Ok(Json(TicketEnvelope {
        ticket,
        created: true,
    }))
}

async fn insert_ticket(
    state: &AppState,
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<ChatTicket, (StatusCode, String)> {
    let ticket = new_pending_ticket(user_id);

    match diesel::insert_into(chat_tickets::table)
        .values(&ticket)
        .execute(conn)
    {
        Ok(_) => {}
        Err(e) => {
            // The partial unique index on (user_id) WHERE status <> 'closed'
            // catches creation races between two tabs; the loser adopts the
            // winner's ticket.
            let existing = if is_unique_violation(&e) {
                find_open_ticket(conn, user_id).map_err(db_err)?
            } else {
                None
            };
            return match resolve_ticket_race(e, existing) {
                Ok(winner) => {
                    warn!(
                        "Ticket creation race for user {}, reusing {}",
                        user_id, winner.id
                    );
                    Ok(winner)
                }
                Err(err) => {
                    error!("Ticket insert failed: {}", err.1);
                    Err(err)
                }
            };
        }
    }

    info!("Created pending ticket {} for user {}", ticket.id, user_id);
    state
        .feed
        .publish(FeedEvent::TicketCreated {
            ticket_id: ticket.id,
            user_id,
            status: ticket.status.clone(),
            created_at: ticket.created_at,
        })
        .await;

    Ok(ticket)
}

fn is_unique_violation(e: &diesel::result::Error) -> bool {
    matches!(
        e,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )
    )
}

/// Outcome of a lost ticket insert. Only a unique violation with a live open
/// ticket means another caller won the race; anything else is a real failure.
fn resolve_ticket_race(
    err: diesel::result::Error,
    existing: Option<ChatTicket>,
) -> Result<ChatTicket, (StatusCode, String)> {
    if is_unique_violation(&err) {
        if let Some(ticket) = existing {
            return Ok(ticket);
        }
    }
    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Insert error: {err}"),
    ))
}

/// Full thread for one ticket, sender names joined in. When the caller says
/// who is looking, the response carries their unread count as well.
pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<TicketThread>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let ticket: ChatTicket = chat_tickets::table
        .filter(chat_tickets::id.eq(id))
        .first(&mut conn)
        .optional()
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    let messages: Vec<ChatMessage> = chat_messages::table
        .filter(chat_messages::ticket_id.eq(id))
        .order(chat_messages::created_at.asc())
        .load(&mut conn)
        .map_err(db_err)?;

    let mut sender_ids: Vec<Uuid> = messages.iter().map(|m| m.sender_id).collect();
    sender_ids.sort();
    sender_ids.dedup();

    let senders: Vec<(Uuid, String, String)> = profiles::table
        .filter(profiles::id.eq_any(&sender_ids))
        .select((profiles::id, profiles::full_name, profiles::role))
        .load(&mut conn)
        .map_err(db_err)?;
    let senders: HashMap<Uuid, (String, String)> = senders
        .into_iter()
        .map(|(sid, name, role)| (sid, (name, role)))
        .collect();

    let unread = query
        .viewer_id
        .map(|viewer| unread_for_viewer(messages.iter().map(|m| (&m.sender_id, m.is_read)), viewer));

    let messages = messages
        .into_iter()
        .map(|m| {
            let sender = senders.get(&m.sender_id);
            MessageView {
                id: m.id,
                sender_id: m.sender_id,
                content: m.content,
                is_read: m.is_read,
                created_at: m.created_at,
                sender_name: sender.map(|(name, _)| name.clone()),
                sender_role: sender.map(|(_, role)| role.clone()),
            }
        })
        .collect();

    Ok(Json(TicketThread {
        ticket,
        messages,
        unread,
    }))
}

/// Staff claims a pending ticket. The UPDATE carries the expected status in
/// its WHERE clause, so of two concurrent accepts exactly one wins and the
/// other gets a conflict instead of silently overwriting accepted_by.
pub async fn accept_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcceptTicketRequest>,
) -> Result<Json<ChatTicket>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;
    let now = Utc::now();

    let updated = diesel::update(
        chat_tickets::table
            .filter(chat_tickets::id.eq(id))
            .filter(chat_tickets::status.eq(TicketStatus::Pending.as_str())),
    )
    .set((
        chat_tickets::status.eq(TicketStatus::Active.as_str()),
        chat_tickets::accepted_by.eq(Some(req.staff_id)),
        chat_tickets::accepted_at.eq(Some(now)),
    ))
    .execute(&mut conn)
    .map_err(db_err)?;

    if updated == 0 {
        return Err(transition_conflict(&mut conn, id, TicketAction::Accept)?);
    }

    info!("Ticket {} accepted by {}", id, req.staff_id);
    state
        .feed
        .publish(FeedEvent::TicketUpdated {
            ticket_id: id,
            status: TicketStatus::Active.as_str().to_string(),
            accepted_by: Some(req.staff_id),
        })
        .await;

    load_ticket(&mut conn, id)
}

/// Staff closes an active ticket. Ownership is not checked: any officer may
/// close, not just the accepter.
pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatTicket>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let updated = diesel::update(
        chat_tickets::table
            .filter(chat_tickets::id.eq(id))
            .filter(chat_tickets::status.eq(TicketStatus::Active.as_str())),
    )
    .set(chat_tickets::status.eq(TicketStatus::Closed.as_str()))
    .execute(&mut conn)
    .map_err(db_err)?;

    if updated == 0 {
        return Err(transition_conflict(&mut conn, id, TicketAction::Close)?);
    }

    info!("Ticket {} closed", id);
    let ticket = load_ticket(&mut conn, id)?;
    state
        .feed
        .publish(FeedEvent::TicketUpdated {
            ticket_id: id,
            status: TicketStatus::Closed.as_str().to_string(),
            accepted_by: ticket.0.accepted_by,
        })
        .await;

    Ok(ticket)
}

/// Maps a zero-row CAS update to the right client error: 404 when the ticket
/// does not exist, 409 with the state-machine explanation otherwise.
fn transition_conflict(
    conn: &mut PgConnection,
    id: Uuid,
    action: TicketAction,
) -> Result<(StatusCode, String), (StatusCode, String)> {
    let current: Option<String> = chat_tickets::table
        .filter(chat_tickets::id.eq(id))
        .select(chat_tickets::status)
        .first(conn)
        .optional()
        .map_err(db_err)?;

    Ok(match current {
        None => (StatusCode::NOT_FOUND, "Ticket not found".to_string()),
        Some(status) => match TicketStatus::parse(&status) {
            Some(current) => match next_status(current, action) {
                // The CAS said no but the row now matches; a concurrent
                // transition raced us. Still a conflict for this caller.
                Ok(_) => (StatusCode::CONFLICT, "Ticket changed concurrently".to_string()),
                Err(e) => (StatusCode::CONFLICT, e.to_string()),
            },
            None => {
                warn!("Ticket {} has unknown status {:?}", id, status);
                (StatusCode::CONFLICT, format!("Ticket in unknown state {status}"))
            }
        },
    })
}

fn load_ticket(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Json<ChatTicket>, (StatusCode, String)> {
    let ticket: ChatTicket = chat_tickets::table
        .filter(chat_tickets::id.eq(id))
        .first(conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;
    Ok(Json(ticket))
}

/// Insert a chat line. Whitespace-only content is a no-op that persists
/// nothing; sends against a closed ticket are refused since closed tickets
/// are frozen.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, (StatusCode, String)> {
    let Some(content) = clean_content(&req.content) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let mut conn = state.conn.get().map_err(db_err)?;

    let status: String = chat_tickets::table
        .filter(chat_tickets::id.eq(id))
        .select(chat_tickets::status)
        .first(&mut conn)
        .optional()
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    if TicketStatus::parse(&status) == Some(TicketStatus::Closed) {
        return Err((
            StatusCode::CONFLICT,
            "Ticket is closed; open a new one to continue".to_string(),
        ));
    }

    let message = ChatMessage {
        id: Uuid::new_v4(),
        ticket_id: Some(id),
        sender_id: req.sender_id,
        content,
        is_read: false,
        created_at: Utc::now(),
    };

    diesel::insert_into(chat_messages::table)
        .values(&message)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    state
        .feed
        .publish(FeedEvent::MessageCreated {
            ticket_id: id,
            message_id: message.id,
            sender_id: message.sender_id,
            created_at: message.created_at,
        })
        .await;

    Ok((StatusCode::CREATED, Json(message)).into_response())
}

/// Flip the read flag on everything in the thread the viewer did not write.
/// Re-running is a no-op.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let rows: Vec<(Uuid, Uuid, bool)> = chat_messages::table
        .filter(chat_messages::ticket_id.eq(id))
        .select((chat_messages::id, chat_messages::sender_id, chat_messages::is_read))
        .load(&mut conn)
        .map_err(db_err)?;

    let targets = mark_read_targets(rows.iter().map(|(mid, s, r)| (mid, s, *r)), req.viewer_id);

    let updated = if targets.is_empty() {
        0
    } else {
        diesel::update(chat_messages::table.filter(chat_messages::id.eq_any(&targets)))
            .set(chat_messages::is_read.eq(true))
            .execute(&mut conn)
            .map_err(db_err)?
    };

    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// Staff console listing: every ticket partitioned by lifecycle state, with
/// requester name, last-message preview and the viewer's unread count.
pub async fn console_view(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConsoleQuery>,
) -> Result<Json<ConsoleView>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(db_err)?;

    let tickets: Vec<ChatTicket> = chat_tickets::table
        .order(chat_tickets::created_at.desc())
        .load(&mut conn)
        .map_err(db_err)?;

    let mut requester_ids: Vec<Uuid> = tickets.iter().map(|t| t.user_id).collect();
    requester_ids.sort();
    requester_ids.dedup();

    let names: Vec<(Uuid, String)> = profiles::table
        .filter(profiles::id.eq_any(&requester_ids))
        .select((profiles::id, profiles::full_name))
        .load(&mut conn)
        .map_err(db_err)?;
    let names: HashMap<Uuid, String> = names.into_iter().collect();

    let mut view = ConsoleView {
        pending: Vec::new(),
        active: Vec::new(),
        closed: Vec::new(),
    };

    for ticket in tickets {
        let last: Option<(String, DateTime<Utc>)> = chat_messages::table
            .filter(chat_messages::ticket_id.eq(ticket.id))
            .order(chat_messages::created_at.desc())
            .select((chat_messages::content, chat_messages::created_at))
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;

        let unread_count: i64 = chat_messages::table
            .filter(chat_messages::ticket_id.eq(ticket.id))
            .filter(chat_messages::sender_id.ne(query.viewer_id))
            .filter(chat_messages::is_read.eq(false))
            .count()
            .get_result(&mut conn)
            .map_err(db_err)?;

        let Some(status) = TicketStatus::parse(&ticket.status) else {
            warn!("Skipping ticket {} with unknown status {:?}", ticket.id, ticket.status);
            continue;
        };

        let entry = ConsoleTicket {
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            requester_name: names
                .get(&ticket.user_id)
                .cloned()
                .unwrap_or_else(|| format!("user_{}", ticket.user_id)),
            status: ticket.status.clone(),
            accepted_by: ticket.accepted_by,
            created_at: ticket.created_at,
            last_message: last.as_ref().map(|(content, _)| content.clone()),
            last_message_time: last.map(|(_, at)| at),
            unread_count,
        };

        match status {
            TicketStatus::Pending => view.pending.push(entry),
            TicketStatus::Active => view.active.push(entry),
            TicketStatus::Closed => view.closed.push(entry),
        }
    }

    Ok(Json(view))
}

pub fn configure_chat_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chat/open", post(open_chat))
        .route("/api/chat/tickets", post(create_ticket))
        .route("/api/chat/tickets/:id", get(get_thread))
        .route("/api/chat/tickets/:id/accept", put(accept_ticket))
        .route("/api/chat/tickets/:id/close", put(close_ticket))
        .route("/api/chat/tickets/:id/messages", post(send_message))
        .route("/api/chat/tickets/:id/read", put(mark_read))
        .route("/api/chat/tickets/:id/feed", get(feed::ticket_feed_ws))
        .route("/api/chat/console", get(console_view))
        .route("/api/chat/console/feed", get(feed::console_feed_ws))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_err, assert_ok};

    fn unique_violation() -> diesel::result::Error {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            Box::new(
                "duplicate key value violates unique constraint \"chat_tickets_one_open\""
                    .to_string(),
            ),
        )
    }

    #[test]
    fn creation_race_adopts_existing_open_ticket() {
        crate::tests::test_util::setup();
        let user = Uuid::new_v4();
        let winner = new_pending_ticket(user);

        let adopted = assert_ok!(resolve_ticket_race(unique_violation(), Some(winner.clone())));
        assert_eq!(adopted.id, winner.id);
        assert_eq!(adopted.user_id, user);
    }

    #[test]
    fn creation_race_without_open_ticket_is_an_error() {
        let err = assert_err!(resolve_ticket_race(unique_violation(), None));
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_unique_insert_errors_are_not_adopted() {
        let ticket = new_pending_ticket(Uuid::new_v4());
        let err = assert_err!(resolve_ticket_race(
            diesel::result::Error::NotFound,
            Some(ticket),
        ));
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!is_unique_violation(&diesel::result::Error::NotFound));
    }
}
