use crate::shared::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 100;

/// Row-level change notifications pushed to subscribed views. Events are
/// scoped: a thread subscriber only sees its own ticket, the staff console
/// sees everything. Delivery is best-effort; a lagging subscriber is dropped
/// by the bounded channel and reconnects with a fresh fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedEvent {
    TicketCreated {
        ticket_id: Uuid,
        user_id: Uuid,
        status: String,
        created_at: DateTime<Utc>,
    },
    TicketUpdated {
        ticket_id: Uuid,
        status: String,
        accepted_by: Option<Uuid>,
    },
    MessageCreated {
        ticket_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        created_at: DateTime<Utc>,
    },
}

impl FeedEvent {
    pub fn ticket_id(&self) -> Uuid {
        match self {
            Self::TicketCreated { ticket_id, .. }
            | Self::TicketUpdated { ticket_id, .. }
            | Self::MessageCreated { ticket_id, .. } => *ticket_id,
        }
    }
}

/// In-process change feed. One broadcast channel per ticket plus a
/// console-wide channel, so subscribers never have to filter a global stream
/// client-side.
pub struct ChangeFeed {
    tickets: RwLock<HashMap<Uuid, broadcast::Sender<FeedEvent>>>,
    console: broadcast::Sender<FeedEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            console: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub async fn subscribe_ticket(&self, ticket_id: Uuid) -> broadcast::Receiver<FeedEvent> {
        let mut tickets = self.tickets.write().await;
        tickets
            .entry(ticket_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_console(&self) -> broadcast::Receiver<FeedEvent> {
        self.console.subscribe()
    }

    pub async fn publish(&self, event: FeedEvent) {
        // Errors just mean nobody is listening right now.
        let _ = self.console.send(event.clone());

        let ticket_id = event.ticket_id();
        let mut tickets = self.tickets.write().await;
        if let Some(tx) = tickets.get(&ticket_id) {
            if tx.send(event).is_err() && tx.receiver_count() == 0 {
                tickets.remove(&ticket_id);
            }
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ticket_feed_ws(
    ws: WebSocketUpgrade,
    Path(ticket_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let rx = state.feed.subscribe_ticket(ticket_id).await;
        forward_events(socket, rx).await;
        debug!("Ticket feed subscriber for {} disconnected", ticket_id);
    })
}

pub async fn console_feed_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let rx = state.feed.subscribe_console();
        forward_events(socket, rx).await;
        debug!("Console feed subscriber disconnected");
    })
}

async fn forward_events(socket: WebSocket, mut rx: broadcast::Receiver<FeedEvent>) {
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Failed to serialize feed event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Feed subscriber lagged, dropped {} events", skipped);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // The feed is push-only; drain client frames so pings are answered and a
    // close frame ends the connection.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
