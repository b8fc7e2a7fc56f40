use chrono::Utc;
use clubserver::chat::feed::{ChangeFeed, FeedEvent};
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

fn message_event(ticket_id: Uuid) -> FeedEvent {
    FeedEvent::MessageCreated {
        ticket_id,
        message_id: Uuid::new_v4(),
        sender_id: Uuid::new_v4(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn console_sees_every_ticket() {
    let feed = ChangeFeed::new();
    let mut console = feed.subscribe_console();

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    feed.publish(message_event(a)).await;
    feed.publish(message_event(b)).await;

    let first = console.try_recv().expect("first event");
    let second = console.try_recv().expect("second event");
    assert_eq!(first.ticket_id(), a);
    assert_eq!(second.ticket_id(), b);
    assert!(matches!(console.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn ticket_subscription_is_scoped() {
    let feed = ChangeFeed::new();

    let mine = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut rx = feed.subscribe_ticket(mine).await;

    feed.publish(message_event(other)).await;
    feed.publish(message_event(mine)).await;

    // Only the event for the subscribed ticket arrives; no client-side
    // filtering of a global stream.
    let event = rx.try_recv().expect("own ticket event");
    assert_eq!(event.ticket_id(), mine);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn publish_without_subscribers_is_harmless() {
    let feed = ChangeFeed::new();
    feed.publish(message_event(Uuid::new_v4())).await;

    let ticket = Uuid::new_v4();
    let mut rx = feed.subscribe_ticket(ticket).await;
    feed.publish(FeedEvent::TicketUpdated {
        ticket_id: ticket,
        status: "active".to_string(),
        accepted_by: Some(Uuid::new_v4()),
    })
    .await;

    assert!(matches!(
        rx.try_recv().expect("update event"),
        FeedEvent::TicketUpdated { .. }
    ));
}
