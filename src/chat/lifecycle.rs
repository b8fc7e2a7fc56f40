use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Ticket lifecycle: pending -> active -> closed. Closed is terminal; a
/// member who needs help again opens a brand-new ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Active,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAction {
    Accept,
    Close,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("ticket is {actual}, expected {expected}")]
    WrongState {
        expected: TicketStatus,
        actual: TicketStatus,
    },
}

/// The only legal transitions. Accept requires pending, close requires
/// active; everything else is a conflict. The database update repeats the
/// expected-status check in its WHERE clause so concurrent callers resolve
/// deterministically instead of last-write-wins.
pub fn next_status(current: TicketStatus, action: TicketAction) -> Result<TicketStatus, TransitionError> {
    let expected = match action {
        TicketAction::Accept => TicketStatus::Pending,
        TicketAction::Close => TicketStatus::Active,
    };
    if current != expected {
        return Err(TransitionError::WrongState {
            expected,
            actual: current,
        });
    }
    Ok(match action {
        TicketAction::Accept => TicketStatus::Active,
        TicketAction::Close => TicketStatus::Closed,
    })
}

/// Trims message content; whitespace-only input yields None and the send
/// becomes a no-op that persists nothing.
pub fn clean_content(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// A message counts as unread for a viewer when someone else wrote it and the
/// read flag has not been set yet.
pub fn is_unread_for(viewer: Uuid, sender: Uuid, is_read: bool) -> bool {
    !is_read && sender != viewer
}

pub fn unread_for_viewer<'a, I>(messages: I, viewer: Uuid) -> i64
where
    I: IntoIterator<Item = (&'a Uuid, bool)>,
{
    messages
        .into_iter()
        .filter(|(sender, is_read)| is_unread_for(viewer, **sender, *is_read))
        .count() as i64
}

/// Ids of the messages a mark-read pass flips: exactly the ones still unread
/// for the viewer. A second pass over the flipped rows selects nothing, which
/// is what makes mark-read safe to repeat.
pub fn mark_read_targets<'a, I>(messages: I, viewer: Uuid) -> Vec<Uuid>
where
    I: IntoIterator<Item = (&'a Uuid, &'a Uuid, bool)>,
{
    messages
        .into_iter()
        .filter(|(_, sender, is_read)| is_unread_for(viewer, **sender, *is_read))
        .map(|(id, _, _)| *id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_err, assert_ok};

    #[test]
    fn accept_moves_pending_to_active() {
        crate::tests::test_util::setup();
        let next = assert_ok!(next_status(TicketStatus::Pending, TicketAction::Accept));
        assert_eq!(next, TicketStatus::Active);
    }

    #[test]
    fn close_moves_active_to_closed() {
        let next = assert_ok!(next_status(TicketStatus::Active, TicketAction::Close));
        assert_eq!(next, TicketStatus::Closed);
    }

    #[test]
    fn accept_rejects_non_pending() {
        for current in [TicketStatus::Active, TicketStatus::Closed] {
            let err = assert_err!(next_status(current, TicketAction::Accept));
            assert_eq!(
                err,
                TransitionError::WrongState {
                    expected: TicketStatus::Pending,
                    actual: current,
                }
            );
        }
    }

    #[test]
    fn close_rejects_non_active() {
        for current in [TicketStatus::Pending, TicketStatus::Closed] {
            let err = assert_err!(next_status(current, TicketAction::Close));
            assert_eq!(
                err,
                TransitionError::WrongState {
                    expected: TicketStatus::Active,
                    actual: current,
                }
            );
        }
    }

    #[test]
    fn closed_is_terminal() {
        assert!(next_status(TicketStatus::Closed, TicketAction::Accept).is_err());
        assert!(next_status(TicketStatus::Closed, TicketAction::Close).is_err());
        assert!(!TicketStatus::Closed.is_open());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [TicketStatus::Pending, TicketStatus::Active, TicketStatus::Closed] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("resolved"), None);
    }

    #[test]
    fn clean_content_trims_and_drops_blank() {
        assert_eq!(clean_content("  Hello  "), Some("Hello".to_string()));
        assert_eq!(clean_content("Hello"), Some("Hello".to_string()));
        assert_eq!(clean_content(""), None);
        assert_eq!(clean_content("   \t\n"), None);
    }

    #[test]
    fn unread_ignores_own_and_read_messages() {
        let viewer = Uuid::new_v4();
        let other = Uuid::new_v4();

        assert!(is_unread_for(viewer, other, false));
        assert!(!is_unread_for(viewer, other, true));
        assert!(!is_unread_for(viewer, viewer, false));

        let rows = [(other, false), (other, true), (viewer, false), (other, false)];
        let count = unread_for_viewer(rows.iter().map(|(s, r)| (s, *r)), viewer);
        assert_eq!(count, 2);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let viewer = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut rows = vec![
            (Uuid::new_v4(), other, false),
            (Uuid::new_v4(), other, true),
            (Uuid::new_v4(), viewer, false),
            (Uuid::new_v4(), other, false),
        ];

        let targets = mark_read_targets(rows.iter().map(|(i, s, r)| (i, s, *r)), viewer);
        assert_eq!(targets, vec![rows[0].0, rows[3].0]);

        // Flip the targeted rows as the update would, then run again: nothing
        // left to flip, own and already-read messages untouched.
        for row in &mut rows {
            if targets.contains(&row.0) {
                row.2 = true;
            }
        }
        let second = mark_read_targets(rows.iter().map(|(i, s, r)| (i, s, *r)), viewer);
        assert!(second.is_empty());
        assert!(!rows[2].2);
    }
}
