use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Member profile row. Owned by the people module but consulted everywhere a
/// display name or role badge is needed, so it lives in the shared layer.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub xp: i32,
    pub level: i32,
    pub streak: i32,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub last_login_date: Option<chrono::NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Guest,
    Member,
    Officer,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Member => "member",
            Self::Officer => "officer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "guest" => Some(Self::Guest),
            "member" => Some(Self::Member),
            "officer" => Some(Self::Officer),
            _ => None,
        }
    }
}

pub mod schema {
    diesel::table! {
        profiles (id) {
            id -> Uuid,
            full_name -> Text,
            email -> Text,
            role -> Text,
            xp -> Int4,
            level -> Int4,
            streak -> Int4,
            avatar_url -> Nullable<Text>,
            bio -> Nullable<Text>,
            last_login_date -> Nullable<Date>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        chat_tickets (id) {
            id -> Uuid,
            user_id -> Uuid,
            status -> Text,
            accepted_by -> Nullable<Uuid>,
            accepted_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        chat_messages (id) {
            id -> Uuid,
            ticket_id -> Nullable<Uuid>,
            sender_id -> Uuid,
            content -> Text,
            is_read -> Bool,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        tasks (id) {
            id -> Uuid,
            title -> Text,
            description -> Nullable<Text>,
            task_type -> Text,
            difficulty -> Text,
            xp_reward -> Int4,
            requires_proof -> Bool,
            is_active -> Bool,
            due_date -> Nullable<Timestamptz>,
            created_by -> Nullable<Uuid>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        task_submissions (id) {
            id -> Uuid,
            task_id -> Uuid,
            user_id -> Uuid,
            status -> Text,
            notes -> Nullable<Text>,
            proof_url -> Nullable<Text>,
            feedback -> Nullable<Text>,
            submitted_at -> Timestamptz,
            reviewed_at -> Nullable<Timestamptz>,
            reviewed_by -> Nullable<Uuid>,
        }
    }

    diesel::table! {
        events (id) {
            id -> Uuid,
            title -> Text,
            description -> Nullable<Text>,
            location -> Nullable<Text>,
            start_time -> Timestamptz,
            end_time -> Timestamptz,
            capacity -> Nullable<Int4>,
            is_published -> Bool,
            created_by -> Nullable<Uuid>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        rsvps (id) {
            id -> Uuid,
            event_id -> Uuid,
            user_id -> Uuid,
            status -> Text,
            checked_in_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        announcements (id) {
            id -> Uuid,
            title -> Text,
            content -> Text,
            priority -> Nullable<Text>,
            is_pinned -> Bool,
            created_by -> Nullable<Uuid>,
            created_at -> Timestamptz,
        }
    }
}

pub use schema::*;
