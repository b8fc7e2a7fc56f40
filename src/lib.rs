pub mod announcements;
pub mod api_router;
pub mod chat;
pub mod config;
pub mod events;
pub mod people;
pub mod shared;
pub mod tasks;
pub mod tests;
