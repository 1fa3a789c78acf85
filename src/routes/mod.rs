//! REST route handlers. Thin adapters over [`crate::sessions::SessionManager`].

pub mod connections;
pub mod events;
pub mod health;
