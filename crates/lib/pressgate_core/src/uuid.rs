//! Identifier helpers for ads, payments and locally issued users.
//!
//! Ad and payment ids are UUIDv7 so they sort by creation time in logs.
//! Local user ids are UUIDv5 over the username so that signing the same
//! name in twice yields the same id.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Stable user id derived from a username.
pub fn user_id_for(username: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, username.as_bytes())
}
