//! User model.
//!
//! Credential issuance and verification belong to the auth collaborator; the
//! engine only reads identity and owns the one-shot `trial_claimed` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Bumped on password change to invalidate previously issued sessions.
    pub credential_epoch: i32,
    /// Monotonic false -> true, set by the trial claim compare-and-set.
    pub trial_claimed: bool,
    pub registered_utc: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
}
