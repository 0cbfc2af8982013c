//! Represents a tenant — the authenticated identity that scopes all
//! queue and object visibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An account on the platform. Every bucket, object, and queue message
/// is owned by exactly one tenant, and engine calls never cross owners.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Tenant {
    /// Unique identifier (UUID for internal DB use).
    pub id: Uuid,

    /// Display name chosen at registration.
    pub name: String,

    /// Login email, unique across all tenants.
    pub email: String,

    /// Salted password digest. Never serialized back to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Opaque credential presented on every API call. Rotated on login.
    pub api_token: String,

    /// When this tenant registered.
    pub created_at: DateTime<Utc>,
}
