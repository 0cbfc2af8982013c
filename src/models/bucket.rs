//! Represents a logical bucket — a tenant-owned container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket. Bucket names are unique per owner, not globally;
/// two tenants may each have a bucket called `photos` without conflict.
/// A bucket must exist before any object can be uploaded into it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name, unique within the owning tenant.
    pub name: String,

    /// Tenant that owns this bucket.
    pub owner_id: Uuid,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
