//! Represents a stored object (blob) and its metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata record for a single stored blob.
///
/// The record is the source of truth for existence: payload bytes on disk
/// are only reachable through the `object_key` recorded here. `object_key`
/// is system-generated and globally unique, distinct from the
/// human-supplied `file_name`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Tenant that owns this object.
    pub owner_id: Uuid,

    /// Name of the bucket this object was uploaded into.
    pub bucket_name: String,

    /// System-generated handle used for all downloads and deletes.
    pub object_key: String,

    /// Original filename supplied by the uploader.
    pub file_name: String,

    /// Content type (MIME type), if the uploader declared one.
    pub content_type: Option<String>,

    /// Payload size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: String,

    /// Object version; always 1 until versioned overwrite lands.
    pub version: i64,

    /// When the object was uploaded.
    pub created_at: DateTime<Utc>,
}
