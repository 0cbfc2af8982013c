//! Core data models for the multi-tenant queue and object store.
//!
//! These entities represent tenants, their buckets, stored objects, and
//! queue messages. They map cleanly to database tables via `sqlx::FromRow`
//! and serialize naturally as JSON via `serde`.

pub mod bucket;
pub mod message;
pub mod object;
pub mod tenant;
