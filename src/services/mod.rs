//! Engine services: tenant auth, durable queues, and blob storage.

pub mod auth_service;
pub mod queue_service;
pub mod store_service;
