//! src/services/auth_service.rs
//!
//! AuthService — tenant registration and credential-token resolution.
//! Thin by design: the engines only need a resolved owner id, and this is
//! the collaborator that produces one from an `X-Auth-Token` header.

use crate::models::tenant::Tenant;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const TENANT_COLUMNS: &str = "id, name, email, password_hash, api_token, created_at";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("a tenant with this email already exists")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing or invalid auth token")]
    InvalidToken,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Registers tenants, verifies logins, and resolves API tokens to tenant
/// records. Tokens are opaque UUIDs rotated on every login.
#[derive(Clone)]
pub struct AuthService {
    pub db: Arc<SqlitePool>,
}

impl AuthService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Register a new tenant. Emails are normalized to lowercase and must
    /// be unique; the initial API token is returned on the record.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> AuthResult<Tenant> {
        let email = email.trim().to_lowercase();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email,
            password_hash: hash_password(password),
            api_token: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO tenants (id, name, email, password_hash, api_token, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.email)
        .bind(&tenant.password_hash)
        .bind(&tenant.api_token)
        .bind(tenant.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {
                debug!(tenant = %tenant.id, "registered tenant");
                Ok(tenant)
            }
            Err(err) if is_unique_violation(&err) => Err(AuthError::EmailTaken),
            Err(err) => Err(AuthError::Sqlx(err)),
        }
    }

    /// Verify credentials and rotate the API token. Unknown email and bad
    /// password both map to InvalidCredentials so login probing learns
    /// nothing about which emails exist.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Tenant> {
        let email = email.trim().to_lowercase();
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE email = ?"
        ))
        .bind(&email)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &tenant.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let rotated = Uuid::new_v4().to_string();
        sqlx::query("UPDATE tenants SET api_token = ? WHERE id = ?")
            .bind(&rotated)
            .bind(tenant.id)
            .execute(&*self.db)
            .await?;

        Ok(Tenant {
            api_token: rotated,
            ..tenant
        })
    }

    /// Resolve an API token to the tenant that owns it.
    pub async fn resolve(&self, token: &str) -> AuthResult<Tenant> {
        if token.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE api_token = ?"
        ))
        .bind(token)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(AuthError::InvalidToken)
    }
}

/// Salted SHA-256, stored as `{salt}${hex_digest}`.
fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{salt}${}", digest_hex(&salt, password))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => digest_hex(salt, password) == digest,
        None => false,
    }
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Return true if a SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
