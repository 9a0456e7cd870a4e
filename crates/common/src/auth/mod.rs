//! Authentication utilities
//!
//! Provides:
//! - API key validation for frontend requests
//! - Session resolution from the `Authorization` header
//! - The SSO login flow (see [`LoginService`])

mod login;

pub use login::{LoginResult, LoginService};

use crate::config::AppConfig;
use crate::db::{DbPool, Repository};
use crate::errors::{AppError, Result};
use crate::db::models::{Person, Session, User};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Hash an API key for comparison
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validate an API key against a stored hash
pub fn validate_api_key(api_key: &str, stored_hash: &str) -> bool {
    hash_api_key(api_key) == stored_hash
}

/// Session token from an Authorization header value; the `Bearer ` prefix is optional
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let token = auth_header
        .strip_prefix("Bearer ")
        .unwrap_or(auth_header)
        .trim();

    (!token.is_empty()).then_some(token)
}

/// Proof that the caller presented the configured API key
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
    Arc<AppConfig>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let config = Arc::<AppConfig>::from_ref(state);

        let Some(expected) = config.auth.api_key.as_deref() else {
            return Ok(ApiKey);
        };

        let presented = parts
            .headers
            .get(config.auth.api_key_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::InvalidApiKey)?;

        if validate_api_key(presented, &hash_api_key(expected)) {
            Ok(ApiKey)
        } else {
            Err(AppError::InvalidApiKey)
        }
    }
}

/// Logged-in caller, resolved from a valid session token
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
    pub user: User,
    pub person: Person,
}

impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
    DbPool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let no_session = || AppError::Unauthorized {
            message: "no active login session found. please login to continue".to_string(),
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer_token)
            .ok_or_else(no_session)?;

        let repo = Repository::new(DbPool::from_ref(state));
        let found = repo
            .find_valid_session_with_user(token)
            .await?
            .ok_or_else(no_session)?;

        Ok(SessionContext {
            session: found.session,
            user: found.user,
            person: found.person,
        })
    }
}
