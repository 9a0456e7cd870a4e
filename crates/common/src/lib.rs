//! SEARCCH Common Library
//!
//! Shared code for the SEARCCH backend including:
//! - Database models, schema bootstrap and repository
//! - SSO identity providers and the login flow
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod metrics;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use identity::IdentityProviders;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
