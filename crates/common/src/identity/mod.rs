//! External identity providers
//!
//! A login strategy names the provider that vouches for an SSO token. Each
//! provider answers two questions about the token's owner: which email
//! address they use, and what their profile says about them.

mod github;

pub use github::GithubProvider;

use crate::config::IdentityConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Profile facts used when provisioning a new local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
    pub login: String,
    pub name: Option<String>,
}

impl IdentityProfile {
    /// Display name, falling back to the login handle
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.login)
            .to_string()
    }
}

/// Trait for SSO identity lookups
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Strategy identifier clients send at login, e.g. `github`
    fn strategy(&self) -> &str;

    /// Email address of the token's owner
    async fn fetch_email(&self, token: &str) -> Result<String>;

    /// Profile of the token's owner
    async fn fetch_profile(&self, token: &str) -> Result<IdentityProfile>;
}

/// Providers keyed by strategy
#[derive(Clone, Default)]
pub struct IdentityProviders {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl IdentityProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the providers enabled by configuration (currently GitHub only)
    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        Ok(Self::new().with(Arc::new(GithubProvider::new(config)?)))
    }

    /// Register a provider under its own strategy name
    pub fn with(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.strategy().to_string(), provider);
        self
    }

    /// Resolve a strategy; unknown strategies are refused
    pub fn get(&self, strategy: &str) -> Result<Arc<dyn IdentityProvider>> {
        self.providers
            .get(strategy)
            .cloned()
            .ok_or_else(|| AppError::InvalidStrategy {
                strategy: strategy.to_string(),
            })
    }

    pub fn strategies(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// `Authorization` header value for an SSO token.
///
/// Frontends sometimes forward the token with its scheme already attached
/// (`token abc`, `Bearer abc`); those pass through untouched.
pub fn authorization_value(token: &str) -> String {
    let token = token.trim();
    if token.contains(char::is_whitespace) {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let named = IdentityProfile { login: "octocat".into(), name: Some("The Octocat".into()) };
        assert_eq!(named.display_name(), "The Octocat");

        let blank = IdentityProfile { login: "octocat".into(), name: Some("  ".into()) };
        assert_eq!(blank.display_name(), "octocat");

        let anonymous = IdentityProfile { login: "octocat".into(), name: None };
        assert_eq!(anonymous.display_name(), "octocat");
    }

    #[test]
    fn test_authorization_value() {
        assert_eq!(authorization_value("gho_abc"), "Bearer gho_abc");
        assert_eq!(authorization_value("token gho_abc"), "token gho_abc");
        assert_eq!(authorization_value("Bearer gho_abc"), "Bearer gho_abc");
    }

    #[test]
    fn test_unknown_strategy_is_refused() {
        let providers = IdentityProviders::from_config(&IdentityConfig::default()).unwrap();
        assert!(providers.get("github").is_ok());
        assert_eq!(providers.strategies(), vec!["github"]);

        let err = providers.get("gitlab").err().unwrap();
        assert!(matches!(err, AppError::InvalidStrategy { .. }));
    }
}
