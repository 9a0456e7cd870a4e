//! GitHub REST API identity provider

use super::{authorization_value, IdentityProfile, IdentityProvider};
use crate::config::IdentityConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::time::{Duration, Instant};

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// GitHub client
pub struct GithubProvider {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    name: Option<String>,
}

impl GithubProvider {
    /// Create a new GitHub provider
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_base: config.github_api_base.trim_end_matches('/').to_string(),
        })
    }

    /// GET an API path with the token; non-2xx answers become `IdentityProvider` errors
    async fn get(&self, path: &str, token: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.api_base, path);
        let start = Instant::now();

        let response = self.client
            .get(&url)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header(AUTHORIZATION, authorization_value(token))
            .send()
            .await?;

        let status = response.status();
        metrics::record_identity_request(
            start.elapsed().as_secs_f64(),
            self.strategy(),
            path,
            status.as_u16(),
        );

        if !status.is_success() {
            tracing::info!(
                path = path,
                status = status.as_u16(),
                "GitHub rejected SSO token"
            );
            return Err(AppError::IdentityProvider {
                status: status.as_u16(),
                message: "invalid SSO token".to_string(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl IdentityProvider for GithubProvider {
    fn strategy(&self) -> &str {
        "github"
    }

    async fn fetch_email(&self, token: &str) -> Result<String> {
        let emails: Vec<GithubEmail> = self.get("/user/emails", token).await?.json().await?;
        pick_email(emails).ok_or_else(|| AppError::Unauthorized {
            message: "no email address associated with SSO account".to_string(),
        })
    }

    async fn fetch_profile(&self, token: &str) -> Result<IdentityProfile> {
        let user: GithubUser = self.get("/user", token).await?.json().await?;
        Ok(IdentityProfile {
            login: user.login,
            name: user.name,
        })
    }
}

/// The primary address when GitHub flags one, else the first listed
fn pick_email(emails: Vec<GithubEmail>) -> Option<String> {
    let primary = emails.iter().position(|e| e.primary).unwrap_or(0);
    emails.into_iter().nth(primary).map(|e| e.email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;

    fn authorized(headers: &HeaderMap) -> bool {
        let auth_ok = headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer good");
        let accept_ok = headers.get("accept").and_then(|v| v.to_str().ok()) == Some(GITHUB_MEDIA_TYPE);
        auth_ok && accept_ok
    }

    async fn emails(headers: HeaderMap) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Bad credentials" })));
        }
        (StatusCode::OK, Json(json!([
            { "email": "old@example.org", "primary": false, "verified": true },
            { "email": "octo@example.org", "primary": true, "verified": true },
        ])))
    }

    async fn user(headers: HeaderMap) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Bad credentials" })));
        }
        (StatusCode::OK, Json(json!({ "login": "octocat", "name": null, "id": 1 })))
    }

    async fn spawn_stub_github() -> String {
        let app = Router::new()
            .route("/user/emails", get(emails))
            .route("/user", get(user));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn provider(api_base: String) -> GithubProvider {
        GithubProvider::new(&IdentityConfig {
            github_api_base: api_base,
            ..IdentityConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_pick_email_prefers_primary() {
        let emails = vec![
            GithubEmail { email: "a@example.org".into(), primary: false },
            GithubEmail { email: "b@example.org".into(), primary: true },
        ];
        assert_eq!(pick_email(emails), Some("b@example.org".into()));

        let emails = vec![GithubEmail { email: "a@example.org".into(), primary: false }];
        assert_eq!(pick_email(emails), Some("a@example.org".into()));

        assert_eq!(pick_email(Vec::new()), None);
    }

    #[tokio::test]
    async fn test_fetch_email_and_profile() {
        let github = provider(spawn_stub_github().await);

        assert_eq!(github.fetch_email("good").await.unwrap(), "octo@example.org");

        let profile = github.fetch_profile("good").await.unwrap();
        assert_eq!(profile.login, "octocat");
        assert_eq!(profile.display_name(), "octocat");
    }

    #[tokio::test]
    async fn test_rejected_token_carries_provider_status() {
        let github = provider(spawn_stub_github().await);

        let err = github.fetch_email("bad").await.unwrap_err();
        match err {
            AppError::IdentityProvider { status, ref message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid SSO token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        assert!(matches!(
            github.fetch_profile("bad").await,
            Err(AppError::IdentityProvider { status: 401, .. })
        ));
    }
}
