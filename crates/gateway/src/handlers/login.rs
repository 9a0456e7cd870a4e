//! Login handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use searcch_common::{
    auth::{ApiKey, LoginService, SessionContext},
    db::{models::Person, Repository},
    errors::{AppError, Result},
};

/// Login with an SSO token
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Identity provider that issued the token
    #[serde(default)]
    pub strategy: String,

    #[validate(length(min = 1, message = "missing SSO token from auth provider"))]
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub userid: Uuid,
    pub person: Person,
    pub can_admin: bool,
    pub is_admin: bool,
    pub message: String,
}

/// Switch the caller's session in or out of admin mode
#[derive(Debug, Deserialize)]
pub struct AdminModeRequest {
    pub is_admin: bool,
}

/// POST /login
pub async fn login(
    _key: ApiKey,
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    state.providers.get(&request.strategy)?;
    request.validate()?;

    let service = LoginService::new(
        Repository::new(state.db.clone()),
        state.providers.clone(),
        state.config.session_ttl()?,
    );
    let result = service.login(&request.strategy, &request.token).await?;

    Ok(Json(LoginResponse {
        userid: result.user.id,
        can_admin: result.user.can_admin,
        is_admin: result.session.is_admin,
        message: result.message(),
        person: result.person,
    }))
}

/// PUT /login
pub async fn set_admin_mode(
    _key: ApiKey,
    State(state): State<AppState>,
    ctx: SessionContext,
    Json(request): Json<AdminModeRequest>,
) -> Result<StatusCode> {
    if !ctx.user.can_admin {
        return Err(AppError::Forbidden {
            message: "unauthorized".to_string(),
        });
    }

    let repo = Repository::new(state.db.clone());
    let session = repo.set_session_admin(ctx.session, request.is_admin).await?;

    tracing::info!(
        user_id = %ctx.user.id,
        session_id = %session.id,
        is_admin = session.is_admin,
        "Admin mode changed"
    );

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{json_request, logged_in, send, test_app, test_app_with, API_KEY};
    use axum::http::StatusCode;
    use searcch_common::testing::StubProvider;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_login_provisions_user() {
        let (app, _) = test_app(Some(API_KEY)).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "gho_1" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "login successful: new session");
        assert_eq!(body["person"]["email"], "octo@example.org");
        assert_eq!(body["person"]["name"], "octocat");
        assert_eq!(body["can_admin"], false);
        assert_eq!(body["is_admin"], false);
        assert!(body["person"].get("sso_token").is_none());

        let (status, again) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "gho_1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["message"], "login successful: valid session");
        assert_eq!(again["userid"], body["userid"]);
    }

    #[tokio::test]
    async fn test_login_rejects_unknown_strategy() {
        let (app, _) = test_app(Some(API_KEY)).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "gitlab", "token": "gho_1" })),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("missing/incorrect strategy"));

        let (status, _) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "gitlab", "token": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_scheme_prefixed_token_opens_session() {
        let (app, _) = test_app(Some(API_KEY)).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "Bearer gho_x" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "login successful: new session");

        let (status, again) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "gho_x" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["message"], "login successful: valid session");

        // json_request sends `Authorization: Bearer gho_x`
        let (status, body) = send(
            &app,
            json_request("PUT", "/login", Some("gho_x"), json!({ "is_admin": true })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["message"], "unauthorized");
    }

    #[tokio::test]
    async fn test_login_requires_api_key() {
        let (app, _) = test_app(Some("another-key")).await;

        let (status, _) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "gho_1" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_passes_through_provider_status() {
        let (app, _) = test_app_with(Some(API_KEY), Arc::new(StubProvider::rejecting(401))).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "expired" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "invalid SSO token");
    }

    #[tokio::test]
    async fn test_login_validates_token() {
        let (app, _) = test_app(Some(API_KEY)).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/login", None, json!({ "strategy": "github", "token": "" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "token");
    }

    #[tokio::test]
    async fn test_admin_mode_requires_can_admin() {
        let (app, repo) = test_app(Some(API_KEY)).await;
        logged_in(&repo, "user@example.org", false, "tok-user").await;
        logged_in(&repo, "root@example.org", true, "tok-root").await;

        let (status, body) = send(
            &app,
            json_request("PUT", "/login", Some("tok-user"), json!({ "is_admin": true })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["message"], "unauthorized");

        let (status, body) = send(
            &app,
            json_request("PUT", "/login", Some("tok-root"), json!({ "is_admin": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());
        assert!(repo.find_valid_session("tok-root").await.unwrap().unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_admin_mode_requires_session() {
        let (app, _) = test_app(Some(API_KEY)).await;

        let (status, body) = send(
            &app,
            json_request("PUT", "/login", Some("tok-unknown"), json!({ "is_admin": true })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body["error"]["message"],
            "no active login session found. please login to continue"
        );
    }
}
