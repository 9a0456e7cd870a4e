//! SSO login flow
//!
//! A token is first checked against stored sessions. Only unknown tokens
//! reach the identity provider; its answer is then matched to a local user
//! (or provisions one) and a session is created for the token.

use crate::db::models::{Person, Session, User};
use crate::db::{Repository, SessionWithUser};
use crate::errors::{AppError, Result};
use crate::identity::IdentityProviders;
use crate::metrics::{self, LoginOutcome};
use super::extract_bearer_token;
use tracing::{debug, info, warn};

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: User,
    pub person: Person,
    pub session: Session,
    pub outcome: LoginOutcome,
}

impl LoginResult {
    fn new(found: SessionWithUser, outcome: LoginOutcome) -> Self {
        Self {
            user: found.user,
            person: found.person,
            session: found.session,
            outcome,
        }
    }

    /// Client-facing status line
    pub fn message(&self) -> String {
        let detail = match self.outcome {
            LoginOutcome::ExistingSession => "valid session",
            LoginOutcome::NewSession => "created new session",
            LoginOutcome::NewUser => "new session",
            LoginOutcome::RaceRecovered => "existing valid session",
            LoginOutcome::Failed => "failed",
        };
        format!("login successful: {}", detail)
    }
}

/// Login service
#[derive(Clone)]
pub struct LoginService {
    repo: Repository,
    providers: IdentityProviders,
    ttl: chrono::Duration,
}

impl LoginService {
    pub fn new(repo: Repository, providers: IdentityProviders, ttl: chrono::Duration) -> Self {
        Self { repo, providers, ttl }
    }

    /// Log in with an SSO token issued by `strategy`
    pub async fn login(&self, strategy: &str, token: &str) -> Result<LoginResult> {
        match self.authenticate(strategy, token).await {
            Ok(result) => {
                metrics::record_login(strategy, result.outcome);
                info!(
                    user_id = %result.user.id,
                    session_id = %result.session.id,
                    outcome = result.outcome.as_str(),
                    "Login succeeded"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::record_login(strategy, LoginOutcome::Failed);
                warn!(strategy = strategy, error = %e, "Login failed");
                Err(e)
            }
        }
    }

    async fn authenticate(&self, strategy: &str, token: &str) -> Result<LoginResult> {
        let provider = self.providers.get(strategy)?;

        // Sessions are keyed by the bare token, as `SessionContext` looks them up
        let token = extract_bearer_token(token).ok_or_else(|| AppError::Validation {
            message: "missing SSO token from auth provider".to_string(),
            field: Some("token".to_string()),
        })?;

        if let Some(existing) = self.repo.find_valid_session_with_user(token).await? {
            debug!(session_id = %existing.session.id, "Token has a valid session");
            return Ok(LoginResult::new(existing, LoginOutcome::ExistingSession));
        }

        let email = provider.fetch_email(token).await?;
        let profile = provider.fetch_profile(token).await?;

        let (creation, outcome) = match self.repo.find_user_by_email(&email).await? {
            Some((user, _)) => {
                debug!(user_id = %user.id, "Matched existing user by email");
                let creation = self.repo.create_session(user.id, token, self.ttl).await?;
                (creation, LoginOutcome::NewSession)
            }
            None => {
                debug!(login = %profile.login, "Provisioning new user");
                let creation = self
                    .repo
                    .create_user_with_session(Some(profile.display_name()), &email, token, self.ttl)
                    .await?;
                (creation, LoginOutcome::NewUser)
            }
        };

        let outcome = if creation.created {
            outcome
        } else {
            LoginOutcome::RaceRecovered
        };

        // The session may belong to a concurrent winner rather than the user matched above
        let owner = self.repo.load_session_owner(creation.session).await?;
        Ok(LoginResult::new(owner, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{SessionEntity, UserEntity};
    use crate::errors::AppError;
    use crate::testing::{insert_user, memory_db, shared_memory_db, StubProvider};
    use axum::http::StatusCode;
    use sea_orm::{EntityTrait, PaginatorTrait};
    use std::sync::Arc;
    use std::time::Duration;

    async fn service(stub: Arc<StubProvider>) -> (LoginService, Repository) {
        let repo = Repository::new(memory_db().await);
        let providers = IdentityProviders::new().with(stub);
        let service = LoginService::new(repo.clone(), providers, chrono::Duration::minutes(60));
        (service, repo)
    }

    #[tokio::test]
    async fn test_valid_session_skips_identity_provider() {
        let stub = Arc::new(StubProvider::github("ada@example.org", "ada"));
        let (service, repo) = service(stub.clone()).await;
        let (user, _) = insert_user(&repo, "ada@example.org", false).await;
        repo.create_session(user.id, "tok-known", chrono::Duration::minutes(5))
            .await
            .unwrap();

        let result = service.login("github", "tok-known").await.unwrap();
        assert_eq!(result.outcome, LoginOutcome::ExistingSession);
        assert_eq!(result.user.id, user.id);
        assert_eq!(result.message(), "login successful: valid session");
        assert_eq!(stub.calls(), (0, 0));
    }

    #[tokio::test]
    async fn test_new_user_is_provisioned() {
        let stub = Arc::new(StubProvider::github("grace@example.org", "ghopper").with_name("Grace Hopper"));
        let (service, repo) = service(stub.clone()).await;

        let result = service.login("github", "tok-new").await.unwrap();
        assert_eq!(result.outcome, LoginOutcome::NewUser);
        assert_eq!(result.message(), "login successful: new session");
        assert_eq!(result.person.name.as_deref(), Some("Grace Hopper"));
        assert_eq!(result.person.email.as_deref(), Some("grace@example.org"));
        assert!(!result.user.can_admin);
        assert!(!result.session.is_admin);
        assert_eq!(stub.calls(), (1, 1));

        let again = service.login("github", "tok-new").await.unwrap();
        assert_eq!(again.outcome, LoginOutcome::ExistingSession);
        assert_eq!(again.user.id, result.user.id);
        assert_eq!(UserEntity::find().count(repo.write_conn()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_known_email_gets_new_session() {
        let stub = Arc::new(StubProvider::github("ada@example.org", "ada"));
        let (service, repo) = service(stub).await;
        let (user, _) = insert_user(&repo, "ada@example.org", true).await;

        let result = service.login("github", "tok-fresh").await.unwrap();
        assert_eq!(result.outcome, LoginOutcome::NewSession);
        assert_eq!(result.message(), "login successful: created new session");
        assert_eq!(result.user.id, user.id);
        assert!(result.user.can_admin);
    }

    #[tokio::test]
    async fn test_rejected_token_reports_provider_status() {
        let stub = Arc::new(StubProvider::rejecting(401));
        let (service, repo) = service(stub).await;

        let err = service.login("github", "tok-bad").await.unwrap_err();
        assert!(matches!(err, AppError::IdentityProvider { status: 401, .. }));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(SessionEntity::find().count(repo.write_conn()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_forbidden() {
        let stub = Arc::new(StubProvider::github("ada@example.org", "ada"));
        let (service, _) = service(stub.clone()).await;

        let err = service.login("gitlab", "tok").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(stub.calls(), (0, 0));
    }

    #[tokio::test]
    async fn test_bearer_scheme_is_stripped_from_stored_token() {
        let stub = Arc::new(StubProvider::github("ada@example.org", "ada"));
        let (service, repo) = service(stub.clone()).await;

        let result = service.login("github", "Bearer gho_abc").await.unwrap();
        assert_eq!(result.session.sso_token, "gho_abc");
        assert!(repo.find_valid_session("gho_abc").await.unwrap().is_some());

        let again = service.login("github", "gho_abc").await.unwrap();
        assert_eq!(again.outcome, LoginOutcome::ExistingSession);
        assert_eq!(stub.calls(), (1, 1));

        let err = service.login("github", "Bearer ").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_logins_share_one_session() {
        let stub = Arc::new(
            StubProvider::github("race@example.org", "racer").with_delay(Duration::from_millis(25)),
        );
        let repo = Repository::new(shared_memory_db().await);
        let providers = IdentityProviders::new().with(stub);
        let service = LoginService::new(repo.clone(), providers, chrono::Duration::minutes(60));

        let (first, second) = tokio::join!(
            service.login("github", "tok-race"),
            service.login("github", "tok-race"),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.user.id, second.user.id);
        assert_eq!(first.session.id, second.session.id);

        let mut outcomes = vec![first.outcome, second.outcome];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(outcomes, vec![LoginOutcome::NewUser, LoginOutcome::RaceRecovered]);

        assert_eq!(SessionEntity::find().count(repo.write_conn()).await.unwrap(), 1);
        assert_eq!(UserEntity::find().count(repo.write_conn()).await.unwrap(), 1);
    }
}
