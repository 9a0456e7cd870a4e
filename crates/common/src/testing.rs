//! Test fixtures
//!
//! In-memory SQLite pools, row builders, and a scripted identity provider.
//! Compiled for this crate's tests and, through the `test-util` feature, for
//! downstream crates' tests.

use crate::db::models::*;
use crate::db::schema::create_schema;
use crate::db::{DbPool, Repository};
use crate::errors::{AppError, Result};
use crate::identity::{IdentityProfile, IdentityProvider};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Fresh in-memory database with the full schema.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn memory_db() -> DbPool {
    open_memory_db("sqlite::memory:".to_string(), 1).await
}

/// In-memory database shared by several pooled connections, so concurrent
/// transactions really overlap. Each call gets its own database name.
pub async fn shared_memory_db() -> DbPool {
    let url = format!(
        "sqlite:file:searcch-{}?mode=memory&cache=shared",
        Uuid::new_v4().simple()
    );
    open_memory_db(url, 4).await
}

async fn open_memory_db(url: String, max_connections: u32) -> DbPool {
    let mut opts = ConnectOptions::new(url);
    // The database lives only while a connection is open
    opts.max_connections(max_connections)
        .min_connections(1)
        .sqlx_logging(false);

    let conn = Database::connect(opts).await.expect("open in-memory sqlite");
    create_schema(&conn).await.expect("create schema");
    DbPool::from_connection(conn)
}

/// Insert a person and a user owning them
pub async fn insert_user(repo: &Repository, email: &str, can_admin: bool) -> (User, Person) {
    let person = PersonActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(email.split('@').next().map(str::to_string)),
        email: Set(Some(email.to_string())),
    }
    .insert(repo.write_conn())
    .await
    .expect("insert person");

    let user = UserActiveModel {
        id: Set(Uuid::new_v4()),
        person_id: Set(person.id),
        can_admin: Set(can_admin),
    }
    .insert(repo.write_conn())
    .await
    .expect("insert user");

    (user, person)
}

/// Insert a dataset artifact
pub async fn insert_artifact(repo: &Repository, title: &str, description: Option<&str>) -> Artifact {
    let id = Uuid::new_v4();
    ArtifactActiveModel {
        id: Set(id),
        artifact_type: Set("dataset".to_string()),
        url: Set(format!("https://doi.org/10.5555/{}", id.simple())),
        title: Set(title.to_string()),
        description: Set(description.map(str::to_string)),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(repo.write_conn())
    .await
    .expect("insert artifact")
}

/// Attach a review written now
pub async fn insert_review(repo: &Repository, artifact_id: Uuid, user_id: Uuid, text: &str) -> ArtifactReview {
    ArtifactReviewActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        artifact_id: Set(artifact_id),
        review: Set(text.to_string()),
        review_time: Set(Utc::now().fixed_offset()),
    }
    .insert(repo.write_conn())
    .await
    .expect("insert review")
}

/// Mark an artifact as one of the user's favorites
pub async fn insert_favorite(repo: &Repository, artifact_id: Uuid, user_id: Uuid) -> ArtifactFavorite {
    ArtifactFavoriteActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        artifact_id: Set(artifact_id),
    }
    .insert(repo.write_conn())
    .await
    .expect("insert favorite")
}

/// Create an organization affiliation and link it to the artifact
pub async fn insert_affiliation(repo: &Repository, artifact_id: Uuid, organization: &str) -> Affiliation {
    let affiliation = AffiliationActiveModel {
        id: Set(Uuid::new_v4()),
        person_id: Set(None),
        organization: Set(organization.to_string()),
        role: Set(Some("maintainer".to_string())),
    }
    .insert(repo.write_conn())
    .await
    .expect("insert affiliation");

    ArtifactAffiliationActiveModel {
        id: Set(Uuid::new_v4()),
        artifact_id: Set(artifact_id),
        affiliation_id: Set(affiliation.id),
    }
    .insert(repo.write_conn())
    .await
    .expect("link affiliation");

    affiliation
}

/// Identity provider with canned answers and call counters
pub struct StubProvider {
    strategy: String,
    email: String,
    profile: IdentityProfile,
    reject_with: Option<u16>,
    delay: Option<Duration>,
    email_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl StubProvider {
    /// Accepts every token as the given GitHub account
    pub fn github(email: &str, login: &str) -> Self {
        Self {
            strategy: "github".to_string(),
            email: email.to_string(),
            profile: IdentityProfile {
                login: login.to_string(),
                name: None,
            },
            reject_with: None,
            delay: None,
            email_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
        }
    }

    /// Rejects every token with the given HTTP status
    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_with: Some(status),
            ..Self::github("nobody@example.org", "nobody")
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.profile.name = Some(name.to_string());
        self
    }

    /// Sleep before answering, so concurrent logins overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of (email, profile) lookups served so far
    pub fn calls(&self) -> (usize, usize) {
        (
            self.email_calls.load(Ordering::SeqCst),
            self.profile_calls.load(Ordering::SeqCst),
        )
    }

    async fn answer(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.reject_with {
            Some(status) => Err(AppError::IdentityProvider {
                status,
                message: "invalid SSO token".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    fn strategy(&self) -> &str {
        &self.strategy
    }

    async fn fetch_email(&self, _token: &str) -> Result<String> {
        self.email_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(self.email.clone())
    }

    async fn fetch_profile(&self, _token: &str) -> Result<IdentityProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(self.profile.clone())
    }
}
