//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, Statement, TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a session insert attempt
#[derive(Debug, Clone)]
pub struct SessionCreation {
    pub session: Session,
    /// False when a concurrent request already held the token and its session was reused
    pub created: bool,
}

/// A session joined with its owner
#[derive(Debug, Clone)]
pub struct SessionWithUser {
    pub session: Session,
    pub user: User,
    pub person: Person,
}

/// Search hit with the database-provided relevance
#[derive(Debug, Clone)]
pub struct ArtifactHit {
    pub artifact: Artifact,
    pub relevance_score: Option<f64>,
}

/// Aggregated ratings for one artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RatingSummary {
    pub num_ratings: u64,
    pub avg_rating: Option<f64>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    pub(crate) fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    pub(crate) fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Find the user whose person record carries this email
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<(User, Person)>> {
        let found = UserEntity::find()
            .find_also_related(PersonEntity)
            .filter(PersonColumn::Email.eq(email))
            .one(self.read_conn())
            .await?;

        Ok(found.and_then(|(user, person)| person.map(|p| (user, p))))
    }

    /// Find a user together with its person record
    pub async fn find_user_with_person(&self, user_id: Uuid) -> Result<Option<(User, Person)>> {
        let found = UserEntity::find_by_id(user_id)
            .find_also_related(PersonEntity)
            .one(self.read_conn())
            .await?;

        Ok(found.and_then(|(user, person)| person.map(|p| (user, p))))
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Find an unexpired session by its SSO token
    pub async fn find_valid_session(&self, sso_token: &str) -> Result<Option<Session>> {
        find_valid_session_on(self.read_conn(), sso_token)
            .await
            .map_err(Into::into)
    }

    /// Find an unexpired session by token, joined with its user and person
    pub async fn find_valid_session_with_user(
        &self,
        sso_token: &str,
    ) -> Result<Option<SessionWithUser>> {
        let Some(session) = self.find_valid_session(sso_token).await? else {
            return Ok(None);
        };

        let (user, person) = self
            .find_user_with_person(session.user_id)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("session {} has no owning user", session.id),
            })?;

        Ok(Some(SessionWithUser { session, user, person }))
    }

    /// Join a just-written session with its owner, reading from the primary
    pub async fn load_session_owner(&self, session: Session) -> Result<SessionWithUser> {
        let (user, person) = UserEntity::find_by_id(session.user_id)
            .find_also_related(PersonEntity)
            .one(self.write_conn())
            .await?
            .and_then(|(user, person)| person.map(|p| (user, p)))
            .ok_or_else(|| AppError::Internal {
                message: format!("session {} has no owning user", session.id),
            })?;

        Ok(SessionWithUser { session, user, person })
    }

    /// Start a session for an existing user.
    ///
    /// The insert is optimistic: if a concurrent login with the same token
    /// committed first, the uniqueness constraint rejects this row and the
    /// winner's session is returned with `created == false`.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        sso_token: &str,
        ttl: chrono::Duration,
    ) -> Result<SessionCreation> {
        let txn = self.write_conn().begin().await?;
        let attempt = insert_session(&txn, user_id, sso_token, ttl).await;
        self.finish_session_attempt(txn, sso_token, attempt).await
    }

    /// Provision a person and user and start their first session, atomically.
    ///
    /// If the session insert loses a race, the provisional person and user are
    /// rolled back with it; callers must only use the returned session's user.
    pub async fn create_user_with_session(
        &self,
        name: Option<String>,
        email: &str,
        sso_token: &str,
        ttl: chrono::Duration,
    ) -> Result<SessionCreation> {
        let txn = self.write_conn().begin().await?;

        let attempt = async {
            let person = PersonActiveModel {
                id: Set(Uuid::new_v4()),
                name: Set(name),
                email: Set(Some(email.to_string())),
            }
            .insert(&txn)
            .await?;

            let user = UserActiveModel {
                id: Set(Uuid::new_v4()),
                person_id: Set(person.id),
                can_admin: Set(false),
            }
            .insert(&txn)
            .await?;

            insert_session(&txn, user.id, sso_token, ttl).await
        }
        .await;

        self.finish_session_attempt(txn, sso_token, attempt).await
    }

    async fn finish_session_attempt(
        &self,
        txn: DatabaseTransaction,
        sso_token: &str,
        attempt: std::result::Result<Session, DbErr>,
    ) -> Result<SessionCreation> {
        let err = match attempt {
            Ok(session) => {
                txn.commit().await?;
                return Ok(SessionCreation { session, created: true });
            }
            Err(err) => err,
        };

        if let Err(rollback_err) = txn.rollback().await {
            warn!(error = %rollback_err, "Rollback after failed session insert failed");
        }

        if !matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            return Err(AppError::SessionCreation { message: err.to_string() });
        }

        // Primary only: a replica may not have the winner's row yet
        match find_valid_session_on(self.write_conn(), sso_token).await? {
            Some(session) => {
                debug!(session_id = %session.id, "Duplicate session insert, reusing winner");
                metrics::record_session_race(true);
                Ok(SessionCreation { session, created: false })
            }
            None => {
                metrics::record_session_race(false);
                Err(AppError::SessionCreation { message: err.to_string() })
            }
        }
    }

    /// Switch a session in or out of admin mode
    pub async fn set_session_admin(&self, session: Session, is_admin: bool) -> Result<Session> {
        let mut active: SessionActiveModel = session.into();
        active.is_admin = Set(is_admin);
        active.update(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Artifact Operations
    // ========================================================================

    /// Find artifact by ID
    pub async fn find_artifact_by_id(&self, id: Uuid) -> Result<Option<Artifact>> {
        ArtifactEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Most recent artifacts, unranked
    pub async fn list_artifacts(&self, limit: u64) -> Result<Vec<Artifact>> {
        ArtifactEntity::find()
            .order_by_desc(ArtifactColumn::CreatedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Keyword search over title and description, best match first.
    ///
    /// PostgreSQL ranks with `ts_rank_cd` over an english text-search vector.
    /// Other backends fall back to counting query-term hits.
    pub async fn search_artifacts(&self, keywords: &str, limit: u64) -> Result<Vec<ArtifactHit>> {
        match self.read_conn().get_database_backend() {
            DbBackend::Postgres => self.full_text_search(keywords, limit).await,
            _ => self.term_match_search(keywords, limit).await,
        }
    }

    async fn full_text_search(&self, keywords: &str, limit: u64) -> Result<Vec<ArtifactHit>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                a.id,
                ts_rank_cd(
                    to_tsvector('english', a.title || ' ' || coalesce(a.description, '')),
                    plainto_tsquery('english', $1)
                )::float8 AS rank
            FROM artifacts a
            WHERE to_tsvector('english', a.title || ' ' || coalesce(a.description, ''))
                @@ plainto_tsquery('english', $1)
            ORDER BY rank DESC
            LIMIT $2
            "#,
            vec![keywords.into(), (limit as i64).into()],
        );

        let ranked: Vec<(Uuid, f64)> = self
            .read_conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .filter_map(|row| {
                Some((
                    row.try_get_by_index::<Uuid>(0).ok()?,
                    row.try_get_by_index::<f64>(1).ok()?,
                ))
            })
            .collect();

        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let mut artifacts: HashMap<Uuid, Artifact> = ArtifactEntity::find()
            .filter(ArtifactColumn::Id.is_in(ranked.iter().map(|(id, _)| *id)))
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(id, rank)| {
                artifacts.remove(&id).map(|artifact| ArtifactHit {
                    artifact,
                    relevance_score: Some(rank),
                })
            })
            .collect())
    }

    async fn term_match_search(&self, keywords: &str, limit: u64) -> Result<Vec<ArtifactHit>> {
        let terms: Vec<String> = keywords
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut any_term = Condition::any();
        for term in &terms {
            any_term = any_term
                .add(ArtifactColumn::Title.contains(term.as_str()))
                .add(ArtifactColumn::Description.contains(term.as_str()));
        }

        let candidates = ArtifactEntity::find()
            .filter(any_term)
            .all(self.read_conn())
            .await?;

        let mut hits: Vec<ArtifactHit> = candidates
            .into_iter()
            .filter_map(|artifact| {
                let document = artifact.document().to_lowercase();
                let score: usize = terms
                    .iter()
                    .map(|t| document.matches(t.as_str()).count())
                    .sum();
                (score > 0).then(|| ArtifactHit {
                    artifact,
                    relevance_score: Some(score as f64),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);

        Ok(hits)
    }

    /// Rating count and mean per artifact; artifacts without ratings are absent
    pub async fn rating_summaries(&self, artifact_ids: &[Uuid]) -> Result<HashMap<Uuid, RatingSummary>> {
        if artifact_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ratings: Vec<(Uuid, i32)> = ArtifactRatingEntity::find()
            .select_only()
            .column(ArtifactRatingColumn::ArtifactId)
            .column(ArtifactRatingColumn::Rating)
            .filter(ArtifactRatingColumn::ArtifactId.is_in(artifact_ids.iter().copied()))
            .into_tuple()
            .all(self.read_conn())
            .await?;

        let mut totals: HashMap<Uuid, (u64, i64)> = HashMap::new();
        for (artifact_id, rating) in ratings {
            let entry = totals.entry(artifact_id).or_default();
            entry.0 += 1;
            entry.1 += i64::from(rating);
        }

        Ok(totals
            .into_iter()
            .map(|(id, (count, sum))| {
                (id, RatingSummary {
                    num_ratings: count,
                    avg_rating: Some(sum as f64 / count as f64),
                })
            })
            .collect())
    }

    /// Review count per artifact; artifacts without reviews are absent
    pub async fn review_counts(&self, artifact_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        if artifact_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let counts: Vec<(Uuid, i64)> = ArtifactReviewEntity::find()
            .select_only()
            .column(ArtifactReviewColumn::ArtifactId)
            .column_as(Expr::col(ArtifactReviewColumn::Id).count(), "num_reviews")
            .filter(ArtifactReviewColumn::ArtifactId.is_in(artifact_ids.iter().copied()))
            .group_by(ArtifactReviewColumn::ArtifactId)
            .into_tuple()
            .all(self.read_conn())
            .await?;

        Ok(counts
            .into_iter()
            .map(|(id, count)| (id, count.max(0) as u64))
            .collect())
    }

    /// Reviews of an artifact, newest first
    pub async fn get_reviews(&self, artifact_id: Uuid) -> Result<Vec<ArtifactReview>> {
        ArtifactReviewEntity::find()
            .filter(ArtifactReviewColumn::ArtifactId.eq(artifact_id))
            .order_by_desc(ArtifactReviewColumn::ReviewTime)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Organizations linked to an artifact
    pub async fn get_affiliations(&self, artifact: &Artifact) -> Result<Vec<Affiliation>> {
        artifact
            .find_related(AffiliationEntity)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Whether the user has marked the artifact as a favorite
    pub async fn is_favorited(&self, artifact_id: Uuid, user_id: Uuid) -> Result<bool> {
        let count = ArtifactFavoriteEntity::find()
            .filter(ArtifactFavoriteColumn::ArtifactId.eq(artifact_id))
            .filter(ArtifactFavoriteColumn::UserId.eq(user_id))
            .count(self.read_conn())
            .await?;

        Ok(count > 0)
    }

    // ========================================================================
    // Rating Operations
    // ========================================================================

    /// Find a user's rating of an artifact
    pub async fn find_rating(&self, artifact_id: Uuid, user_id: Uuid) -> Result<Option<ArtifactRating>> {
        ArtifactRatingEntity::find()
            .filter(ArtifactRatingColumn::ArtifactId.eq(artifact_id))
            .filter(ArtifactRatingColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Record a new rating.
    ///
    /// A second rating by the same user is refused by the unique
    /// `(user_id, artifact_id)` index and reported as `Duplicate`.
    pub async fn create_rating(
        &self,
        artifact_id: Uuid,
        user_id: Uuid,
        rating: i32,
    ) -> Result<ArtifactRating> {
        ArtifactRatingActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            artifact_id: Set(artifact_id),
            rating: Set(rating),
        }
        .insert(self.write_conn())
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Duplicate {
                message: "user has already rated this artifact".to_string(),
            },
            _ => err.into(),
        })
    }

    /// Change the value of an existing rating
    pub async fn update_rating(&self, existing: ArtifactRating, rating: i32) -> Result<ArtifactRating> {
        let mut active: ArtifactRatingActiveModel = existing.into();
        active.rating = Set(rating);
        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Delete rating by ID
    pub async fn delete_rating(&self, id: Uuid) -> Result<bool> {
        let result = ArtifactRatingEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}

async fn find_valid_session_on<C>(conn: &C, sso_token: &str) -> std::result::Result<Option<Session>, DbErr>
where
    C: ConnectionTrait,
{
    SessionEntity::find()
        .filter(SessionColumn::SsoToken.eq(sso_token))
        .filter(SessionColumn::ExpiresOn.gt(Utc::now().fixed_offset()))
        .one(conn)
        .await
}

/// Insert a session row inside `txn`, clearing an expired row that still holds the token
async fn insert_session(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    sso_token: &str,
    ttl: chrono::Duration,
) -> std::result::Result<Session, DbErr> {
    let now = Utc::now();
    let expires_on = now
        .checked_add_signed(ttl)
        .ok_or_else(|| DbErr::Custom(format!("session lifetime out of range: {}", ttl)))?;

    SessionEntity::delete_many()
        .filter(SessionColumn::SsoToken.eq(sso_token))
        .filter(SessionColumn::ExpiresOn.lte(now.fixed_offset()))
        .exec(txn)
        .await?;

    SessionActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        sso_token: Set(sso_token.to_string()),
        expires_on: Set(expires_on.fixed_offset()),
        is_admin: Set(false),
    }
    .insert(txn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{insert_artifact, insert_user, memory_db};

    fn ttl() -> chrono::Duration {
        chrono::Duration::minutes(30)
    }

    #[tokio::test]
    async fn test_create_session_then_lookup() {
        let repo = Repository::new(memory_db().await);
        let (user, _) = insert_user(&repo, "ada@example.org", false).await;

        let created = repo.create_session(user.id, "tok-1", ttl()).await.unwrap();
        assert!(created.created);
        assert_eq!(created.session.user_id, user.id);
        assert!(!created.session.is_admin);

        let found = repo.find_valid_session_with_user("tok-1").await.unwrap().unwrap();
        assert_eq!(found.session.id, created.session.id);
        assert_eq!(found.user.id, user.id);
        assert_eq!(found.person.email.as_deref(), Some("ada@example.org"));
    }

    #[tokio::test]
    async fn test_duplicate_token_reuses_existing_session() {
        let repo = Repository::new(memory_db().await);
        let (user, _) = insert_user(&repo, "ada@example.org", false).await;

        let first = repo.create_session(user.id, "tok-dup", ttl()).await.unwrap();
        let second = repo.create_session(user.id, "tok-dup", ttl()).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.session.id, second.session.id);

        let rows = SessionEntity::find()
            .filter(SessionColumn::SsoToken.eq("tok-dup"))
            .count(repo.write_conn())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_lost_race_rolls_back_provisional_user() {
        let repo = Repository::new(memory_db().await);
        let (winner, _) = insert_user(&repo, "winner@example.org", false).await;
        repo.create_session(winner.id, "tok-race", ttl()).await.unwrap();

        let outcome = repo
            .create_user_with_session(Some("Loser".into()), "loser@example.org", "tok-race", ttl())
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.session.user_id, winner.id);
        assert!(repo.find_user_by_email("loser@example.org").await.unwrap().is_none());
        assert_eq!(UserEntity::find().count(repo.write_conn()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced() {
        let repo = Repository::new(memory_db().await);
        let (user, _) = insert_user(&repo, "ada@example.org", false).await;

        let stale = repo
            .create_session(user.id, "tok-old", chrono::Duration::minutes(-5))
            .await
            .unwrap();
        assert!(stale.session.is_expired());
        assert!(repo.find_valid_session("tok-old").await.unwrap().is_none());

        let fresh = repo.create_session(user.id, "tok-old", ttl()).await.unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.session.id, stale.session.id);
        assert!(repo.find_valid_session("tok-old").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_session_admin() {
        let repo = Repository::new(memory_db().await);
        let (user, _) = insert_user(&repo, "root@example.org", true).await;
        let created = repo.create_session(user.id, "tok-admin", ttl()).await.unwrap();

        let updated = repo.set_session_admin(created.session, true).await.unwrap();
        assert!(updated.is_admin);
        assert!(repo.find_valid_session("tok-admin").await.unwrap().unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_rating_summaries_and_crud() {
        let repo = Repository::new(memory_db().await);
        let (alice, _) = insert_user(&repo, "alice@example.org", false).await;
        let (bob, _) = insert_user(&repo, "bob@example.org", false).await;
        let artifact = insert_artifact(&repo, "Packet traces", Some("Backbone captures")).await;
        let unrated = insert_artifact(&repo, "Unrated", None).await;

        repo.create_rating(artifact.id, alice.id, 4).await.unwrap();
        let bobs = repo.create_rating(artifact.id, bob.id, 1).await.unwrap();

        let summaries = repo.rating_summaries(&[artifact.id, unrated.id]).await.unwrap();
        assert_eq!(summaries[&artifact.id], RatingSummary { num_ratings: 2, avg_rating: Some(2.5) });
        assert!(!summaries.contains_key(&unrated.id));

        let updated = repo.update_rating(bobs, 5).await.unwrap();
        assert_eq!(updated.rating, 5);
        assert_eq!(repo.find_rating(artifact.id, bob.id).await.unwrap().unwrap().rating, 5);

        let again = repo.create_rating(artifact.id, alice.id, 2).await.unwrap_err();
        assert!(matches!(again, AppError::Duplicate { .. }));
        assert_eq!(repo.rating_summaries(&[artifact.id]).await.unwrap()[&artifact.id].num_ratings, 2);

        assert!(repo.delete_rating(updated.id).await.unwrap());
        assert!(!repo.delete_rating(updated.id).await.unwrap());
        assert!(repo.find_rating(artifact.id, bob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_term_match_search_orders_by_hits() {
        let repo = Repository::new(memory_db().await);
        insert_artifact(&repo, "DNS measurements", Some("Passive DNS traces from DNS resolvers")).await;
        insert_artifact(&repo, "Malware corpus", Some("Samples with DNS indicators")).await;
        insert_artifact(&repo, "Unrelated", Some("Nothing to see")).await;

        let hits = repo.search_artifacts("dns", 20).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].artifact.title, "DNS measurements");
        assert!(hits[0].relevance_score > hits[1].relevance_score);

        assert!(repo.search_artifacts("   ", 20).await.unwrap().is_empty());
    }
}
