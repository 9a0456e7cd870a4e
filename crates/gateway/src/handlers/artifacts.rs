//! Artifact catalog handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::AppState;
use searcch_common::{
    db::{
        models::{Affiliation, Artifact, ArtifactReview},
        ArtifactHit, RatingSummary, Repository,
    },
    errors::{AppError, Result},
    metrics,
};

/// Artifacts returned when browsing without keywords
const BROWSE_LIMIT: u64 = 20;

/// Upper bound on ranked search results
const SEARCH_RESULT_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keywords: String,
}

#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub uri: String,
    pub doi: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub relevance_score: Option<f64>,
    pub title: String,
    pub description: Option<String>,
    pub avg_rating: Option<f64>,
    pub num_ratings: u64,
    pub num_reviews: u64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub artifacts: Vec<ArtifactSummary>,
    pub length: usize,
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    /// Viewer, for the favorite flag
    pub userid: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactDetail {
    pub artifact: Artifact,
    pub affiliations: Vec<Affiliation>,
    pub num_ratings: u64,
    pub avg_rating: Option<f64>,
    pub num_reviews: u64,
    pub reviews: Vec<ArtifactReview>,
    pub is_favorited: bool,
}

/// GET /artifacts?keywords=
pub async fn search_artifacts(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    let repo = Repository::new(state.db.clone());
    let keywords = query.keywords.trim();

    let hits = if keywords.is_empty() {
        repo.list_artifacts(BROWSE_LIMIT)
            .await?
            .into_iter()
            .map(|artifact| ArtifactHit { artifact, relevance_score: None })
            .collect()
    } else {
        repo.search_artifacts(keywords, SEARCH_RESULT_LIMIT).await?
    };

    let ids: Vec<Uuid> = hits.iter().map(|hit| hit.artifact.id).collect();
    let ratings = repo.rating_summaries(&ids).await?;
    let reviews = repo.review_counts(&ids).await?;

    let artifacts: Vec<ArtifactSummary> = hits
        .into_iter()
        .map(|hit| {
            let rating = ratings.get(&hit.artifact.id).copied().unwrap_or_default();
            let num_reviews = reviews.get(&hit.artifact.id).copied().unwrap_or(0);
            summarize(hit, rating, num_reviews)
        })
        .collect();

    metrics::record_search(start.elapsed().as_secs_f64(), !keywords.is_empty(), artifacts.len());
    tracing::debug!(keywords = keywords, results = artifacts.len(), "Artifact search");

    Ok(Json(SearchResponse {
        length: artifacts.len(),
        artifacts,
    }))
}

fn summarize(hit: ArtifactHit, rating: RatingSummary, num_reviews: u64) -> ArtifactSummary {
    let artifact = hit.artifact;
    ArtifactSummary {
        id: artifact.id,
        uri: format!("/artifacts/{}", artifact.id),
        doi: artifact.url,
        artifact_type: artifact.artifact_type,
        relevance_score: hit.relevance_score,
        title: artifact.title,
        description: artifact.description,
        avg_rating: rating.avg_rating,
        num_ratings: rating.num_ratings,
        num_reviews,
    }
}

/// GET /artifacts/{id}?userid=
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<ArtifactDetail>> {
    let repo = Repository::new(state.db.clone());

    let artifact = repo
        .find_artifact_by_id(id)
        .await?
        .ok_or_else(|| AppError::ArtifactNotFound { id: id.to_string() })?;

    let affiliations = repo.get_affiliations(&artifact).await?;
    let rating = repo
        .rating_summaries(&[id])
        .await?
        .remove(&id)
        .unwrap_or_default();
    let reviews = repo.get_reviews(id).await?;
    let is_favorited = match query.userid {
        Some(user_id) => repo.is_favorited(id, user_id).await?,
        None => false,
    };

    Ok(Json(ArtifactDetail {
        artifact,
        affiliations,
        num_ratings: rating.num_ratings,
        avg_rating: rating.avg_rating,
        num_reviews: reviews.len() as u64,
        reviews,
        is_favorited,
    }))
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{send, test_app};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use searcch_common::testing::{
        insert_affiliation, insert_artifact, insert_favorite, insert_review, insert_user,
    };
    use uuid::Uuid;

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("origin", "https://frontend.example.org")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_returns_aggregates() {
        let (app, repo) = test_app(None).await;
        let (alice, _) = insert_user(&repo, "alice@example.org", false).await;
        let (bob, _) = insert_user(&repo, "bob@example.org", false).await;
        let traces = insert_artifact(&repo, "DNS traces", Some("Resolver traces, DNS only")).await;
        insert_artifact(&repo, "Firmware images", None).await;

        repo.create_rating(traces.id, alice.id, 5).await.unwrap();
        repo.create_rating(traces.id, bob.id, 2).await.unwrap();
        insert_review(&repo, traces.id, alice.id, "Well documented").await;

        let (status, body) = send(&app, get("/artifacts?keywords=dns")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["length"], 1);

        let hit = &body["artifacts"][0];
        assert_eq!(hit["title"], "DNS traces");
        assert_eq!(hit["uri"], format!("/artifacts/{}", traces.id));
        assert_eq!(hit["doi"], traces.url.as_str());
        assert_eq!(hit["type"], "dataset");
        assert_eq!(hit["num_ratings"], 2);
        assert_eq!(hit["avg_rating"], 3.5);
        assert_eq!(hit["num_reviews"], 1);
        assert!(hit["relevance_score"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_empty_keywords_browse() {
        let (app, repo) = test_app(None).await;
        insert_artifact(&repo, "First", None).await;
        insert_artifact(&repo, "Second", None).await;

        let (status, body) = send(&app, get("/artifacts?keywords=")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["length"], 2);
        assert!(body["artifacts"][0]["relevance_score"].is_null());
        assert!(body["artifacts"][0]["avg_rating"].is_null());
        assert_eq!(body["artifacts"][0]["num_ratings"], 0);
    }

    #[tokio::test]
    async fn test_search_sends_cors_header() {
        let (app, _) = test_app(None).await;

        let response = tower::ServiceExt::oneshot(app, get("/artifacts?keywords=x")).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_artifact_detail() {
        let (app, repo) = test_app(None).await;
        let (user, _) = insert_user(&repo, "viewer@example.org", false).await;
        let artifact = insert_artifact(&repo, "Botnet captures", Some("Honeypot pcaps")).await;
        insert_affiliation(&repo, artifact.id, "USC/ISI").await;
        insert_review(&repo, artifact.id, user.id, "Useful").await;
        insert_favorite(&repo, artifact.id, user.id).await;
        repo.create_rating(artifact.id, user.id, 4).await.unwrap();

        let (status, body) = send(&app, get(&format!("/artifacts/{}?userid={}", artifact.id, user.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["artifact"]["title"], "Botnet captures");
        assert_eq!(body["artifact"]["type"], "dataset");
        assert_eq!(body["affiliations"][0]["organization"], "USC/ISI");
        assert_eq!(body["num_ratings"], 1);
        assert_eq!(body["avg_rating"], 4.0);
        assert_eq!(body["num_reviews"], 1);
        assert_eq!(body["reviews"][0]["review"], "Useful");
        assert_eq!(body["is_favorited"], true);

        let (_, anonymous) = send(&app, get(&format!("/artifacts/{}", artifact.id))).await;
        assert_eq!(anonymous["is_favorited"], false);
    }

    #[tokio::test]
    async fn test_unknown_artifact_is_not_found() {
        let (app, _) = test_app(None).await;

        let (status, body) = send(&app, get(&format!("/artifacts/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid ID for artifact"));
    }
}
