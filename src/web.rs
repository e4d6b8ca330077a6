//! HTTP API behind the class-builder web app. Handlers call the playlist core
//! in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::generator::{self, CandidateContext, CandidateGenerator, GeneratorStatus, gather_candidates};
use crate::merge::TargetCountRule;
use crate::playlist::{self, HybridDraft, PlaylistRequest};
use crate::routine::build_routine_payload;
use crate::store::Catalog;

pub const MIN_DURATION: u32 = 20;
pub const MAX_DURATION: u32 = 120;
const GENERATOR_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebPlaylistRequest {
    pub duration_minutes: u32,
    pub difficulty: Option<String>,
    pub audience: Option<String>,
    pub theme: Option<String>,
    pub vibe: Option<String>,
    pub preferred_genres: Vec<String>,
    pub preferred_artists: Vec<String>,
    pub excluded_genres: Vec<String>,
    pub user_goal: Option<String>,
    pub debug: bool,
}

impl Default for WebPlaylistRequest {
    fn default() -> Self {
        Self {
            duration_minutes: 45,
            difficulty: Some("intermediate".to_string()),
            audience: Some("mixed".to_string()),
            theme: None,
            vibe: Some("high energy".to_string()),
            preferred_genres: Vec::new(),
            preferred_artists: Vec::new(),
            excluded_genres: Vec::new(),
            user_goal: Some(
                "Build a fun class flow with smooth transitions and strong energy arc.".to_string(),
            ),
            debug: false,
        }
    }
}

impl WebPlaylistRequest {
    fn validated(&self) -> Result<PlaylistRequest> {
        if !(MIN_DURATION..=MAX_DURATION).contains(&self.duration_minutes) {
            return Err(Error::validation(
                "duration_minutes",
                format!(
                    "must be between {MIN_DURATION} and {MAX_DURATION}, got {}",
                    self.duration_minutes
                ),
            ));
        }
        Ok(PlaylistRequest {
            duration_minutes: self.duration_minutes,
            difficulty: self.difficulty.clone(),
            theme: self.theme.clone(),
            audience: self.audience.clone(),
        })
    }

    fn curation_context(&self, draft: &HybridDraft, needed_count: usize) -> CandidateContext {
        CandidateContext {
            vibe: self.vibe.clone().filter(|v| !v.trim().is_empty()),
            preferred_genres: self.preferred_genres.clone(),
            preferred_artists: self.preferred_artists.clone(),
            excluded_genres: self.excluded_genres.iter().map(|g| g.to_lowercase()).collect(),
            needed_count,
            ..draft.candidate_context()
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<Catalog>,
    generator: Arc<dyn CandidateGenerator>,
    target_rule: TargetCountRule,
    generator_deadline: Duration,
}

impl AppState {
    pub fn new(
        catalog: Catalog,
        generator: Arc<dyn CandidateGenerator>,
        target_rule: TargetCountRule,
        generator_deadline: Duration,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            generator,
            target_rule,
            generator_deadline,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Catalog::new(config.db_path.clone()),
            Arc::from(generator::from_config(&config.generator)),
            config.web_target_rule,
            config.generator.timeout + GENERATOR_GRACE,
        )
    }

    fn draft(&self, request: &PlaylistRequest) -> Result<HybridDraft> {
        let conn = self.catalog.conn()?;
        let mut rng = rand::rng();
        Ok(playlist::prepare_hybrid(
            &conn,
            request,
            None,
            self.target_rule,
            &mut rng,
        )?)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, %status, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Catalog playlist, reordered by the generator's curation when it matches,
/// converted to a routine payload.
async fn generate_playlist(
    State(state): State<AppState>,
    Json(body): Json<WebPlaylistRequest>,
) -> Result<Response> {
    let request = body.validated()?;
    let draft = state.draft(&request)?;

    let context = body.curation_context(&draft, draft.target);
    let (curated, status) =
        gather_candidates(state.generator.as_ref(), &context, state.generator_deadline).await;
    let curated = (status == GeneratorStatus::Ok).then_some(curated.as_slice());

    let routine = build_routine_payload(&request, body.user_goal.as_deref(), &draft.base, curated);
    info!(
        duration = request.duration_minutes,
        tracks = routine.track_ids.len(),
        generator = %status,
        "Built routine payload"
    );

    if body.debug {
        return Ok(Json(json!({
            "routine": routine,
            "debug": {
                "request": body,
                "playlist": draft.base,
                "feedback_signals": draft.signals,
                "generator_status": status.to_string(),
                "curated": curated,
            }
        }))
        .into_response());
    }
    Ok(Json(routine).into_response())
}

/// Catalog anchors plus generated gap-fill, as a flat list tagged by source.
async fn generate_tracks(
    State(state): State<AppState>,
    Json(body): Json<WebPlaylistRequest>,
) -> Result<Response> {
    let request = body.validated()?;
    let draft = state.draft(&request)?;

    let context = body.curation_context(&draft, draft.needed());
    let (stubs, status) =
        gather_candidates(state.generator.as_ref(), &context, state.generator_deadline).await;
    let debug = body.debug.then(|| {
        json!({
            "request": &body,
            "playlist": &draft.base,
            "feedback_signals": &draft.signals,
            "generator_status": status.to_string(),
        })
    });

    // Merge order, not phase order: catalog anchors stay ahead of gap-fill.
    let outcome = playlist::gap_fill(&draft, &stubs);
    info!(
        target = outcome.target,
        achieved = outcome.tracks.len(),
        db = outcome.db_count,
        ai = outcome.generated_count,
        generator = %status,
        "Built track list"
    );

    let mut out = json!({ "tracks": outcome.tracks });
    if let Some(debug) = debug {
        out["debug"] = debug;
    }
    Ok(Json(out).into_response())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/playlist", post(generate_playlist))
        .route("/api/tracks", post(generate_tracks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: &AppConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.web_bind).await?;
    info!(bind = %config.web_bind, "Web API listening");
    axum::serve(listener, router(AppState::from_config(config))).await?;
    Ok(())
}
