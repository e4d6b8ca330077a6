use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use rusqlite::Connection;
use serde::Serialize;

mod feedback_handlers;
mod library_handlers;
mod params;

use feedback_handlers::*;
use library_handlers::*;
use params::*;

use crate::config::AppConfig;
use crate::error::Error;
use crate::generator::{self, CandidateGenerator};
use crate::merge::TargetCountRule;
use crate::platform::PlatformClient;
use crate::playlist;
use crate::recommend;
use crate::store::Catalog;

/// Slack on top of the generator's own HTTP timeout before the playlist
/// tools give up on it.
const GENERATOR_GRACE: Duration = Duration::from_secs(5);

fn internal(msg: String) -> McpError {
    McpError::internal_error(msg, None)
}

fn not_found(track_title: &str) -> McpError {
    Error::NotFound(format!("Track '{track_title}' not found in catalog")).into()
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| internal(format!("{e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { .. } | Error::NotFound(_) => {
                McpError::invalid_params(err.to_string(), None)
            }
            other => McpError::internal_error(other.to_string(), None),
        }
    }
}

/// Inner shared state (not Clone).
struct ServerState {
    catalog: Catalog,
    generator: Box<dyn CandidateGenerator>,
    platform: Option<PlatformClient>,
    target_rule: TargetCountRule,
    generator_deadline: Duration,
}

#[derive(Clone)]
pub struct ChoreoServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

impl ChoreoServer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_state(ServerState {
            catalog: Catalog::new(config.db_path.clone()),
            generator: generator::from_config(&config.generator),
            platform: config.platform.as_ref().map(PlatformClient::new),
            target_rule: config.tool_target_rule,
            generator_deadline: config.generator.timeout + GENERATOR_GRACE,
        })
    }

    fn with_state(state: ServerState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, McpError> {
        self.state.catalog.conn().map_err(McpError::from)
    }
}

#[tool_router]
impl ChoreoServer {
    #[tool(
        description = "Search the track catalog. Filters are AND-ed; type, position, artist and focus area match partially. Ordered by title."
    )]
    async fn search_tracks(
        &self,
        params: Parameters<SearchTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_search_tracks(self.conn()?, params.0)
    }

    #[tool(
        description = "Suggest tracks for one class slot. Top-rated tracks come first, tracks the audience has down-voted come last."
    )]
    async fn suggest_tracks_for_slot(
        &self,
        params: Parameters<SuggestTracksForSlotParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_suggest_tracks_for_slot(self.conn()?, params.0)
    }

    #[tool(
        description = "Find tracks with the same intensity and a similar BPM to a reference track"
    )]
    async fn find_similar_tracks(
        &self,
        params: Parameters<FindSimilarTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_find_similar_tracks(self.conn()?, params.0)
    }

    #[tool(description = "Get the full record for a track, including choreography and cues")]
    async fn get_track_details(
        &self,
        params: Parameters<GetTrackDetailsParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_get_track_details(self.conn()?, params.0)
    }

    #[tool(description = "List the most up-voted (or down-voted) tracks, optionally by context and audience")]
    async fn get_top_rated_tracks(
        &self,
        params: Parameters<GetTopRatedTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_get_top_rated_tracks(self.conn()?, params.0)
    }

    #[tool(description = "Summarise instructor feedback: totals and a per-context breakdown")]
    async fn get_feedback_summary(&self) -> Result<CallToolResult, McpError> {
        handle_get_feedback_summary(self.conn()?)
    }

    #[tool(description = "Catalog statistics: track counts and BPM ranges per type and intensity")]
    async fn get_track_stats(&self) -> Result<CallToolResult, McpError> {
        handle_get_track_stats(self.conn()?)
    }

    #[tool(description = "List saved class routines with their track counts")]
    async fn list_routines(
        &self,
        params: Parameters<ListRoutinesParams>,
    ) -> Result<CallToolResult, McpError> {
        handle_list_routines(self.conn()?, params.0)
    }

    #[tool(
        description = "Build a phase-by-phase class playlist from the catalog. The arc is chosen by class length; no track appears twice."
    )]
    async fn build_class_playlist(
        &self,
        params: Parameters<BuildClassPlaylistParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.0.into_request();
        let built = {
            let conn = self.conn()?;
            let mut rng = rand::rng();
            playlist::assemble(&conn, &request, &mut rng)
                .map_err(|e| internal(format!("DB error: {e}")))?
        };
        json_result(&built)
    }

    #[tool(
        description = "Build a class playlist from catalog tracks, then fill any shortfall with generated suggestions. Catalog tracks always win; disliked tracks and artists are never used."
    )]
    async fn build_hybrid_playlist(
        &self,
        params: Parameters<BuildHybridPlaylistParams>,
    ) -> Result<CallToolResult, McpError> {
        let BuildHybridPlaylistParams {
            playlist: base,
            target_tracks,
        } = params.0;
        let request = base.into_request();
        let built = playlist::build_hybrid_playlist(
            &self.state.catalog,
            self.state.generator.as_ref(),
            &request,
            target_tracks,
            self.state.target_rule,
            self.state.generator_deadline,
        )
        .await?;
        json_result(&built)
    }

    #[tool(
        description = "Ask the track generator for a full class worth of tracks, filtered by feedback and exclusions and matched back to the catalog"
    )]
    async fn recommend_class_tracks(
        &self,
        params: Parameters<RecommendClassTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.0.into_request();
        let recommendations = recommend::recommend_class_tracks(
            &self.state.catalog,
            self.state.generator.as_ref(),
            &request,
            self.state.generator_deadline,
        )
        .await?;
        json_result(&recommendations)
    }

    #[tool(
        description = "Record a thumbs up or down for a track, optionally for a context and audience. Re-rating updates the existing entry."
    )]
    async fn rate_track(
        &self,
        params: Parameters<RateTrackParams>,
    ) -> Result<CallToolResult, McpError> {
        let saved = {
            let conn = self.conn()?;
            save_rating(&conn, &params.0)?
        };
        let platform_sync = push_rating(self.state.platform.as_ref(), &saved).await;
        json_result(&RatingOutcome {
            saved,
            platform_sync,
        })
    }
}

#[tool_handler]
impl ServerHandler for ChoreoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Cycling class music server. Search the track catalog, build class playlists \
                 phase by phase, fill gaps with generated suggestions, and record instructor \
                 feedback."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
