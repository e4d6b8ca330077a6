use std::sync::MutexGuard;

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use rusqlite::Connection;

use super::*;
use crate::db;
use crate::slot;

const DEFAULT_BPM_TOLERANCE: f64 = 15.0;

pub(super) fn handle_search_tracks(
    conn: MutexGuard<'_, Connection>,
    params: SearchTracksParams,
) -> Result<CallToolResult, McpError> {
    let tracks = db::search_tracks(&conn, &params.into_search_params())
        .map_err(|e| internal(format!("DB error: {e}")))?;
    json_result(&tracks)
}

pub(super) fn handle_suggest_tracks_for_slot(
    conn: MutexGuard<'_, Connection>,
    params: SuggestTracksForSlotParams,
) -> Result<CallToolResult, McpError> {
    if params.slot_type.trim().is_empty() {
        return Err(McpError::invalid_params("slot_type is required", None));
    }
    let query = params.into_query();
    // Title and tier orderings never consult the rng.
    let tracks = slot::select(&conn, &query, &mut rand::rng())
        .map_err(|e| internal(format!("DB error: {e}")))?;
    json_result(&tracks)
}

pub(super) fn handle_find_similar_tracks(
    conn: MutexGuard<'_, Connection>,
    params: FindSimilarTracksParams,
) -> Result<CallToolResult, McpError> {
    let similar = db::find_similar_tracks(
        &conn,
        &params.track_title,
        params.bpm_tolerance.unwrap_or(DEFAULT_BPM_TOLERANCE),
        params.limit,
    )
    .map_err(|e| internal(format!("DB error: {e}")))?;
    match similar {
        Some(s) => json_result(&s),
        None => Err(not_found(&params.track_title)),
    }
}

pub(super) fn handle_get_track_details(
    conn: MutexGuard<'_, Connection>,
    params: GetTrackDetailsParams,
) -> Result<CallToolResult, McpError> {
    let details = db::find_track_by_title(&conn, &params.track_title)
        .map_err(|e| internal(format!("DB error: {e}")))?;
    match details {
        Some(d) => json_result(&d),
        None => Err(not_found(&params.track_title)),
    }
}

pub(super) fn handle_get_top_rated_tracks(
    conn: MutexGuard<'_, Connection>,
    params: GetTopRatedTracksParams,
) -> Result<CallToolResult, McpError> {
    let rating = parse_rating(params.rating.as_deref().unwrap_or("up"))?;
    let tracks = db::top_rated_tracks(
        &conn,
        rating.as_ref(),
        params.context.as_deref(),
        params.audience.as_deref(),
        params.limit,
    )
    .map_err(|e| internal(format!("DB error: {e}")))?;
    json_result(&tracks)
}

pub(super) fn handle_get_feedback_summary(
    conn: MutexGuard<'_, Connection>,
) -> Result<CallToolResult, McpError> {
    let summary = db::feedback_summary(&conn).map_err(|e| internal(format!("DB error: {e}")))?;
    json_result(&summary)
}

pub(super) fn handle_get_track_stats(
    conn: MutexGuard<'_, Connection>,
) -> Result<CallToolResult, McpError> {
    let stats = db::track_stats(&conn).map_err(|e| internal(format!("DB error: {e}")))?;
    json_result(&stats)
}

pub(super) fn handle_list_routines(
    conn: MutexGuard<'_, Connection>,
    params: ListRoutinesParams,
) -> Result<CallToolResult, McpError> {
    let routines = db::list_routines(&conn, params.difficulty.as_deref(), params.limit)
        .map_err(|e| internal(format!("DB error: {e}")))?;
    json_result(&routines)
}
