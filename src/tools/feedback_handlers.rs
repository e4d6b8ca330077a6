use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use super::*;
use crate::db;
use crate::error::{Error, Result};
use crate::platform::{NewFeedback, PlatformClient};
use crate::store;
use crate::types::Rating;

/// A rating written to the local catalog, before any platform push.
#[derive(Debug, Clone, Serialize)]
pub(super) struct SavedRating {
    pub status: &'static str,
    pub feedback_id: i64,
    pub track: String,
    pub artist: Option<String>,
    #[serde(skip)]
    pub spotify_id: Option<String>,
    pub rating: Rating,
    pub context: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct RatingOutcome {
    #[serde(flatten)]
    pub saved: SavedRating,
    pub platform_sync: String,
}

pub(super) fn parse_rating(raw: &str) -> Result<Rating> {
    raw.parse::<Rating>()
        .map_err(|_| Error::validation("rating", "must be 'up' or 'down'"))
}

fn present(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub(super) fn save_rating(conn: &Connection, params: &RateTrackParams) -> Result<SavedRating> {
    let rating = parse_rating(&params.rating)?;
    let track = db::find_track_by_title(conn, &params.track_title)?
        .map(|d| d.track)
        .ok_or_else(|| Error::NotFound(format!("Track '{}' not found in catalog", params.track_title)))?;

    let artist = present(Some(track.artist.as_str()));
    let context = present(params.context.as_deref());
    let audience = present(params.audience.as_deref());
    let feedback_id = store::record_rating(
        conn,
        &track.title,
        artist.as_deref(),
        track.spotify_id.as_deref(),
        rating,
        context.as_deref(),
        audience.as_deref(),
    )?;
    info!(feedback_id, track = %track.title, %rating, "Recorded rating");

    Ok(SavedRating {
        status: "saved",
        feedback_id,
        track: track.title,
        artist,
        spotify_id: track.spotify_id,
        rating,
        context,
        audience,
    })
}

/// Best-effort copy of a saved rating to the platform. The outcome is
/// reported, never raised.
pub(super) async fn push_rating(platform: Option<&PlatformClient>, saved: &SavedRating) -> String {
    let Some(platform) = platform else {
        return "skipped (platform not configured)".to_string();
    };
    let body = NewFeedback {
        track_title: &saved.track,
        track_artist: saved.artist.as_deref().unwrap_or(""),
        spotify_id: saved.spotify_id.as_deref(),
        rating: saved.rating.as_ref(),
        context: saved.context.as_deref().unwrap_or(""),
    };
    match platform.push_feedback(&body).await {
        Ok(()) => "synced".to_string(),
        Err(e) => {
            warn!(feedback_id = saved.feedback_id, error = %e, "Failed to push rating to platform");
            format!("failed: {e}")
        }
    }
}
