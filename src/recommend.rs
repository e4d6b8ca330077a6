//! Generator-first recommendations for the class builder UI.
//!
//! Unlike the hybrid playlist, the catalog is not consulted up front: the
//! generator proposes the whole list and the catalog only enriches matches.

use std::collections::HashSet;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::arc::{normalize_arc_types, suggest_type};
use crate::db;
use crate::error::Result;
use crate::feedback;
use crate::generator::{CandidateContext, CandidateGenerator, GeneratorStatus, gather_candidates};
use crate::merge::{Exclusions, Identified, TargetCountRule};
use crate::normalize::parse_csv_list;
use crate::store::Catalog;
use crate::types::{FeedbackSignals, Track, TrackStub};

pub const DEFAULT_CLASS_LENGTH: u32 = 55;

#[derive(Debug, Clone, Default)]
pub struct RecommendRequest {
    pub class_length_minutes: u32,
    pub theme: Option<String>,
    pub vibe: Option<String>,
    /// Comma separated free-text arc, e.g. "warm up, climb, sprint".
    pub custom_intensity_arc: Option<String>,
    pub preferred_genres: Option<String>,
    pub preferred_artists: Option<String>,
    pub exclude_genres: Option<String>,
    pub exclude_songs_or_artists: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Recommendation {
    /// The suggestion is already in the catalog; full record returned.
    Catalog {
        #[serde(flatten)]
        track: Track,
        suggest_type: &'static str,
    },
    Suggested {
        title: String,
        artist: String,
        bpm: Option<f64>,
        suggest_type: &'static str,
    },
}

impl Recommendation {
    pub fn title(&self) -> &str {
        match self {
            Self::Catalog { track, .. } => &track.title,
            Self::Suggested { title, .. } => title,
        }
    }

    pub fn suggest_type(&self) -> &'static str {
        match self {
            Self::Catalog { suggest_type, .. } | Self::Suggested { suggest_type, .. } => suggest_type,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub tracks: Vec<Recommendation>,
    pub target_track_count: usize,
    pub generator_status: String,
}

/// Everything needed to filter the generator's answer.
#[derive(Debug, Clone)]
pub struct RecommendDraft {
    pub target: usize,
    pub context: CandidateContext,
    pub signals: FeedbackSignals,
    excluded_tokens: Vec<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn prepare(conn: &Connection, request: &RecommendRequest) -> Result<RecommendDraft, rusqlite::Error> {
    let audience = non_blank(&request.audience);
    let signals = feedback::aggregate(&db::all_feedback(conn)?, audience.as_deref());
    let target = TargetCountRule::QuarterDuration.target(request.class_length_minutes, None);
    let excluded_songs_or_artists = parse_csv_list(request.exclude_songs_or_artists.as_deref());

    let context = CandidateContext {
        duration_minutes: request.class_length_minutes,
        theme: non_blank(&request.theme),
        vibe: non_blank(&request.vibe),
        audience,
        intensity_arc: normalize_arc_types(
            request.custom_intensity_arc.as_deref(),
            request.class_length_minutes,
        )
        .into_iter()
        .map(str::to_string)
        .collect(),
        preferred_genres: parse_csv_list(request.preferred_genres.as_deref()),
        preferred_artists: parse_csv_list(request.preferred_artists.as_deref()),
        excluded_genres: parse_csv_list(request.exclude_genres.as_deref())
            .into_iter()
            .map(|g| g.to_lowercase())
            .collect(),
        excluded_songs_or_artists: excluded_songs_or_artists.clone(),
        needed_count: target,
        existing_tracks: Vec::new(),
        feedback_signals: signals.clone(),
        ..Default::default()
    };

    Ok(RecommendDraft {
        target,
        context,
        signals,
        excluded_tokens: excluded_songs_or_artists
            .iter()
            .map(|t| t.to_lowercase())
            .collect(),
    })
}

/// Filter, dedup and enrich generated stubs, stopping at the target.
pub fn finish(
    conn: &Connection,
    draft: &RecommendDraft,
    stubs: &[TrackStub],
) -> Result<Vec<Recommendation>, rusqlite::Error> {
    let exclusions = Exclusions::from_signals(&draft.signals);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for stub in stubs {
        if out.len() >= draft.target {
            break;
        }
        if !exclusions.allows(stub) || seen.contains(&stub.identity()) {
            continue;
        }
        let title = stub.title.trim();
        let artist = stub.artist.trim();
        let (title_lower, artist_lower) = (title.to_lowercase(), artist.to_lowercase());
        if draft
            .excluded_tokens
            .iter()
            .any(|token| title_lower.contains(token) || artist_lower.contains(token))
        {
            continue;
        }
        seen.insert(stub.identity());

        let suggest_type = suggest_type(Some(&stub.focus_area));
        out.push(match db::find_track_exact(conn, title, artist)? {
            Some(track) => Recommendation::Catalog { track, suggest_type },
            None => Recommendation::Suggested {
                title: title.to_string(),
                artist: artist.to_string(),
                bpm: stub.estimated_bpm,
                suggest_type,
            },
        });
    }
    Ok(out)
}

pub async fn recommend_class_tracks(
    catalog: &Catalog,
    generator: &dyn CandidateGenerator,
    request: &RecommendRequest,
    deadline: Duration,
) -> Result<Recommendations> {
    let draft = {
        let conn = catalog.conn()?;
        prepare(&conn, request)?
    };
    let (stubs, status) = gather_candidates(generator, &draft.context, deadline).await;
    let tracks = {
        let conn = catalog.conn()?;
        finish(&conn, &draft, &stubs)?
    };

    if status == GeneratorStatus::Skipped {
        info!("No candidate generator configured, recommendations are empty");
    }
    info!(
        target = draft.target,
        returned = tracks.len(),
        generator = %status,
        "Recommended class tracks"
    );
    Ok(Recommendations {
        tracks,
        target_track_count: draft.target,
        generator_status: status.to_string(),
    })
}
