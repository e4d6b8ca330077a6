use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Categorical effort level stored on catalog tracks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Intensity {
    Low,
    Medium,
    High,
    Extreme,
}

/// Requested class difficulty. Each level accepts a pair of intensities.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn intensities(self) -> &'static [Intensity] {
        match self {
            Self::Beginner => &[Intensity::Low, Intensity::Medium],
            Self::Intermediate => &[Intensity::Medium, Intensity::High],
            Self::Advanced | Self::Expert => &[Intensity::High, Intensity::Extreme],
        }
    }

    /// Lenient parse: unknown or blank input yields `None` (no intensity filter).
    pub fn parse_lenient(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    }
}

/// Thumbs rating. Exactly two values are valid at the write boundary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

/// Where a playlist entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Db,
    Ai,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Track {
    pub id: Option<i64>,
    pub base44_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub bpm: Option<f64>,
    pub intensity: Option<String>,
    pub track_type: Option<String>,
    pub focus_area: Option<String>,
    pub position: Option<String>,
    pub duration_minutes: Option<f64>,
    pub resistance_min: Option<f64>,
    pub resistance_max: Option<f64>,
    pub cadence_min: Option<f64>,
    pub cadence_max: Option<f64>,
    pub base_rpm: Option<f64>,
    pub base_effortlevel: Option<f64>,
    pub spotify_id: Option<String>,
    pub spotify_url: Option<String>,
    pub spotify_album_art: Option<String>,
    pub notes: Option<String>,
}

/// Full stored record, including choreography payloads that only the details
/// view returns.
#[derive(Debug, Clone, Serialize)]
pub struct TrackDetails {
    #[serde(flatten)]
    pub track: Track,
    pub choreography: Option<serde_json::Value>,
    pub cues: Option<serde_json::Value>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A raw feedback row. Fields stay loosely typed so that aggregation can
/// tolerate whatever the platform synced in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Option<i64>,
    pub track_title: Option<String>,
    pub track_artist: Option<String>,
    pub rating: Option<String>,
    pub context: Option<String>,
    pub audience: Option<String>,
}

/// Aggregated like/dislike sets. Each list is trimmed, deduplicated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FeedbackSignals {
    pub liked_titles: Vec<String>,
    pub liked_artists: Vec<String>,
    pub disliked_titles: Vec<String>,
    pub disliked_artists: Vec<String>,
}

/// Per-title vote counts used for slot ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackTally {
    pub up: u32,
    pub down: u32,
    pub up_audience: u32,
    pub down_audience: u32,
}

/// Candidate stub returned by the generator. Carries no catalog identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrackStub {
    pub title: String,
    pub artist: String,
    pub estimated_bpm: Option<f64>,
    pub focus_area: String,
    pub notes: String,
}

/// A track placed in a playlist, with its feedback counts and provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistTrack {
    #[serde(flatten)]
    pub track: Track,
    pub thumbs_up: u32,
    pub thumbs_down: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience_thumbs_up: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience_thumbs_down: Option<u32>,
    pub source: TrackSource,
}

impl PlaylistTrack {
    pub fn from_catalog(track: Track, tally: FeedbackTally, audience_scoped: bool) -> Self {
        Self {
            track,
            thumbs_up: tally.up,
            thumbs_down: tally.down,
            audience_thumbs_up: audience_scoped.then_some(tally.up_audience),
            audience_thumbs_down: audience_scoped.then_some(tally.down_audience),
            source: TrackSource::Db,
        }
    }

    pub fn from_stub(stub: &TrackStub) -> Self {
        Self {
            track: Track {
                title: stub.title.clone(),
                artist: stub.artist.clone(),
                bpm: stub.estimated_bpm,
                intensity: Some(Intensity::Medium.to_string()),
                track_type: Some(stub.focus_area.clone()),
                focus_area: Some(stub.focus_area.clone()),
                notes: Some(stub.notes.clone()),
                ..Default::default()
            },
            thumbs_up: 0,
            thumbs_down: 0,
            audience_thumbs_up: None,
            audience_thumbs_down: None,
            source: TrackSource::Ai,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistPhase {
    pub phase: String,
    pub suggested_types: Vec<String>,
    pub tracks: Vec<PlaylistTrack>,
}

/// Output of the class-arc assembler.
#[derive(Debug, Clone, Serialize)]
pub struct ClassPlaylist {
    pub target_duration: u32,
    pub estimated_duration: f64,
    pub difficulty: Option<String>,
    pub theme: Option<String>,
    pub audience: Option<String>,
    pub playlist: Vec<PlaylistPhase>,
}

impl ClassPlaylist {
    pub fn track_count(&self) -> usize {
        self.playlist.iter().map(|p| p.tracks.len()).sum()
    }
}

/// Flat view of a playlist entry, tagged with its phase name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhasedTrack {
    pub phase: String,
    #[serde(flatten)]
    pub entry: PlaylistTrack,
}

/// DB anchors plus generated gap-fill, with provenance counts.
#[derive(Debug, Clone, Serialize)]
pub struct HybridPlaylist {
    pub target_duration: u32,
    pub estimated_duration: f64,
    pub difficulty: Option<String>,
    pub theme: Option<String>,
    pub audience: Option<String>,
    pub target_track_count: usize,
    pub achieved_track_count: usize,
    pub db_track_count: usize,
    pub ai_track_count: usize,
    pub generator_status: String,
    pub feedback_signals: FeedbackSignals,
    pub playlist: Vec<PlaylistPhase>,
    pub tracks: Vec<PhasedTrack>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutineSummary {
    pub name: String,
    pub description: Option<String>,
    pub theme: Option<String>,
    pub intensity_arc: Option<String>,
    pub difficulty: Option<String>,
    pub total_duration_minutes: Option<f64>,
    pub class_summary: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub spotify_playlist_id: Option<String>,
    pub track_count: i64,
}

/// Sum of track durations, treating missing values as zero, rounded to 0.1.
pub fn estimated_duration<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> f64 {
    let total: f64 = tracks
        .into_iter()
        .map(|t| t.duration_minutes.unwrap_or(0.0))
        .sum();
    (total * 10.0).round() / 10.0
}
