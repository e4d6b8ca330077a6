use schemars::JsonSchema;
use serde::Deserialize;

use crate::db;
use crate::normalize::parse_csv_list;
use crate::playlist::PlaylistRequest;
use crate::recommend::{DEFAULT_CLASS_LENGTH, RecommendRequest};

pub const DEFAULT_PLAYLIST_MINUTES: u32 = 45;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SearchTracksParams {
    #[schemars(description = "Minimum BPM")]
    pub bpm_min: Option<f64>,
    #[schemars(description = "Maximum BPM")]
    pub bpm_max: Option<f64>,
    #[schemars(description = "Intensity: low, medium, high or extreme")]
    pub intensity: Option<String>,
    #[schemars(description = "Track type, partial match (e.g. 'climb', 'sprint', 'warmup')")]
    pub track_type: Option<String>,
    #[schemars(description = "Riding position, partial match (e.g. 'seated', 'standing')")]
    pub position: Option<String>,
    #[schemars(description = "Artist name, partial match")]
    pub artist: Option<String>,
    #[schemars(description = "Focus area, partial match")]
    pub focus_area: Option<String>,
    #[schemars(description = "Keyword matched against title, artist, album and notes")]
    pub keyword: Option<String>,
    #[schemars(description = "Max results (default 20, max 50)")]
    pub limit: Option<u32>,
}

impl SearchTracksParams {
    pub(crate) fn into_search_params(self) -> db::SearchParams {
        db::SearchParams {
            bpm_min: self.bpm_min,
            bpm_max: self.bpm_max,
            intensity: self.intensity,
            track_type: self.track_type,
            position: self.position,
            artist: self.artist,
            focus_area: self.focus_area,
            keyword: self.keyword,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SuggestTracksForSlotParams {
    #[schemars(
        description = "Class slot type: warmup, climb, sprint, recovery, cooldown, intervals or endurance"
    )]
    pub slot_type: String,
    #[schemars(description = "Minimum track duration in minutes")]
    pub duration_min: Option<f64>,
    #[schemars(description = "Maximum track duration in minutes")]
    pub duration_max: Option<f64>,
    #[schemars(description = "Required intensity (low, medium, high, extreme)")]
    pub intensity: Option<String>,
    #[schemars(description = "Minimum BPM")]
    pub bpm_min: Option<f64>,
    #[schemars(description = "Maximum BPM")]
    pub bpm_max: Option<f64>,
    #[schemars(description = "Comma-separated titles to exclude (already in the playlist)")]
    pub exclude_titles: Option<String>,
    #[schemars(
        description = "Audience segment (e.g. '50+', 'mixed', 'young'); its down-votes rank a track last"
    )]
    pub audience: Option<String>,
    #[schemars(description = "Rank tracks by feedback before title (default true)")]
    pub prefer_top_rated: Option<bool>,
    #[schemars(description = "Max results (default 10, max 50)")]
    pub limit: Option<u32>,
}

impl SuggestTracksForSlotParams {
    pub(crate) fn into_query(self) -> crate::slot::SlotQuery {
        use crate::slot::{SlotOrdering, SlotQuery};

        let ordering = if self.prefer_top_rated.unwrap_or(true) {
            SlotOrdering::TierThenTitle
        } else {
            SlotOrdering::Title
        };
        SlotQuery {
            filter: db::CandidateFilter {
                types: vec![self.slot_type.trim().to_string()],
                intensities: self
                    .intensity
                    .map(|i| i.trim().to_string())
                    .filter(|i| !i.is_empty())
                    .into_iter()
                    .collect(),
                duration_min: self.duration_min,
                duration_max: self.duration_max,
                bpm_min: self.bpm_min,
                bpm_max: self.bpm_max,
                exclude_titles: parse_csv_list(self.exclude_titles.as_deref()),
                ..Default::default()
            },
            audience: self.audience,
            limit: self.limit.unwrap_or(10).clamp(1, db::MAX_LIMIT) as usize,
            ordering,
            drop_audience_downvoted: false,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindSimilarTracksParams {
    #[schemars(description = "Reference track title (partial match)")]
    pub track_title: String,
    #[schemars(description = "BPM window around the reference (default 15)")]
    pub bpm_tolerance: Option<f64>,
    #[schemars(description = "Max results (default 10, max 50)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetTrackDetailsParams {
    #[schemars(description = "Track title (partial match; an exact title wins)")]
    pub track_title: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GetTopRatedTracksParams {
    #[schemars(description = "Usage context (e.g. warmup, climb, sprint)")]
    pub context: Option<String>,
    #[schemars(description = "Audience segment (e.g. '50+', 'mixed', 'young')")]
    pub audience: Option<String>,
    #[schemars(description = "'up' (default) or 'down'")]
    pub rating: Option<String>,
    #[schemars(description = "Max results (default 15, max 50)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListRoutinesParams {
    #[schemars(description = "Difficulty filter (beginner, intermediate, advanced, expert)")]
    pub difficulty: Option<String>,
    #[schemars(description = "Max results (default 20, max 50)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct BuildClassPlaylistParams {
    #[schemars(description = "Class length in minutes (default 45)")]
    pub duration_minutes: Option<u32>,
    #[schemars(description = "beginner, intermediate, advanced or expert; anything else disables the intensity filter")]
    pub difficulty: Option<String>,
    #[schemars(description = "Theme keyword required in track notes or focus area")]
    pub theme: Option<String>,
    #[schemars(description = "Audience segment; tracks it has down-voted are never picked")]
    pub audience: Option<String>,
}

impl BuildClassPlaylistParams {
    pub(crate) fn into_request(self) -> PlaylistRequest {
        PlaylistRequest {
            duration_minutes: self.duration_minutes.unwrap_or(DEFAULT_PLAYLIST_MINUTES),
            difficulty: self.difficulty,
            theme: self.theme,
            audience: self.audience,
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct BuildHybridPlaylistParams {
    #[serde(flatten)]
    pub playlist: BuildClassPlaylistParams,
    #[schemars(description = "Desired total track count (clamped to 5-30); defaults by class length")]
    pub target_tracks: Option<u32>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct RecommendClassTracksParams {
    #[schemars(description = "Class length in minutes (default 55)")]
    pub class_length_minutes: Option<u32>,
    pub theme: Option<String>,
    pub vibe: Option<String>,
    #[schemars(description = "Comma-separated arc, e.g. 'warmup, climb, sprint, cooldown'")]
    pub custom_intensity_arc: Option<String>,
    #[schemars(description = "Comma-separated genres to favour")]
    pub preferred_genres: Option<String>,
    #[schemars(description = "Comma-separated artists to favour")]
    pub preferred_artists: Option<String>,
    #[schemars(description = "Comma-separated genres to avoid")]
    pub exclude_genres: Option<String>,
    #[schemars(description = "Comma-separated songs or artists to drop (substring match)")]
    pub exclude_songs_or_artists: Option<String>,
    pub audience: Option<String>,
}

impl RecommendClassTracksParams {
    pub(crate) fn into_request(self) -> RecommendRequest {
        RecommendRequest {
            class_length_minutes: self.class_length_minutes.unwrap_or(DEFAULT_CLASS_LENGTH),
            theme: self.theme,
            vibe: self.vibe,
            custom_intensity_arc: self.custom_intensity_arc,
            preferred_genres: self.preferred_genres,
            preferred_artists: self.preferred_artists,
            exclude_genres: self.exclude_genres,
            exclude_songs_or_artists: self.exclude_songs_or_artists,
            audience: self.audience,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RateTrackParams {
    #[schemars(description = "Track title (partial match)")]
    pub track_title: String,
    #[schemars(description = "'up' or 'down'")]
    pub rating: String,
    #[schemars(description = "Usage context (e.g. warmup, climb, sprint, recovery, cooldown)")]
    pub context: Option<String>,
    #[schemars(description = "Audience segment (e.g. '50+', 'mixed', 'young')")]
    pub audience: Option<String>,
}
