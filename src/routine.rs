//! Convert an assembled playlist into a routine payload the platform can store.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::merge::Identified;
use crate::normalize::slug;
use crate::playlist::PlaylistRequest;
use crate::types::{ClassPlaylist, Difficulty, Track, TrackStub};

pub const DEFAULT_THEME: &str = "Mixed energy ride";
pub const INTENSITY_ARC_LABEL: &str = "Warmup -> Build -> Peak -> Recovery -> Finish";
pub const RESISTANCE_SCALE_NOTES: &str = "1 = flat road, 10 = max hill";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutinePayload {
    pub name: String,
    pub description: String,
    pub theme: String,
    pub intensity_arc: String,
    pub resistance_scale_notes: String,
    pub class_summary: String,
    pub total_duration_minutes: f64,
    pub difficulty: String,
    pub track_ids: Vec<String>,
    pub tags: Vec<String>,
    pub spotify_playlist_id: String,
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Stable external identifier for a track: Spotify id, then platform id, then
/// local row id, then a slug of title and artist.
pub fn build_track_id(track: &Track) -> String {
    if let Some(spotify) = filled(&track.spotify_id) {
        return format!("spotify:{spotify}");
    }
    if let Some(base44) = filled(&track.base44_id) {
        return format!("base44:{base44}");
    }
    if let Some(id) = track.id {
        return format!("db:{id}");
    }
    let title = Some(track.title.trim()).filter(|t| !t.is_empty()).unwrap_or("unknown-title");
    let artist = Some(track.artist.trim()).filter(|a| !a.is_empty()).unwrap_or("unknown-artist");
    format!("fallback:{}:{}", slug(title), slug(artist))
}

/// Playlist tracks in curated order. Curated entries that are not in the
/// playlist are ignored; if none match, playlist order stands.
fn ordered_tracks<'a>(playlist: &'a ClassPlaylist, curated: Option<&[TrackStub]>) -> Vec<&'a Track> {
    let tracks: Vec<&Track> = playlist
        .playlist
        .iter()
        .flat_map(|p| p.tracks.iter().map(|t| &t.track))
        .collect();

    let Some(curated) = curated.filter(|c| !c.is_empty()) else {
        return tracks;
    };
    let lookup: HashMap<String, &Track> = tracks.iter().map(|t| (t.identity(), *t)).collect();
    let mut seen = HashSet::new();
    let selected: Vec<&Track> = curated
        .iter()
        .filter_map(|stub| lookup.get(&stub.identity()).copied())
        .filter(|t| seen.insert(t.identity()))
        .collect();

    if selected.is_empty() { tracks } else { selected }
}

pub fn build_routine_payload(
    request: &PlaylistRequest,
    description: Option<&str>,
    playlist: &ClassPlaylist,
    curated: Option<&[TrackStub]>,
) -> RoutinePayload {
    let track_ids: Vec<String> = ordered_tracks(playlist, curated)
        .into_iter()
        .map(build_track_id)
        .collect();

    let difficulty = Difficulty::parse_lenient(request.difficulty.as_deref())
        .unwrap_or(Difficulty::Intermediate)
        .to_string();
    let total = if playlist.estimated_duration > 0.0 {
        playlist.estimated_duration
    } else {
        f64::from(request.duration_minutes)
    };
    let audience = request.audience();
    let class_summary = format!(
        "{} tracks selected for a {}-minute target ({} minutes estimated). Audience: {}.",
        track_ids.len(),
        request.duration_minutes,
        total,
        audience.unwrap_or("mixed"),
    );
    let tags = ["ai-generated", difficulty.as_str(), audience.unwrap_or(""), request.theme().unwrap_or("")]
        .into_iter()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    RoutinePayload {
        name: format!("{}-min {} ride", request.duration_minutes, difficulty),
        description: description.unwrap_or_default().to_string(),
        theme: request.theme().unwrap_or(DEFAULT_THEME).to_string(),
        intensity_arc: INTENSITY_ARC_LABEL.to_string(),
        resistance_scale_notes: RESISTANCE_SCALE_NOTES.to_string(),
        class_summary,
        total_duration_minutes: total,
        difficulty,
        track_ids,
        tags,
        spotify_playlist_id: String::new(),
    }
}
