use std::collections::BTreeSet;

use crate::types::{FeedbackEntry, FeedbackSignals, Rating};

/// Does an entry apply to `audience`? Audience-agnostic entries apply to
/// everyone; with no audience requested every entry applies.
fn applies_to(entry: &FeedbackEntry, audience: Option<&str>) -> bool {
    let Some(wanted) = audience.map(str::trim).filter(|a| !a.is_empty()) else {
        return true;
    };
    match entry.audience.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(stored) => stored == wanted,
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Reduce raw feedback rows to liked/disliked title and artist sets.
///
/// Ratings are compared case-insensitively after trimming; anything other
/// than up/down is ignored. A name may land in both a liked and a disliked
/// set; consumers decide precedence.
pub fn aggregate<'a>(
    entries: impl IntoIterator<Item = &'a FeedbackEntry>,
    audience: Option<&str>,
) -> FeedbackSignals {
    let mut liked_titles = BTreeSet::new();
    let mut liked_artists = BTreeSet::new();
    let mut disliked_titles = BTreeSet::new();
    let mut disliked_artists = BTreeSet::new();

    for entry in entries {
        if !applies_to(entry, audience) {
            continue;
        }
        let rating = entry
            .rating
            .as_deref()
            .map(|r| r.trim().to_lowercase())
            .and_then(|r| r.parse::<Rating>().ok());
        let (titles, artists) = match rating {
            Some(Rating::Up) => (&mut liked_titles, &mut liked_artists),
            Some(Rating::Down) => (&mut disliked_titles, &mut disliked_artists),
            None => continue,
        };
        if let Some(title) = trimmed(&entry.track_title) {
            titles.insert(title.to_string());
        }
        if let Some(artist) = trimmed(&entry.track_artist) {
            artists.insert(artist.to_string());
        }
    }

    FeedbackSignals {
        liked_titles: liked_titles.into_iter().collect(),
        liked_artists: liked_artists.into_iter().collect(),
        disliked_titles: disliked_titles.into_iter().collect(),
        disliked_artists: disliked_artists.into_iter().collect(),
    }
}
