use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::normalize::{normalize_for_matching, track_key};
use crate::types::{FeedbackSignals, PhasedTrack, PlaylistTrack, Track, TrackStub};

pub const MIN_EXPLICIT_TARGET: u32 = 5;
pub const MAX_EXPLICIT_TARGET: u32 = 30;

/// How many tracks a class of a given length should hold.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
pub enum TargetCountRule {
    /// <=30 min: 10, <=45 min: 12, longer: 15.
    #[strum(serialize = "buckets")]
    #[serde(rename = "buckets")]
    DurationBuckets,
    /// One track per four minutes, rounded half to even, clamped to [8, 20].
    #[strum(serialize = "quarter")]
    #[serde(rename = "quarter")]
    QuarterDuration,
}

impl TargetCountRule {
    /// An explicit override wins under either rule, clamped to [5, 30].
    pub fn target(self, duration_minutes: u32, explicit: Option<u32>) -> usize {
        if let Some(explicit) = explicit {
            return explicit.clamp(MIN_EXPLICIT_TARGET, MAX_EXPLICIT_TARGET) as usize;
        }
        match self {
            Self::DurationBuckets => match duration_minutes {
                0..=30 => 10,
                31..=45 => 12,
                _ => 15,
            },
            Self::QuarterDuration => {
                let quarter = (f64::from(duration_minutes) / 4.0).round_ties_even() as usize;
                quarter.clamp(8, 20)
            }
        }
    }
}

/// Anything with a dedup identity.
pub trait Identified {
    fn title(&self) -> &str;
    fn artist(&self) -> &str;

    fn identity(&self) -> String {
        track_key(self.title(), self.artist())
    }
}

impl Identified for Track {
    fn title(&self) -> &str {
        &self.title
    }
    fn artist(&self) -> &str {
        &self.artist
    }
}

impl Identified for TrackStub {
    fn title(&self) -> &str {
        &self.title
    }
    fn artist(&self) -> &str {
        &self.artist
    }
}

impl Identified for PlaylistTrack {
    fn title(&self) -> &str {
        &self.track.title
    }
    fn artist(&self) -> &str {
        &self.track.artist
    }
}

impl Identified for PhasedTrack {
    fn title(&self) -> &str {
        &self.entry.track.title
    }
    fn artist(&self) -> &str {
        &self.entry.track.artist
    }
}

/// Disliked titles and artists, stored normalized.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    titles: HashSet<String>,
    artists: HashSet<String>,
}

impl Exclusions {
    pub fn new<I, J, S, T>(titles: I, artists: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let collect = |it: Vec<String>| -> HashSet<String> {
            it.into_iter().filter(|s| !s.is_empty()).collect()
        };
        Self {
            titles: collect(
                titles
                    .into_iter()
                    .map(|t| normalize_for_matching(t.as_ref()))
                    .collect(),
            ),
            artists: collect(
                artists
                    .into_iter()
                    .map(|a| normalize_for_matching(a.as_ref()))
                    .collect(),
            ),
        }
    }

    pub fn from_signals(signals: &FeedbackSignals) -> Self {
        Self::new(&signals.disliked_titles, &signals.disliked_artists)
    }

    /// False for entries with a blank title or artist, or a disliked one.
    pub fn allows(&self, item: &impl Identified) -> bool {
        let title = normalize_for_matching(item.title());
        let artist = normalize_for_matching(item.artist());
        !title.is_empty()
            && !artist.is_empty()
            && !self.titles.contains(&title)
            && !self.artists.contains(&artist)
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome<T> {
    pub tracks: Vec<T>,
    pub db_count: usize,
    pub generated_count: usize,
    pub target: usize,
}

impl<T> MergeOutcome<T> {
    pub fn shortfall(&self) -> usize {
        self.target.saturating_sub(self.tracks.len())
    }
}

/// Merge catalog anchors with generated candidates.
///
/// Catalog entries come first in their given order and are never displaced.
/// Generated entries only fill the gap up to `target`. Identity is the
/// normalized (title, artist) pair, first occurrence wins across both lists.
/// The result never exceeds `target`; a short result is not an error.
pub fn merge<T, D, G>(db: D, generated: G, exclusions: &Exclusions, target: usize) -> MergeOutcome<T>
where
    T: Identified,
    D: IntoIterator<Item = T>,
    G: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    let mut tracks = Vec::new();

    for item in db {
        if tracks.len() >= target {
            break;
        }
        if exclusions.allows(&item) && seen.insert(item.identity()) {
            tracks.push(item);
        }
    }
    let db_count = tracks.len();

    for item in generated {
        if tracks.len() >= target {
            break;
        }
        if exclusions.allows(&item) && seen.insert(item.identity()) {
            tracks.push(item);
        }
    }
    let generated_count = tracks.len() - db_count;

    MergeOutcome {
        tracks,
        db_count,
        generated_count,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, artist: &str) -> Track {
        Track {
            title: title.to_string(),
            artist: artist.to_string(),
            ..Default::default()
        }
    }

    fn titles(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn bucket_rule_matches_duration_bands() {
        let rule = TargetCountRule::DurationBuckets;
        assert_eq!(rule.target(20, None), 10);
        assert_eq!(rule.target(30, None), 10);
        assert_eq!(rule.target(31, None), 12);
        assert_eq!(rule.target(45, None), 12);
        assert_eq!(rule.target(46, None), 15);
        assert_eq!(rule.target(90, None), 15);
    }

    #[test]
    fn quarter_rule_rounds_and_clamps() {
        let rule = TargetCountRule::QuarterDuration;
        assert_eq!(rule.target(55, None), 14);
        assert_eq!(rule.target(45, None), 11);
        assert_eq!(rule.target(20, None), 8);
        assert_eq!(rule.target(120, None), 20);
        // Halves go to the even neighbour.
        assert_eq!(rule.target(42, None), 10);
        assert_eq!(rule.target(50, None), 12);
        assert_eq!(rule.target(58, None), 14);
        assert_eq!(rule.target(66, None), 16);
        assert_eq!(rule.target(30, None), 8);
    }

    #[test]
    fn explicit_target_is_clamped_under_both_rules() {
        for rule in [TargetCountRule::DurationBuckets, TargetCountRule::QuarterDuration] {
            assert_eq!(rule.target(45, Some(2)), 5);
            assert_eq!(rule.target(45, Some(18)), 18);
            assert_eq!(rule.target(45, Some(99)), 30);
        }
    }

    #[test]
    fn rule_names_parse() {
        assert_eq!("buckets".parse::<TargetCountRule>().ok(), Some(TargetCountRule::DurationBuckets));
        assert_eq!("quarter".parse::<TargetCountRule>().ok(), Some(TargetCountRule::QuarterDuration));
        assert_eq!(TargetCountRule::QuarterDuration.to_string(), "quarter");
    }

    #[test]
    fn repeated_generated_track_collapses_and_shortfall_is_returned() {
        let a = track("Track A", "Artist A");
        let b = track("Track B", "Artist B");
        let outcome = merge(
            Vec::<Track>::new(),
            vec![a.clone(), b.clone(), a.clone()],
            &Exclusions::default(),
            5,
        );
        assert_eq!(outcome.tracks, vec![a, b]);
        assert_eq!(outcome.db_count, 0);
        assert_eq!(outcome.generated_count, 2);
        assert_eq!(outcome.shortfall(), 3);
    }

    #[test]
    fn catalog_tracks_win_identity_ties() {
        let db = vec![track("Levels", "Avicii")];
        let generated = vec![track("  LEVELS", "avicii "), track("Roar", "Katy Perry")];
        let outcome = merge(db, generated, &Exclusions::default(), 5);
        assert_eq!(titles(&outcome.tracks), vec!["Levels", "Roar"]);
        assert_eq!(outcome.db_count, 1);
        assert_eq!(outcome.generated_count, 1);
    }

    #[test]
    fn no_generated_tracks_when_catalog_fills_target() {
        let db = vec![track("A", "x"), track("B", "y"), track("C", "z")];
        let generated = vec![track("D", "w")];
        let outcome = merge(db, generated, &Exclusions::default(), 2);
        assert_eq!(titles(&outcome.tracks), vec!["A", "B"]);
        assert_eq!(outcome.generated_count, 0);
    }

    #[test]
    fn exclusions_apply_to_both_sources() {
        let signals = FeedbackSignals {
            disliked_titles: vec!["Roar".into()],
            disliked_artists: vec!["Nickelback".into()],
            ..Default::default()
        };
        let exclusions = Exclusions::from_signals(&signals);
        let db = vec![
            track("roar ", "Katy Perry"),
            track("Photograph", "NICKELBACK"),
            track("", "Nobody"),
            track("Untitled", "  "),
            track("Levels", "Avicii"),
        ];
        let generated = vec![track("Rockstar", "Nickelback"), track("Roar", "Cover Band"), track("Wake Me Up", "Avicii")];
        let outcome = merge(db, generated, &exclusions, 10);
        assert_eq!(titles(&outcome.tracks), vec!["Levels", "Wake Me Up"]);
    }

    #[test]
    fn duplicate_catalog_entries_keep_first() {
        let mut first = track("Levels", "Avicii");
        first.bpm = Some(126.0);
        let mut second = track("levels", "AVICII");
        second.bpm = Some(128.0);
        let outcome = merge(vec![first, second], Vec::new(), &Exclusions::default(), 5);
        assert_eq!(outcome.tracks.len(), 1);
        assert_eq!(outcome.tracks[0].bpm, Some(126.0));
    }

    #[test]
    fn zero_target_yields_nothing() {
        let outcome = merge(vec![track("A", "x")], vec![track("B", "y")], &Exclusions::default(), 0);
        assert!(outcome.tracks.is_empty());
    }
}
