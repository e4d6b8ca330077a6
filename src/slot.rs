use std::cmp::Reverse;
use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;
use rusqlite::Connection;

use crate::db::{self, CandidateFilter};
use crate::normalize::normalize_for_matching;
use crate::types::{FeedbackTally, PlaylistTrack, Track};

/// Feedback tier, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Up-voted by the requested audience, never down-voted.
    AudienceFavourite,
    /// Up-voted, never down-voted.
    Liked,
    /// More ups than downs.
    NetPositive,
    Unrated,
    /// Net negative, or down-voted by the requested audience.
    Disfavoured,
}

impl Tier {
    pub fn of(tally: &FeedbackTally, audience_scoped: bool) -> Self {
        if audience_scoped && tally.down_audience > 0 {
            Self::Disfavoured
        } else if audience_scoped && tally.up_audience > 0 && tally.down == 0 {
            Self::AudienceFavourite
        } else if tally.up > 0 && tally.down == 0 {
            Self::Liked
        } else if tally.up > tally.down {
            Self::NetPositive
        } else if tally.up == 0 && tally.down == 0 {
            Self::Unrated
        } else {
            Self::Disfavoured
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotOrdering {
    /// Catalog order (by title), ignoring feedback.
    Title,
    /// By tier, then title.
    #[default]
    TierThenTitle,
    /// By tier, then global up-votes descending, then random.
    TierThenPopularity,
}

#[derive(Debug, Clone, Default)]
pub struct SlotQuery {
    pub filter: CandidateFilter,
    pub audience: Option<String>,
    pub limit: usize,
    pub ordering: SlotOrdering,
    /// Drop tracks the requested audience has down-voted instead of ranking them last.
    pub drop_audience_downvoted: bool,
}

impl SlotQuery {
    fn audience(&self) -> Option<&str> {
        self.audience.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }
}

/// Candidate tracks for one slot, ranked by feedback. An empty result is not
/// an error.
pub fn select<R: Rng + ?Sized>(
    conn: &Connection,
    query: &SlotQuery,
    rng: &mut R,
) -> Result<Vec<PlaylistTrack>, rusqlite::Error> {
    let tallies = db::feedback_tallies(conn, query.audience())?;
    select_with_tallies(conn, query, &tallies, rng)
}

/// As [`select`], reusing tallies fetched once for a whole playlist.
pub fn select_with_tallies<R: Rng + ?Sized>(
    conn: &Connection,
    query: &SlotQuery,
    tallies: &HashMap<String, FeedbackTally>,
    rng: &mut R,
) -> Result<Vec<PlaylistTrack>, rusqlite::Error> {
    let candidates = db::candidate_tracks(conn, &query.filter)?;
    Ok(rank(candidates, tallies, query, rng))
}

pub fn rank<R: Rng + ?Sized>(
    candidates: Vec<Track>,
    tallies: &HashMap<String, FeedbackTally>,
    query: &SlotQuery,
    rng: &mut R,
) -> Vec<PlaylistTrack> {
    let audience_scoped = query.audience().is_some();
    let mut ranked: Vec<(Tier, PlaylistTrack)> = candidates
        .into_iter()
        .map(|track| {
            let tally = tallies
                .get(&normalize_for_matching(&track.title))
                .copied()
                .unwrap_or_default();
            let tier = Tier::of(&tally, audience_scoped);
            (tier, PlaylistTrack::from_catalog(track, tally, audience_scoped))
        })
        .filter(|(_, entry)| {
            !(query.drop_audience_downvoted && entry.audience_thumbs_down.unwrap_or(0) > 0)
        })
        .collect();

    match query.ordering {
        SlotOrdering::Title => {}
        SlotOrdering::TierThenTitle => ranked.sort_by_key(|(tier, _)| *tier),
        SlotOrdering::TierThenPopularity => {
            ranked.shuffle(rng);
            ranked.sort_by_key(|(tier, entry)| (*tier, Reverse(entry.thumbs_up)));
        }
    }

    ranked
        .into_iter()
        .take(query.limit)
        .map(|(_, entry)| entry)
        .collect()
}
