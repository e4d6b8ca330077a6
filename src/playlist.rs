use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::arc::{class_arc, phase_for_focus_area};
use crate::db::{self, CandidateFilter};
use crate::error::Result;
use crate::feedback;
use crate::generator::{AnchorTrack, CandidateContext, CandidateGenerator, GeneratorStatus, gather_candidates};
use crate::merge::{Exclusions, MergeOutcome, TargetCountRule, merge};
use crate::normalize::normalize_for_matching;
use crate::slot::{self, SlotOrdering, SlotQuery};
use crate::store::Catalog;
use crate::types::{
    ClassPlaylist, Difficulty, FeedbackSignals, HybridPlaylist, PhasedTrack, PlaylistPhase,
    PlaylistTrack, TrackStub, estimated_duration,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistRequest {
    pub duration_minutes: u32,
    pub difficulty: Option<String>,
    pub theme: Option<String>,
    pub audience: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl PlaylistRequest {
    pub fn new(duration_minutes: u32) -> Self {
        Self {
            duration_minutes,
            ..Default::default()
        }
    }

    pub fn audience(&self) -> Option<&str> {
        present(&self.audience)
    }

    pub fn theme(&self) -> Option<&str> {
        present(&self.theme)
    }
}

/// Build the class arc for the requested length, one slot selection per
/// phase. Titles picked for earlier phases are excluded from later ones, and
/// tracks the requested audience has down-voted are never picked. Phases with
/// no qualifying tracks are kept, empty.
pub fn assemble<R: Rng + ?Sized>(
    conn: &Connection,
    request: &PlaylistRequest,
    rng: &mut R,
) -> Result<ClassPlaylist, rusqlite::Error> {
    let audience = request.audience();
    let tallies = db::feedback_tallies(conn, audience)?;
    let intensities: Vec<String> = Difficulty::parse_lenient(request.difficulty.as_deref())
        .map(|d| d.intensities().iter().map(|i| i.to_string()).collect())
        .unwrap_or_default();

    let mut used_titles: Vec<String> = Vec::new();
    let mut used_keys: HashSet<String> = HashSet::new();
    let mut phases = Vec::new();

    for descriptor in class_arc(request.duration_minutes) {
        let query = SlotQuery {
            filter: CandidateFilter {
                types: descriptor.types.iter().map(|t| t.to_string()).collect(),
                intensities: intensities.clone(),
                theme: request.theme().map(str::to_string),
                exclude_titles: used_titles.clone(),
                ..Default::default()
            },
            audience: audience.map(str::to_string),
            limit: usize::MAX,
            ordering: SlotOrdering::TierThenPopularity,
            drop_audience_downvoted: true,
        };

        let mut tracks = Vec::with_capacity(descriptor.count);
        for entry in slot::select_with_tallies(conn, &query, &tallies, rng)? {
            if tracks.len() >= descriptor.count {
                break;
            }
            if used_keys.insert(normalize_for_matching(&entry.track.title)) {
                used_titles.push(entry.track.title.clone());
                tracks.push(entry);
            }
        }
        debug!(
            phase = descriptor.name,
            selected = tracks.len(),
            wanted = descriptor.count,
            "Filled phase"
        );

        phases.push(PlaylistPhase {
            phase: descriptor.name.to_string(),
            suggested_types: descriptor.types.iter().map(|t| t.to_string()).collect(),
            tracks,
        });
    }

    Ok(ClassPlaylist {
        target_duration: request.duration_minutes,
        estimated_duration: estimated_duration(
            phases.iter().flat_map(|p| p.tracks.iter().map(|t| &t.track)),
        ),
        difficulty: request.difficulty.clone(),
        theme: request.theme.clone(),
        audience: request.audience.clone(),
        playlist: phases,
    })
}

/// Phase-ordered flat view.
pub fn flatten(phases: &[PlaylistPhase]) -> Vec<PhasedTrack> {
    phases
        .iter()
        .flat_map(|p| {
            p.tracks.iter().map(|t| PhasedTrack {
                phase: p.phase.clone(),
                entry: t.clone(),
            })
        })
        .collect()
}

/// Regroup flat entries under the phases of `skeleton`, in skeleton order.
/// Entries naming a phase the skeleton lacks open a new phase at the end.
fn regroup(entries: Vec<PhasedTrack>, skeleton: &[PlaylistPhase]) -> Vec<PlaylistPhase> {
    let mut phases: Vec<PlaylistPhase> = skeleton
        .iter()
        .map(|p| PlaylistPhase {
            phase: p.phase.clone(),
            suggested_types: p.suggested_types.clone(),
            tracks: Vec::new(),
        })
        .collect();

    for PhasedTrack { phase, entry } in entries {
        match phases.iter_mut().find(|p| p.phase == phase) {
            Some(existing) => existing.tracks.push(entry),
            None => phases.push(PlaylistPhase {
                phase,
                suggested_types: Vec::new(),
                tracks: vec![entry],
            }),
        }
    }
    phases
}

fn anchor_of(entry: &PhasedTrack) -> AnchorTrack {
    AnchorTrack {
        title: entry.entry.track.title.clone(),
        artist: entry.entry.track.artist.clone(),
        bpm: entry.entry.track.bpm,
        track_type: entry.entry.track.track_type.clone(),
        phase: entry.phase.clone(),
    }
}

/// Catalog half of a hybrid playlist, ready for gap-fill.
#[derive(Debug, Clone)]
pub struct HybridDraft {
    pub base: ClassPlaylist,
    pub target: usize,
    /// Catalog entries that survived the feedback exclusions, capped at `target`.
    pub anchors: Vec<PhasedTrack>,
    pub signals: FeedbackSignals,
}

impl HybridDraft {
    pub fn needed(&self) -> usize {
        self.target.saturating_sub(self.anchors.len())
    }

    pub fn candidate_context(&self) -> CandidateContext {
        CandidateContext {
            duration_minutes: self.base.target_duration,
            difficulty: self.base.difficulty.clone(),
            theme: self.base.theme.clone(),
            audience: self.base.audience.clone(),
            needed_count: self.needed(),
            existing_tracks: self.anchors.iter().map(anchor_of).collect(),
            feedback_signals: self.signals.clone(),
            ..Default::default()
        }
    }
}

pub fn prepare_hybrid<R: Rng + ?Sized>(
    conn: &Connection,
    request: &PlaylistRequest,
    target_tracks: Option<u32>,
    rule: TargetCountRule,
    rng: &mut R,
) -> Result<HybridDraft, rusqlite::Error> {
    let base = assemble(conn, request, rng)?;
    let signals = feedback::aggregate(&db::all_feedback(conn)?, request.audience());
    let exclusions = Exclusions::from_signals(&signals);
    let target = rule.target(request.duration_minutes, target_tracks);
    let anchors = merge(flatten(&base.playlist), Vec::new(), &exclusions, target).tracks;

    Ok(HybridDraft {
        base,
        target,
        anchors,
        signals,
    })
}

/// Catalog anchors in order, then generated candidates up to the target.
/// Candidates are tagged with the phase their focus area points to.
pub fn gap_fill(draft: &HybridDraft, stubs: &[TrackStub]) -> MergeOutcome<PhasedTrack> {
    let exclusions = Exclusions::from_signals(&draft.signals);
    let generated = stubs.iter().map(|stub| PhasedTrack {
        phase: phase_for_focus_area(&stub.focus_area).to_string(),
        entry: PlaylistTrack::from_stub(stub),
    });
    merge(draft.anchors.iter().cloned(), generated, &exclusions, draft.target)
}

/// [`gap_fill`], regrouped by phase. Generated tracks join the phase their
/// focus area points to.
pub fn compose(draft: HybridDraft, stubs: &[TrackStub], status: &GeneratorStatus) -> HybridPlaylist {
    let outcome = gap_fill(&draft, stubs);

    let playlist = regroup(outcome.tracks, &draft.base.playlist);
    let tracks = flatten(&playlist);

    HybridPlaylist {
        target_duration: draft.base.target_duration,
        estimated_duration: estimated_duration(tracks.iter().map(|t| &t.entry.track)),
        difficulty: draft.base.difficulty,
        theme: draft.base.theme,
        audience: draft.base.audience,
        target_track_count: outcome.target,
        achieved_track_count: tracks.len(),
        db_track_count: outcome.db_count,
        ai_track_count: outcome.generated_count,
        generator_status: status.to_string(),
        feedback_signals: draft.signals,
        playlist,
        tracks,
    }
}

/// Catalog anchors plus generated gap-fill. Only an unreachable catalog is an
/// error; generator trouble degrades to a catalog-only playlist.
pub async fn build_hybrid_playlist(
    catalog: &Catalog,
    generator: &dyn CandidateGenerator,
    request: &PlaylistRequest,
    target_tracks: Option<u32>,
    rule: TargetCountRule,
    deadline: Duration,
) -> Result<HybridPlaylist> {
    let draft = {
        let conn = catalog.conn()?;
        let mut rng = rand::rng();
        prepare_hybrid(&conn, request, target_tracks, rule, &mut rng)?
    };

    let (stubs, status) = gather_candidates(generator, &draft.candidate_context(), deadline).await;
    let playlist = compose(draft, &stubs, &status);
    info!(
        target = playlist.target_track_count,
        achieved = playlist.achieved_track_count,
        db = playlist.db_track_count,
        ai = playlist.ai_track_count,
        generator = %playlist.generator_status,
        "Built hybrid playlist"
    );
    Ok(playlist)
}
