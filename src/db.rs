use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;

use crate::normalize::normalize_for_matching;
use crate::types::{FeedbackEntry, FeedbackTally, RoutineSummary, Track, TrackDetails};

/// Track columns shared by every catalog read.
pub(crate) const TRACK_COLUMNS: &str = "
    t.id, t.base44_id, t.title, COALESCE(t.artist, '') AS artist, t.album,
    t.bpm, t.intensity, t.track_type, t.focus_area, t.position,
    t.duration_minutes, t.resistance_min, t.resistance_max,
    t.cadence_min, t.cadence_max, t.base_rpm, t.base_effortlevel,
    t.spotify_id, t.spotify_url, t.spotify_album_art, t.notes
";

pub(crate) fn row_to_track(row: &rusqlite::Row) -> Result<Track, rusqlite::Error> {
    Ok(Track {
        id: row.get("id")?,
        base44_id: row.get("base44_id")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        album: row.get("album")?,
        bpm: row.get("bpm")?,
        intensity: row.get("intensity")?,
        track_type: row.get("track_type")?,
        focus_area: row.get("focus_area")?,
        position: row.get("position")?,
        duration_minutes: row.get("duration_minutes")?,
        resistance_min: row.get("resistance_min")?,
        resistance_max: row.get("resistance_max")?,
        cadence_min: row.get("cadence_min")?,
        cadence_max: row.get("cadence_max")?,
        base_rpm: row.get("base_rpm")?,
        base_effortlevel: row.get("base_effortlevel")?,
        spotify_id: row.get("spotify_id")?,
        spotify_url: row.get("spotify_url")?,
        spotify_album_art: row.get("spotify_album_art")?,
        notes: row.get("notes")?,
    })
}

/// JSON stored as text. Anything that does not parse is returned as a string.
fn json_column(raw: Option<String>) -> Option<serde_json::Value> {
    raw.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s)))
}

pub(crate) fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn contains_pattern(needle: &str) -> String {
    format!("%{}%", escape_like(needle))
}

/// Ordered predicate list with bound parameters. Each clause uses anonymous
/// `?` placeholders, so clause order and parameter order stay in lockstep.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    pub fn eq(&mut self, column: &str, value: impl Into<Value>) {
        self.push(format!("{column} = ?"), [value.into()]);
    }

    pub fn at_least(&mut self, column: &str, value: f64) {
        self.push(format!("{column} >= ?"), [Value::Real(value)]);
    }

    pub fn at_most(&mut self, column: &str, value: f64) {
        self.push(format!("{column} <= ?"), [Value::Real(value)]);
    }

    /// Case-insensitive substring match (SQLite LIKE folds ASCII case).
    pub fn contains(&mut self, column: &str, needle: &str) {
        self.push(
            format!("{column} LIKE ? ESCAPE '\\'"),
            [Value::Text(contains_pattern(needle))],
        );
    }

    /// Substring match against any of several columns.
    pub fn contains_any_column(&mut self, columns: &[&str], needle: &str) {
        if columns.is_empty() {
            return;
        }
        let pattern = contains_pattern(needle);
        let clause = columns
            .iter()
            .map(|c| format!("{c} LIKE ? ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.push(
            format!("({clause})"),
            columns.iter().map(|_| Value::Text(pattern.clone())),
        );
    }

    /// Substring match of one column against any of several needles.
    pub fn contains_any(&mut self, column: &str, needles: &[String]) {
        if needles.is_empty() {
            return;
        }
        let clause = needles
            .iter()
            .map(|_| format!("{column} LIKE ? ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.push(
            format!("({clause})"),
            needles.iter().map(|n| Value::Text(contains_pattern(n))),
        );
    }

    pub fn one_of(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(
            format!("{column} IN ({placeholders})"),
            values.iter().map(|v| Value::Text(v.clone())),
        );
    }

    /// Exclude rows whose trimmed, lowercased column is in `values`.
    pub fn none_of_normalized(&mut self, column: &str, values: &[String]) {
        let normalized: Vec<String> = values
            .iter()
            .map(|v| normalize_for_matching(v))
            .filter(|v| !v.is_empty())
            .collect();
        if normalized.is_empty() {
            return;
        }
        let placeholders = vec!["?"; normalized.len()].join(", ");
        self.push(
            format!("LOWER(TRIM({column})) NOT IN ({placeholders})"),
            normalized.into_iter().map(Value::Text),
        );
    }

    /// ` WHERE a AND b` or the empty string.
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }
}

pub const MAX_LIMIT: u32 = 50;

fn capped(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub bpm_min: Option<f64>,
    pub bpm_max: Option<f64>,
    pub intensity: Option<String>,
    pub track_type: Option<String>,
    pub position: Option<String>,
    pub artist: Option<String>,
    pub focus_area: Option<String>,
    pub keyword: Option<String>,
    pub limit: Option<u32>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn search_tracks(conn: &Connection, params: &SearchParams) -> Result<Vec<Track>, rusqlite::Error> {
    let mut q = QueryBuilder::new();
    if let Some(min) = params.bpm_min {
        q.at_least("t.bpm", min);
    }
    if let Some(max) = params.bpm_max {
        q.at_most("t.bpm", max);
    }
    if let Some(intensity) = non_blank(&params.intensity) {
        q.push("LOWER(t.intensity) = ?", [Value::Text(intensity.to_lowercase())]);
    }
    if let Some(track_type) = non_blank(&params.track_type) {
        q.contains("t.track_type", track_type);
    }
    if let Some(position) = non_blank(&params.position) {
        q.contains("t.position", position);
    }
    if let Some(artist) = non_blank(&params.artist) {
        q.contains("t.artist", artist);
    }
    if let Some(focus_area) = non_blank(&params.focus_area) {
        q.contains("t.focus_area", focus_area);
    }
    if let Some(keyword) = non_blank(&params.keyword) {
        q.contains_any_column(&["t.title", "t.artist", "t.album", "t.notes"], keyword);
    }

    let limit = capped(params.limit, 20);
    let sql = format!(
        "SELECT {TRACK_COLUMNS} FROM tracks t{} ORDER BY t.title, t.id LIMIT {limit}",
        q.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(q.params()), row_to_track)?;
    rows.collect()
}

/// Hard filters for slot candidates. Ranking happens in `slot`.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Track type substrings; a track qualifies if it matches any.
    pub types: Vec<String>,
    pub intensities: Vec<String>,
    /// Substring required in notes or focus area.
    pub theme: Option<String>,
    pub duration_min: Option<f64>,
    pub duration_max: Option<f64>,
    pub bpm_min: Option<f64>,
    pub bpm_max: Option<f64>,
    /// Titles removed before ranking, compared trimmed and case-insensitively.
    pub exclude_titles: Vec<String>,
}

pub fn candidate_tracks(
    conn: &Connection,
    filter: &CandidateFilter,
) -> Result<Vec<Track>, rusqlite::Error> {
    let mut q = QueryBuilder::new();
    q.contains_any("t.track_type", &filter.types);
    if !filter.intensities.is_empty() {
        let lowered: Vec<String> = filter.intensities.iter().map(|i| i.to_lowercase()).collect();
        q.one_of("LOWER(t.intensity)", &lowered);
    }
    if let Some(theme) = non_blank(&filter.theme) {
        q.contains_any_column(&["t.notes", "t.focus_area"], theme);
    }
    if let Some(min) = filter.duration_min {
        q.at_least("t.duration_minutes", min);
    }
    if let Some(max) = filter.duration_max {
        q.at_most("t.duration_minutes", max);
    }
    if let Some(min) = filter.bpm_min {
        q.at_least("t.bpm", min);
    }
    if let Some(max) = filter.bpm_max {
        q.at_most("t.bpm", max);
    }
    q.none_of_normalized("t.title", &filter.exclude_titles);

    let sql = format!(
        "SELECT {TRACK_COLUMNS} FROM tracks t{} ORDER BY t.title, t.id",
        q.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(q.params()), row_to_track)?;
    rows.collect()
}

/// Vote counts per normalized title. Audience columns count only rows whose
/// stored audience equals `audience` exactly.
pub fn feedback_tallies(
    conn: &Connection,
    audience: Option<&str>,
) -> Result<HashMap<String, FeedbackTally>, rusqlite::Error> {
    let audience = audience.map(str::trim).unwrap_or("");
    let mut stmt = conn.prepare(
        "SELECT LOWER(TRIM(track_title)) AS key,
                SUM(CASE WHEN LOWER(rating) = 'up' THEN 1 ELSE 0 END),
                SUM(CASE WHEN LOWER(rating) = 'down' THEN 1 ELSE 0 END),
                SUM(CASE WHEN LOWER(rating) = 'up' AND ?1 != '' AND audience = ?1 THEN 1 ELSE 0 END),
                SUM(CASE WHEN LOWER(rating) = 'down' AND ?1 != '' AND audience = ?1 THEN 1 ELSE 0 END)
         FROM track_feedback
         GROUP BY LOWER(TRIM(track_title))",
    )?;
    let rows = stmt.query_map(params![audience], |row| {
        Ok((
            row.get::<_, String>(0)?,
            FeedbackTally {
                up: row.get(1)?,
                down: row.get(2)?,
                up_audience: row.get(3)?,
                down_audience: row.get(4)?,
            },
        ))
    })?;
    rows.collect()
}

pub fn all_feedback(conn: &Connection) -> Result<Vec<FeedbackEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, track_title, track_artist, rating, context, audience
         FROM track_feedback ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(FeedbackEntry {
            id: row.get(0)?,
            track_title: row.get(1)?,
            track_artist: row.get(2)?,
            rating: row.get(3)?,
            context: row.get(4)?,
            audience: row.get(5)?,
        })
    })?;
    rows.collect()
}

/// First track whose title contains `partial`, preferring an exact title match.
pub fn find_track_by_title(
    conn: &Connection,
    partial: &str,
) -> Result<Option<TrackDetails>, rusqlite::Error> {
    let sql = format!(
        "SELECT {TRACK_COLUMNS}, t.choreography, t.cues, t.created_at, t.updated_at
         FROM tracks t
         WHERE t.title LIKE ?1 ESCAPE '\\'
         ORDER BY (LOWER(TRIM(t.title)) = ?2) DESC, t.title, t.id
         LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![contains_pattern(partial.trim()), normalize_for_matching(partial)],
        |row| {
            Ok(TrackDetails {
                track: row_to_track(row)?,
                choreography: json_column(row.get("choreography")?),
                cues: json_column(row.get("cues")?),
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
            })
        },
    )
    .optional()
}

/// Exact (trimmed, case-insensitive) title + artist lookup.
pub fn find_track_exact(
    conn: &Connection,
    title: &str,
    artist: &str,
) -> Result<Option<Track>, rusqlite::Error> {
    let sql = format!(
        "SELECT {TRACK_COLUMNS} FROM tracks t
         WHERE LOWER(TRIM(t.title)) = ?1 AND LOWER(TRIM(COALESCE(t.artist, ''))) = ?2
         ORDER BY t.id LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![normalize_for_matching(title), normalize_for_matching(artist)],
        row_to_track,
    )
    .optional()
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarTrack {
    #[serde(flatten)]
    pub track: Track,
    pub bpm_diff: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarTracks {
    pub reference_track: Track,
    pub similar_tracks: Vec<SimilarTrack>,
}

pub fn find_similar_tracks(
    conn: &Connection,
    partial_title: &str,
    bpm_tolerance: f64,
    limit: Option<u32>,
) -> Result<Option<SimilarTracks>, rusqlite::Error> {
    let Some(reference) = find_track_by_title(conn, partial_title)?.map(|d| d.track) else {
        return Ok(None);
    };

    let mut q = QueryBuilder::new();
    q.push("t.title != ?", [Value::Text(reference.title.clone())]);
    if let Some(bpm) = reference.bpm {
        let tolerance = bpm_tolerance.abs();
        q.push(
            "t.bpm BETWEEN ? AND ?",
            [Value::Real(bpm - tolerance), Value::Real(bpm + tolerance)],
        );
    }
    if let Some(intensity) = reference.intensity.as_deref().filter(|s| !s.is_empty()) {
        q.eq("t.intensity", intensity.to_string());
    }

    let limit = capped(limit, 10);
    let reference_bpm = reference.bpm;
    let mut params = vec![reference_bpm.map_or(Value::Null, Value::Real)];
    let where_clause = q.where_clause();
    params.extend(q.into_params());
    let sql = format!(
        "SELECT {TRACK_COLUMNS}, ABS(t.bpm - ?) AS bpm_diff
         FROM tracks t{where_clause}
         ORDER BY bpm_diff IS NULL, bpm_diff, t.title
         LIMIT {limit}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok(SimilarTrack {
            track: row_to_track(row)?,
            bpm_diff: row.get("bpm_diff")?,
        })
    })?;
    let similar_tracks = rows.collect::<Result<Vec<_>, _>>()?;

    Ok(Some(SimilarTracks {
        reference_track: reference,
        similar_tracks,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct TopRatedTrack {
    pub track_title: String,
    pub track_artist: Option<String>,
    pub context: Option<String>,
    pub audience: Option<String>,
    pub rating: String,
    pub rating_count: i64,
    pub bpm: Option<f64>,
    pub intensity: Option<String>,
    pub track_type: Option<String>,
    pub duration_minutes: Option<f64>,
    pub spotify_url: Option<String>,
}

pub fn top_rated_tracks(
    conn: &Connection,
    rating: &str,
    context: Option<&str>,
    audience: Option<&str>,
    limit: Option<u32>,
) -> Result<Vec<TopRatedTrack>, rusqlite::Error> {
    let mut q = QueryBuilder::new();
    q.eq("f.rating", rating.to_string());
    if let Some(context) = context.map(str::trim).filter(|s| !s.is_empty()) {
        q.contains("f.context", context);
    }
    if let Some(audience) = audience.map(str::trim).filter(|s| !s.is_empty()) {
        q.eq("f.audience", audience.to_string());
    }

    let limit = capped(limit, 15);
    // One catalog row per title keeps the join from multiplying counts.
    let sql = format!(
        "SELECT f.track_title, f.track_artist, f.context, f.audience, f.rating,
                COUNT(*) AS rating_count,
                t.bpm, t.intensity, t.track_type, t.duration_minutes, t.spotify_url
         FROM track_feedback f
         LEFT JOIN tracks t ON t.id = (
             SELECT MIN(t2.id) FROM tracks t2 WHERE t2.title = f.track_title
         ){}
         GROUP BY f.track_title, f.track_artist, f.context, f.audience, f.rating
         ORDER BY rating_count DESC, f.track_title
         LIMIT {limit}",
        q.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(q.params()), |row| {
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.is_empty());
        Ok(TopRatedTrack {
            track_title: row.get(0)?,
            track_artist: row.get(1)?,
            context: blank_to_none(row.get(2)?),
            audience: blank_to_none(row.get(3)?),
            rating: row.get(4)?,
            rating_count: row.get(5)?,
            bpm: row.get(6)?,
            intensity: row.get(7)?,
            track_type: row.get(8)?,
            duration_minutes: row.get(9)?,
            spotify_url: row.get(10)?,
        })
    })?;
    rows.collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackOverall {
    pub total_feedback: i64,
    pub total_up: i64,
    pub total_down: i64,
    pub unique_tracks: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextBreakdown {
    pub context: String,
    pub up_count: i64,
    pub down_count: i64,
    pub unique_tracks: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackSummary {
    pub overall: FeedbackOverall,
    pub by_context: Vec<ContextBreakdown>,
}

pub fn feedback_summary(conn: &Connection) -> Result<FeedbackSummary, rusqlite::Error> {
    let overall = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN rating = 'up' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN rating = 'down' THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT track_title)
         FROM track_feedback",
        [],
        |row| {
            Ok(FeedbackOverall {
                total_feedback: row.get(0)?,
                total_up: row.get(1)?,
                total_down: row.get(2)?,
                unique_tracks: row.get(3)?,
            })
        },
    )?;

    let mut stmt = conn.prepare(
        "SELECT CASE WHEN context = '' THEN 'unspecified' ELSE context END AS ctx,
                SUM(CASE WHEN rating = 'up' THEN 1 ELSE 0 END),
                SUM(CASE WHEN rating = 'down' THEN 1 ELSE 0 END),
                COUNT(DISTINCT track_title)
         FROM track_feedback
         GROUP BY ctx
         ORDER BY COUNT(*) DESC, ctx",
    )?;
    let by_context = stmt
        .query_map([], |row| {
            Ok(ContextBreakdown {
                context: row.get(0)?,
                up_count: row.get(1)?,
                down_count: row.get(2)?,
                unique_tracks: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeedbackSummary {
        overall,
        by_context,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    pub track_type: String,
    pub count: i64,
    pub avg_bpm: Option<f64>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntensityCount {
    pub intensity: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BpmRange {
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub avg_bpm: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackStats {
    pub total_tracks: i64,
    pub by_track_type: Vec<TypeStats>,
    pub by_intensity: Vec<IntensityCount>,
    pub bpm_range: BpmRange,
}

fn round1(v: Option<f64>) -> Option<f64> {
    v.map(|v| (v * 10.0).round() / 10.0)
}

pub fn track_stats(conn: &Connection) -> Result<TrackStats, rusqlite::Error> {
    let total_tracks: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT track_type, COUNT(*) AS n, AVG(bpm), MIN(bpm), MAX(bpm)
         FROM tracks WHERE track_type IS NOT NULL
         GROUP BY track_type ORDER BY n DESC, track_type",
    )?;
    let by_track_type = stmt
        .query_map([], |row| {
            Ok(TypeStats {
                track_type: row.get(0)?,
                count: row.get(1)?,
                avg_bpm: round1(row.get(2)?),
                min_bpm: round1(row.get(3)?),
                max_bpm: round1(row.get(4)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT intensity, COUNT(*) AS n
         FROM tracks WHERE intensity IS NOT NULL
         GROUP BY intensity ORDER BY n DESC, intensity",
    )?;
    let by_intensity = stmt
        .query_map([], |row| {
            Ok(IntensityCount {
                intensity: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let bpm_range = conn.query_row(
        "SELECT MIN(bpm), MAX(bpm), AVG(bpm) FROM tracks WHERE bpm IS NOT NULL",
        [],
        |row| {
            Ok(BpmRange {
                min_bpm: round1(row.get(0)?),
                max_bpm: round1(row.get(1)?),
                avg_bpm: round1(row.get(2)?),
            })
        },
    )?;

    Ok(TrackStats {
        total_tracks,
        by_track_type,
        by_intensity,
        bpm_range,
    })
}

pub fn list_routines(
    conn: &Connection,
    difficulty: Option<&str>,
    limit: Option<u32>,
) -> Result<Vec<RoutineSummary>, rusqlite::Error> {
    let mut q = QueryBuilder::new();
    if let Some(difficulty) = difficulty.map(str::trim).filter(|s| !s.is_empty()) {
        q.push("LOWER(r.difficulty) = ?", [Value::Text(difficulty.to_lowercase())]);
    }
    let limit = capped(limit, 20);
    let sql = format!(
        "SELECT r.name, r.description, r.theme, r.intensity_arc, r.difficulty,
                r.total_duration_minutes, r.class_summary, r.tags, r.spotify_playlist_id,
                COUNT(rt.id) AS track_count
         FROM routines r
         LEFT JOIN routine_tracks rt ON rt.routine_id = r.id{}
         GROUP BY r.id
         ORDER BY r.name, r.id
         LIMIT {limit}",
        q.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(q.params()), |row| {
        Ok(RoutineSummary {
            name: row.get(0)?,
            description: row.get(1)?,
            theme: row.get(2)?,
            intensity_arc: row.get(3)?,
            difficulty: row.get(4)?,
            total_duration_minutes: row.get(5)?,
            class_summary: row.get(6)?,
            tags: json_column(row.get(7)?),
            spotify_playlist_id: row.get(8)?,
            track_count: row.get(9)?,
        })
    })?;
    rows.collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::store::open_test;

    #[test]
    fn query_builder_keeps_params_in_clause_order() {
        let mut q = QueryBuilder::new();
        assert_eq!(q.where_clause(), "");
        q.at_least("bpm", 100.0);
        q.contains_any_column(&["title", "notes"], "50%");
        q.one_of("intensity", &["low".to_string(), "medium".to_string()]);
        q.one_of("ignored", &[]);
        assert_eq!(
            q.where_clause(),
            " WHERE bpm >= ? AND (title LIKE ? ESCAPE '\\' OR notes LIKE ? ESCAPE '\\') AND intensity IN (?, ?)"
        );
        assert_eq!(
            q.params(),
            &[
                Value::Real(100.0),
                Value::Text("%50\\%%".into()),
                Value::Text("%50\\%%".into()),
                Value::Text("low".into()),
                Value::Text("medium".into()),
            ]
        );
    }

    #[test]
    fn escape_like_handles_wildcards() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
    }

    #[test]
    fn search_filters_are_anded() {
        let conn = open_test();
        insert_track(&conn, "Titanium", "David Guetta", "climb", Some("high"), Some(126.0), Some(4.1));
        insert_track(&conn, "Levels", "Avicii", "sprint", Some("high"), Some(128.0), Some(3.3));
        insert_track(&conn, "Breathe", "Telepopmusik", "cooldown", Some("low"), Some(90.0), Some(4.6));

        let all = search_tracks(&conn, &SearchParams::default()).unwrap();
        assert_eq!(
            all.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["Breathe", "Levels", "Titanium"]
        );

        let fast_high = search_tracks(
            &conn,
            &SearchParams {
                bpm_min: Some(127.0),
                intensity: Some("HIGH".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fast_high.len(), 1);
        assert_eq!(fast_high[0].title, "Levels");

        let keyword = search_tracks(
            &conn,
            &SearchParams {
                keyword: Some("guetta".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].artist, "David Guetta");
    }

    #[test]
    fn search_treats_like_wildcards_literally() {
        let conn = open_test();
        insert_track(&conn, "100% Pure Love", "Crystal Waters", "sprint", None, None, None);
        insert_track(&conn, "100 Degrees", "Kylie", "sprint", None, None, None);
        let rows = search_tracks(
            &conn,
            &SearchParams {
                keyword: Some("100%".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "100% Pure Love");
    }

    #[test]
    fn candidate_filter_excludes_titles_case_insensitively() {
        let conn = open_test();
        insert_track(&conn, "Titanium", "David Guetta", "Climb", Some("high"), None, None);
        insert_track(&conn, "Hills", "Weeknd", "climb/endurance", Some("medium"), None, None);
        insert_track(&conn, "Levels", "Avicii", "sprint", Some("high"), None, None);

        let filter = CandidateFilter {
            types: vec!["climb".into(), "intervals".into()],
            exclude_titles: vec!["  titanium ".into()],
            ..Default::default()
        };
        let rows = candidate_tracks(&conn, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Hills");

        let filter = CandidateFilter {
            types: vec!["climb".into()],
            intensities: vec!["High".into(), "extreme".into()],
            ..Default::default()
        };
        let rows = candidate_tracks(&conn, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Titanium");
    }

    #[test]
    fn theme_is_a_hard_filter_over_notes_and_focus_area() {
        let conn = open_test();
        let id = insert_track(&conn, "Jump", "Van Halen", "sprint", None, None, None);
        conn.execute("UPDATE tracks SET notes = '80s anthem' WHERE id = ?1", [id])
            .unwrap();
        let id = insert_track(&conn, "Faith", "George Michael", "sprint", None, None, None);
        conn.execute("UPDATE tracks SET focus_area = 'legs, 80s' WHERE id = ?1", [id])
            .unwrap();
        insert_track(&conn, "Levels", "Avicii", "sprint", None, None, None);

        let rows = candidate_tracks(
            &conn,
            &CandidateFilter {
                types: vec!["sprint".into()],
                theme: Some("80S".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let titles: Vec<_> = rows.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Faith", "Jump"]);
    }

    #[test]
    fn tallies_count_audience_votes_separately() {
        let conn = open_test();
        insert_feedback(&conn, "Titanium", "David Guetta", "up", "climb", "");
        insert_feedback(&conn, "Titanium", "David Guetta", "up", "sprint", "");
        insert_feedback(&conn, " titanium", "David Guetta", "down", "", "50+");
        insert_feedback(&conn, "Levels", "Avicii", "up", "", "50+");

        let tallies = feedback_tallies(&conn, Some("50+")).unwrap();
        assert_eq!(
            tallies["titanium"],
            FeedbackTally {
                up: 2,
                down: 1,
                up_audience: 0,
                down_audience: 1
            }
        );
        assert_eq!(tallies["levels"].up_audience, 1);

        let global = feedback_tallies(&conn, None).unwrap();
        assert_eq!(global["titanium"].down_audience, 0);
        assert_eq!(global["levels"].up_audience, 0);
    }

    #[test]
    fn similar_tracks_stay_in_bpm_window() {
        let conn = open_test();
        insert_track(&conn, "Titanium", "David Guetta", "climb", Some("high"), Some(126.0), None);
        insert_track(&conn, "Levels", "Avicii", "sprint", Some("high"), Some(128.0), None);
        insert_track(&conn, "Wake Me Up", "Avicii", "sprint", Some("high"), Some(124.0), None);
        insert_track(&conn, "Animals", "Martin Garrix", "sprint", Some("high"), Some(150.0), None);
        insert_track(&conn, "Breathe", "Telepopmusik", "cooldown", Some("low"), Some(125.0), None);

        let result = find_similar_tracks(&conn, "titan", 5.0, None)
            .unwrap()
            .expect("reference should resolve");
        assert_eq!(result.reference_track.title, "Titanium");
        let titles: Vec<_> = result
            .similar_tracks
            .iter()
            .map(|s| s.track.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Levels", "Wake Me Up"]);
        assert_eq!(result.similar_tracks[0].bpm_diff, Some(2.0));

        assert!(find_similar_tracks(&conn, "nope", 5.0, None).unwrap().is_none());
    }

    #[test]
    fn title_lookup_prefers_exact_match() {
        let conn = open_test();
        insert_track(&conn, "Run Boy Run", "Woodkid", "sprint", None, None, None);
        insert_track(&conn, "Run", "Foo Fighters", "sprint", None, None, None);
        let found = find_track_by_title(&conn, "run").unwrap().unwrap();
        assert_eq!(found.track.artist, "Foo Fighters");

        let exact = find_track_exact(&conn, " RUN BOY RUN ", "woodkid").unwrap();
        assert!(exact.is_some());
        assert!(find_track_exact(&conn, "Run Boy Run", "Other").unwrap().is_none());
    }

    #[test]
    fn details_parse_stored_json() {
        let conn = open_test();
        let id = insert_track(&conn, "Titanium", "David Guetta", "climb", None, None, None);
        conn.execute(
            "UPDATE tracks SET choreography = ?1, cues = 'stand up' WHERE id = ?2",
            params![r#"[{"time":"0:00","move":"seated climb"}]"#, id],
        )
        .unwrap();
        let details = find_track_by_title(&conn, "Titanium").unwrap().unwrap();
        assert_eq!(details.choreography.unwrap()[0]["move"], "seated climb");
        assert_eq!(details.cues, Some(serde_json::Value::String("stand up".into())));
    }

    #[test]
    fn top_rated_groups_and_orders_by_count() {
        let conn = open_test();
        insert_track(&conn, "Titanium", "David Guetta", "climb", None, Some(126.0), None);
        insert_feedback(&conn, "Titanium", "David Guetta", "up", "climb", "");
        insert_feedback(&conn, "Titanium", "David Guetta", "up", "climb", "50+");
        insert_feedback(&conn, "Levels", "Avicii", "up", "sprint", "");
        insert_feedback(&conn, "Levels", "Avicii", "up", "sprint", "young");
        insert_feedback(&conn, "Levels", "Avicii", "down", "sprint", "");

        let rows = top_rated_tracks(&conn, "up", None, None, None).unwrap();
        assert_eq!(rows.len(), 4);

        let rows = top_rated_tracks(&conn, "up", Some("clim"), None, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bpm, Some(126.0));

        let rows = top_rated_tracks(&conn, "up", None, Some("50+"), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].audience.as_deref(), Some("50+"));
        assert_eq!(rows[0].rating_count, 1);
    }

    #[test]
    fn feedback_summary_labels_missing_context() {
        let conn = open_test();
        insert_feedback(&conn, "Titanium", "David Guetta", "up", "", "");
        insert_feedback(&conn, "Titanium", "David Guetta", "down", "", "50+");
        insert_feedback(&conn, "Levels", "Avicii", "up", "sprint", "");

        let summary = feedback_summary(&conn).unwrap();
        assert_eq!(
            summary.overall,
            FeedbackOverall {
                total_feedback: 3,
                total_up: 2,
                total_down: 1,
                unique_tracks: 2
            }
        );
        assert_eq!(summary.by_context[0].context, "unspecified");
        assert_eq!(summary.by_context[0].up_count, 1);
        assert_eq!(summary.by_context[1].context, "sprint");
    }

    #[test]
    fn empty_feedback_summary_is_zeroed() {
        let conn = open_test();
        let summary = feedback_summary(&conn).unwrap();
        assert_eq!(summary.overall.total_feedback, 0);
        assert_eq!(summary.overall.total_up, 0);
        assert!(summary.by_context.is_empty());
    }

    #[test]
    fn stats_group_by_type_and_intensity() {
        let conn = open_test();
        insert_track(&conn, "A", "x", "climb", Some("high"), Some(120.0), None);
        insert_track(&conn, "B", "x", "climb", Some("high"), Some(131.0), None);
        insert_track(&conn, "C", "x", "sprint", Some("extreme"), None, None);

        let stats = track_stats(&conn).unwrap();
        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.by_track_type[0].track_type, "climb");
        assert_eq!(stats.by_track_type[0].count, 2);
        assert_eq!(stats.by_track_type[0].avg_bpm, Some(125.5));
        assert_eq!(stats.by_intensity[0].intensity, "high");
        assert_eq!(stats.bpm_range.min_bpm, Some(120.0));
        assert_eq!(stats.bpm_range.max_bpm, Some(131.0));
    }

    #[test]
    fn routines_carry_track_counts() {
        let conn = open_test();
        conn.execute(
            "INSERT INTO routines (base44_id, name, difficulty, tags) VALUES ('r1', 'Hill Day', 'Advanced', '[\"hills\"]')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO routines (base44_id, name, difficulty) VALUES ('r2', 'Easy Spin', 'beginner')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO routine_tracks (routine_id, track_base44_id, track_order)
             SELECT id, 'x', 0 FROM routines WHERE base44_id = 'r1'",
            [],
        )
        .unwrap();

        let all = list_routines(&conn, None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Easy Spin");
        assert_eq!(all[0].track_count, 0);
        assert_eq!(all[1].track_count, 1);
        assert_eq!(all[1].tags, Some(serde_json::json!(["hills"])));

        let advanced = list_routines(&conn, Some("advanced"), None).unwrap();
        assert_eq!(advanced.len(), 1);
        assert_eq!(advanced[0].name, "Hill Day");
    }
}
