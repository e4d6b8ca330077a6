//! Copy platform records into the local catalog.
//!
//! Each entity batch runs in one transaction with a savepoint per record, so a
//! bad record is rolled back and counted without disturbing the rest.

use std::time::Instant;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::platform::{Entity, PlatformClient, PlatformError};
use crate::store::{self, Catalog, blank_if_none};
use crate::types::Rating;

const PROGRESS_EVERY: usize = 10;

/// Where sync batches come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, entity: Entity) -> Result<Vec<Value>, PlatformError>;
}

#[async_trait]
impl RecordSource for PlatformClient {
    async fn fetch(&self, entity: Entity) -> Result<Vec<Value>, PlatformError> {
        PlatformClient::fetch(self, entity).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub added: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
    pub total: u32,
    pub elapsed_secs: f64,
}

enum Outcome {
    Added,
    Updated,
    Skipped(String),
}

type Record = Map<String, Value>;

/// A string field; numbers are accepted and rendered. Blank counts as absent.
fn text(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A numeric field; numeric strings are accepted.
fn number(record: &Record, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A structured field stored as JSON text. Empty arrays and objects are absent.
fn json_text(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::Null => None,
        Value::Array(a) if a.is_empty() => None,
        Value::Object(o) if o.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn exists(conn: &Connection, table: &str, base44_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT 1 FROM {table} WHERE base44_id = ?1"),
        params![base44_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn upsert_track(conn: &Connection, record: &Record) -> Result<Outcome, rusqlite::Error> {
    let (Some(base44_id), Some(title)) = (text(record, "id"), text(record, "title")) else {
        return Ok(Outcome::Skipped("track is missing id or title".to_string()));
    };
    let existed = exists(conn, "tracks", &base44_id)?;
    conn.execute(
        "INSERT INTO tracks (
            base44_id, title, artist, album, duration_minutes,
            spotify_id, spotify_album_art, spotify_url,
            bpm, intensity, track_type, focus_area, position,
            base_rpm, base_effortlevel,
            resistance_min, resistance_max, cadence_min, cadence_max,
            choreography, cues, notes, updated_at
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?18, ?19, ?20, ?21, ?22, datetime('now'))
         ON CONFLICT(base44_id) DO UPDATE SET
            title = excluded.title,
            artist = excluded.artist,
            album = excluded.album,
            duration_minutes = excluded.duration_minutes,
            spotify_id = excluded.spotify_id,
            spotify_album_art = excluded.spotify_album_art,
            spotify_url = excluded.spotify_url,
            bpm = excluded.bpm,
            intensity = excluded.intensity,
            track_type = excluded.track_type,
            focus_area = excluded.focus_area,
            position = excluded.position,
            base_rpm = excluded.base_rpm,
            base_effortlevel = excluded.base_effortlevel,
            resistance_min = excluded.resistance_min,
            resistance_max = excluded.resistance_max,
            cadence_min = excluded.cadence_min,
            cadence_max = excluded.cadence_max,
            choreography = excluded.choreography,
            cues = excluded.cues,
            notes = excluded.notes,
            updated_at = datetime('now')",
        params![
            base44_id,
            title,
            text(record, "artist"),
            text(record, "album"),
            number(record, "duration_minutes"),
            text(record, "spotify_id"),
            text(record, "spotify_album_art"),
            text(record, "spotify_url"),
            number(record, "bpm"),
            text(record, "intensity").map(|i| i.to_lowercase()),
            text(record, "track_type"),
            text(record, "focus_area"),
            text(record, "position"),
            number(record, "base_rpm"),
            number(record, "base_effortlevel"),
            number(record, "resistance_min"),
            number(record, "resistance_max"),
            number(record, "cadence_min"),
            number(record, "cadence_max"),
            json_text(record, "choreography"),
            json_text(record, "cues"),
            text(record, "notes"),
        ],
    )?;
    Ok(if existed { Outcome::Updated } else { Outcome::Added })
}

fn upsert_routine(conn: &Connection, record: &Record) -> Result<Outcome, rusqlite::Error> {
    let (Some(base44_id), Some(name)) = (text(record, "id"), text(record, "name")) else {
        return Ok(Outcome::Skipped("routine is missing id or name".to_string()));
    };
    let existed = exists(conn, "routines", &base44_id)?;
    let routine_id: i64 = conn.query_row(
        "INSERT INTO routines (
            base44_id, name, description, theme, intensity_arc,
            resistance_scale_notes, class_summary, total_duration_minutes,
            difficulty, spotify_playlist_id, tags, updated_at
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))
         ON CONFLICT(base44_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            theme = excluded.theme,
            intensity_arc = excluded.intensity_arc,
            resistance_scale_notes = excluded.resistance_scale_notes,
            class_summary = excluded.class_summary,
            total_duration_minutes = excluded.total_duration_minutes,
            difficulty = excluded.difficulty,
            spotify_playlist_id = excluded.spotify_playlist_id,
            tags = excluded.tags,
            updated_at = datetime('now')
         RETURNING id",
        params![
            base44_id,
            name,
            text(record, "description"),
            text(record, "theme"),
            text(record, "intensity_arc"),
            text(record, "resistance_scale_notes"),
            text(record, "class_summary"),
            number(record, "total_duration_minutes"),
            text(record, "difficulty"),
            text(record, "spotify_playlist_id"),
            json_text(record, "tags"),
        ],
        |row| row.get(0),
    )?;

    conn.execute("DELETE FROM routine_tracks WHERE routine_id = ?1", params![routine_id])?;
    let track_ids = record
        .get("track_ids")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut order = 0;
    for track_ref in track_ids.iter().filter_map(Value::as_str) {
        order += 1;
        let local: Option<i64> = conn
            .query_row(
                "SELECT id FROM tracks WHERE base44_id = ?1",
                params![track_ref],
                |row| row.get(0),
            )
            .optional()?;
        conn.execute(
            "INSERT INTO routine_tracks (routine_id, track_base44_id, track_id, track_order)
             VALUES (?1, ?2, ?3, ?4)",
            params![routine_id, track_ref, local, order],
        )?;
    }
    Ok(if existed { Outcome::Updated } else { Outcome::Added })
}

fn upsert_feedback(conn: &Connection, record: &Record) -> Result<Outcome, rusqlite::Error> {
    let (Some(base44_id), Some(title), Some(raw_rating)) = (
        text(record, "id"),
        text(record, "track_title"),
        text(record, "rating"),
    ) else {
        return Ok(Outcome::Skipped(
            "feedback is missing id, track_title or rating".to_string(),
        ));
    };
    let Ok(rating) = raw_rating.to_lowercase().parse::<Rating>() else {
        return Ok(Outcome::Skipped(format!("unknown rating {raw_rating:?}")));
    };
    let artist = text(record, "track_artist");
    let spotify_id = text(record, "spotify_id");
    let context = text(record, "context");
    let audience = text(record, "audience");

    let changed = conn.execute(
        "UPDATE track_feedback
         SET track_title = ?2, track_artist = ?3, spotify_id = ?4, rating = ?5,
             context = ?6, audience = ?7, updated_at = datetime('now')
         WHERE base44_id = ?1",
        params![
            base44_id,
            title,
            artist,
            spotify_id,
            rating.as_ref(),
            blank_if_none(context.as_deref()),
            blank_if_none(audience.as_deref()),
        ],
    )?;
    if changed > 0 {
        return Ok(Outcome::Updated);
    }

    // A local rating on the same natural key is adopted by the platform record.
    conn.execute(
        "INSERT INTO track_feedback (
            base44_id, track_title, track_artist, spotify_id, rating, context, audience
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(track_title, rating, context, audience) DO UPDATE SET
            base44_id = excluded.base44_id,
            track_artist = excluded.track_artist,
            spotify_id = excluded.spotify_id,
            updated_at = datetime('now')",
        params![
            base44_id,
            title,
            artist,
            spotify_id,
            rating.as_ref(),
            blank_if_none(context.as_deref()),
            blank_if_none(audience.as_deref()),
        ],
    )?;
    Ok(Outcome::Added)
}

fn apply_batch(
    conn: &mut Connection,
    entity: Entity,
    records: &[Value],
    upsert: fn(&Connection, &Record) -> Result<Outcome, rusqlite::Error>,
) -> Result<SyncReport, rusqlite::Error> {
    let started = Instant::now();
    let mut report = SyncReport {
        total: records.len() as u32,
        ..Default::default()
    };

    let mut tx = conn.transaction()?;
    for (index, record) in records.iter().enumerate() {
        let Some(fields) = record.as_object() else {
            warn!(%entity, index, "Skipping non-object record");
            report.skipped += 1;
            continue;
        };
        let savepoint = tx.savepoint()?;
        match upsert(&savepoint, fields) {
            Ok(Outcome::Added) => {
                savepoint.commit()?;
                report.added += 1;
            }
            Ok(Outcome::Updated) => {
                savepoint.commit()?;
                report.updated += 1;
            }
            Ok(Outcome::Skipped(reason)) => {
                warn!(%entity, index, id = ?fields.get("id"), "Skipping record: {reason}");
                report.skipped += 1;
            }
            Err(e) => {
                // Dropping the savepoint rolls this record back.
                warn!(%entity, index, id = ?fields.get("id"), error = %e, "Failed to sync record");
                report.failed += 1;
            }
        }
        if (index + 1) % PROGRESS_EVERY == 0 {
            debug!(%entity, processed = index + 1, total = records.len(), "Sync progress");
        }
    }
    tx.commit()?;

    report.elapsed_secs = started.elapsed().as_secs_f64();
    Ok(report)
}

pub fn sync_tracks(conn: &mut Connection, records: &[Value]) -> Result<SyncReport, rusqlite::Error> {
    apply_batch(conn, Entity::Track, records, upsert_track)
}

pub fn sync_routines(conn: &mut Connection, records: &[Value]) -> Result<SyncReport, rusqlite::Error> {
    apply_batch(conn, Entity::Routine, records, upsert_routine)
}

pub fn sync_feedback(conn: &mut Connection, records: &[Value]) -> Result<SyncReport, rusqlite::Error> {
    apply_batch(conn, Entity::TrackFeedback, records, upsert_feedback)
}

fn log_name(entity: Entity) -> Option<&'static str> {
    (entity == Entity::Track).then_some("tracks")
}

/// Apply a fetched batch, recording track runs in the sync log.
pub fn apply_fetched(
    conn: &mut Connection,
    entity: Entity,
    log_id: Option<i64>,
    fetched: Result<Vec<Value>, PlatformError>,
) -> Result<SyncReport> {
    let outcome = fetched.map_err(crate::error::Error::from).and_then(|records| {
        let report = match entity {
            Entity::Track => sync_tracks(conn, &records),
            Entity::Routine => sync_routines(conn, &records),
            Entity::TrackFeedback => sync_feedback(conn, &records),
        }?;
        Ok(report)
    });

    if let Some(log_id) = log_id {
        match &outcome {
            Ok(r) => store::complete_sync_log(conn, log_id, r.added, r.updated, r.failed, r.total)?,
            Err(e) => store::fail_sync_log(conn, log_id, &e.to_string())?,
        }
    }
    match &outcome {
        Ok(r) => info!(
            %entity,
            added = r.added,
            updated = r.updated,
            skipped = r.skipped,
            failed = r.failed,
            total = r.total,
            elapsed_secs = r.elapsed_secs,
            "Sync completed"
        ),
        Err(e) => warn!(%entity, error = %e, "Sync failed"),
    }
    outcome
}

pub async fn sync_entity(
    catalog: &Catalog,
    source: &dyn RecordSource,
    entity: Entity,
) -> Result<SyncReport> {
    let log_id = match log_name(entity) {
        Some(name) => {
            let conn = catalog.conn()?;
            Some(store::begin_sync_log(&conn, name)?)
        }
        None => None,
    };
    info!(%entity, "Fetching platform records");
    let fetched = source.fetch(entity).await;
    let mut conn = catalog.conn()?;
    apply_fetched(&mut conn, entity, log_id, fetched)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    Completed(SyncReport),
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRun {
    pub entity: String,
    #[serde(flatten)]
    pub status: RunStatus,
}

impl EntityRun {
    fn new(entity: Entity, result: Result<SyncReport>) -> Self {
        Self {
            entity: entity.to_string(),
            status: match result {
                Ok(report) => RunStatus::Completed(report),
                Err(e) => RunStatus::Failed { error: e.to_string() },
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, RunStatus::Completed(_))
    }
}

/// Tracks, then routines (which reference tracks), then feedback. Routines
/// are skipped when the track sync failed.
pub async fn sync_all(catalog: &Catalog, source: &dyn RecordSource) -> Vec<EntityRun> {
    let tracks = EntityRun::new(Entity::Track, sync_entity(catalog, source, Entity::Track).await);
    let routines = if tracks.succeeded() {
        EntityRun::new(Entity::Routine, sync_entity(catalog, source, Entity::Routine).await)
    } else {
        EntityRun {
            entity: Entity::Routine.to_string(),
            status: RunStatus::Skipped {
                reason: "track sync failed".to_string(),
            },
        }
    };
    let feedback = EntityRun::new(
        Entity::TrackFeedback,
        sync_entity(catalog, source, Entity::TrackFeedback).await,
    );
    vec![tracks, routines, feedback]
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::store::{get_sync_log, open_test, record_rating};

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    struct FixtureSource(HashMap<&'static str, Vec<Value>>);

    #[async_trait]
    impl RecordSource for FixtureSource {
        async fn fetch(&self, entity: Entity) -> Result<Vec<Value>, PlatformError> {
            self.0
                .get(entity.as_ref())
                .cloned()
                .ok_or(PlatformError::Api {
                    status: 500,
                    message: "boom".into(),
                })
        }
    }

    #[test]
    fn track_batch_counts_adds_updates_and_skips() {
        let mut conn = open_test();
        let first = vec![
            json!({"id": "t1", "title": "Levels", "artist": "Avicii", "bpm": 126, "intensity": "High",
                   "choreography": [{"cue": "stand"}], "cues": []}),
            json!({"id": "t2", "title": "Roads", "bpm": "72.5"}),
            json!({"id": "t3"}),
            json!("garbage"),
        ];
        let report = sync_tracks(&mut conn, &first).unwrap();
        assert_eq!((report.added, report.updated, report.skipped, report.failed, report.total), (2, 0, 2, 0, 4));

        let (bpm, intensity, choreo, cues): (f64, String, String, Option<String>) = conn
            .query_row(
                "SELECT bpm, intensity, choreography, cues FROM tracks WHERE base44_id = 't1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(bpm, 126.0);
        assert_eq!(intensity, "high");
        assert!(choreo.contains("stand"));
        assert_eq!(cues, None);

        let second = vec![json!({"id": "t1", "title": "Levels (Radio Edit)", "artist": "Avicii"})];
        let report = sync_tracks(&mut conn, &second).unwrap();
        assert_eq!((report.added, report.updated), (0, 1));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM tracks"), 2);
    }

    #[test]
    fn failing_record_rolls_back_alone() {
        let mut conn = open_test();
        record_rating(&conn, "Levels", None, None, Rating::Up, None, None).unwrap();
        record_rating(&conn, "Roar", None, None, Rating::Down, None, None).unwrap();
        let records = vec![
            json!({"id": "f1", "track_title": "Levels", "rating": "up"}),
            json!({"id": "f2", "track_title": "Titanium", "rating": "UP", "audience": "50+"}),
            // Renaming f1 onto Roar's natural key violates the unique constraint.
            json!({"id": "f1", "track_title": "Roar", "rating": "down"}),
            json!({"id": "f3", "track_title": "Meh", "rating": "sideways"}),
            json!({"id": "f4", "rating": "up"}),
        ];
        let report = sync_feedback(&mut conn, &records).unwrap();
        assert_eq!((report.added, report.updated, report.skipped, report.failed), (2, 0, 2, 1));

        // The local Levels rating was adopted, not duplicated.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM track_feedback"), 3);
        let adopted: String = conn
            .query_row("SELECT track_title FROM track_feedback WHERE base44_id = 'f1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(adopted, "Levels");
        let audience: String = conn
            .query_row("SELECT audience FROM track_feedback WHERE base44_id = 'f2'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(audience, "50+");
    }

    #[test]
    fn routine_tracks_resolve_local_ids_and_are_replaced() {
        let mut conn = open_test();
        sync_tracks(&mut conn, &[json!({"id": "t1", "title": "Levels"})]).unwrap();
        let routine = json!({"id": "r1", "name": "Hill Day", "tags": ["climb"], "track_ids": ["t1", "ext9"]});
        let report = sync_routines(&mut conn, &[routine]).unwrap();
        assert_eq!(report.added, 1);

        let rows: Vec<(String, Option<i64>, i64)> = conn
            .prepare("SELECT track_base44_id, track_id, track_order FROM routine_tracks ORDER BY track_order")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "t1");
        assert!(rows[0].1.is_some());
        assert_eq!(rows[1], ("ext9".to_string(), None, 2));

        let replaced = json!({"id": "r1", "name": "Hill Day", "track_ids": ["ext9"]});
        let report = sync_routines(&mut conn, &[replaced, json!({"name": "No id"})]).unwrap();
        assert_eq!((report.updated, report.skipped), (1, 1));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM routine_tracks"), 1);
        let tags: Option<String> = conn
            .query_row("SELECT tags FROM routines WHERE base44_id = 'r1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tags, None);
    }

    #[test]
    fn fetch_failure_marks_track_log_failed() {
        let mut conn = open_test();
        let log_id = store::begin_sync_log(&conn, "tracks").unwrap();
        let err = apply_fetched(
            &mut conn,
            Entity::Track,
            Some(log_id),
            Err(PlatformError::Timeout),
        )
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        let (status, _, message) = get_sync_log(&conn, log_id).unwrap().unwrap();
        assert_eq!(status, "failed");
        assert!(message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn sync_all_skips_routines_after_track_failure() {
        let catalog = Catalog::from_connection(open_test());
        let mut batches = HashMap::new();
        batches.insert("Routine", vec![json!({"id": "r1", "name": "Hill Day"})]);
        batches.insert("TrackFeedback", vec![json!({"id": "f1", "track_title": "Levels", "rating": "up"})]);
        let runs = sync_all(&catalog, &FixtureSource(batches)).await;

        assert_eq!(runs.len(), 3);
        assert!(matches!(runs[0].status, RunStatus::Failed { .. }));
        assert!(matches!(runs[1].status, RunStatus::Skipped { .. }));
        assert!(runs[2].succeeded());

        let conn = catalog.conn().unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM routines"), 0);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sync_log WHERE entity = 'tracks' AND status = 'failed'"),
            1
        );
    }

    #[tokio::test]
    async fn sync_all_runs_every_entity_in_order() {
        let catalog = Catalog::from_connection(open_test());
        let mut batches = HashMap::new();
        batches.insert("Track", vec![json!({"id": "t1", "title": "Levels"})]);
        batches.insert("Routine", vec![json!({"id": "r1", "name": "Hill Day", "track_ids": ["t1"]})]);
        batches.insert("TrackFeedback", Vec::new());
        let runs = sync_all(&catalog, &FixtureSource(batches)).await;
        assert!(runs.iter().all(EntityRun::succeeded));

        let json = serde_json::to_value(&runs[0]).unwrap();
        assert_eq!(json["entity"], "Track");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["added"], 1);
    }
}
