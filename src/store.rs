use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use rusqlite::{Connection, OpenFlags, OptionalExtension, ffi, params};
use tracing::info;

use crate::error::{Error, Result};
use crate::types::Rating;

/// Lazily opened catalog connection, shared by every request in the process.
/// Callers hold the guard only for the duration of their queries.
pub struct Catalog {
    path: PathBuf,
    conn: OnceLock<Result<Mutex<Connection>, String>>,
}

impl Catalog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: OnceLock::new(),
        }
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(Mutex::new(conn)));
        Self {
            path: PathBuf::from(":memory:"),
            conn: cell,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        let result = self.conn.get_or_init(|| match open(&self.path) {
            Ok(conn) => {
                info!(path = %self.path.display(), "Opened catalog store");
                Ok(Mutex::new(conn))
            }
            Err(e) => Err(format!(
                "failed to open catalog at {}: {e}",
                self.path.display()
            )),
        });
        match result {
            Ok(mutex) => mutex
                .lock()
                .map_err(|_| Error::Unavailable("catalog lock poisoned".to_string())),
            Err(msg) => Err(Error::Unavailable(msg.clone())),
        }
    }
}

pub fn open(path: &Path) -> Result<Connection, rusqlite::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| {
            rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_CANTOPEN),
                Some(format!(
                    "failed to create parent directory {} for {}: {}",
                    parent.display(),
                    path.display(),
                    err
                )),
            )
        })?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrate(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_test() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory DB should open");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("pragma should apply");
    migrate(&conn).expect("schema should migrate");
    conn
}

pub(crate) fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracks (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            base44_id         TEXT UNIQUE,
            title             TEXT NOT NULL,
            artist            TEXT,
            album             TEXT,
            duration_minutes  REAL,
            spotify_id        TEXT,
            spotify_album_art TEXT,
            spotify_url       TEXT,
            bpm               REAL,
            intensity         TEXT,
            track_type        TEXT,
            focus_area        TEXT,
            position          TEXT,
            base_rpm          REAL,
            base_effortlevel  REAL,
            resistance_min    REAL,
            resistance_max    REAL,
            cadence_min       REAL,
            cadence_max       REAL,
            choreography      TEXT,
            cues              TEXT,
            notes             TEXT,
            created_at        TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_tracks_title ON tracks(title);
        CREATE INDEX IF NOT EXISTS idx_tracks_track_type ON tracks(track_type);
        CREATE TABLE IF NOT EXISTS track_feedback (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            base44_id    TEXT UNIQUE,
            track_title  TEXT NOT NULL,
            track_artist TEXT,
            spotify_id   TEXT,
            rating       TEXT NOT NULL,
            context      TEXT NOT NULL DEFAULT '',
            audience     TEXT NOT NULL DEFAULT '',
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(track_title, rating, context, audience)
        );
        CREATE INDEX IF NOT EXISTS idx_track_feedback_title ON track_feedback(track_title);
        CREATE TABLE IF NOT EXISTS routines (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            base44_id              TEXT UNIQUE,
            name                   TEXT NOT NULL,
            description            TEXT,
            theme                  TEXT,
            intensity_arc          TEXT,
            resistance_scale_notes TEXT,
            class_summary          TEXT,
            total_duration_minutes REAL,
            difficulty             TEXT,
            spotify_playlist_id    TEXT,
            tags                   TEXT,
            created_at             TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at             TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS routine_tracks (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            routine_id      INTEGER NOT NULL REFERENCES routines(id) ON DELETE CASCADE,
            track_base44_id TEXT NOT NULL,
            track_id        INTEGER REFERENCES tracks(id) ON DELETE SET NULL,
            track_order     INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_routine_tracks_routine ON routine_tracks(routine_id);
        CREATE TABLE IF NOT EXISTS sync_log (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            entity            TEXT NOT NULL,
            sync_started_at   TEXT NOT NULL,
            sync_completed_at TEXT,
            records_added     INTEGER NOT NULL DEFAULT 0,
            records_updated   INTEGER NOT NULL DEFAULT 0,
            records_failed    INTEGER NOT NULL DEFAULT 0,
            records_total     INTEGER NOT NULL DEFAULT 0,
            status            TEXT NOT NULL,
            error_message     TEXT
        );
        PRAGMA user_version = 1;",
    )?;
    Ok(())
}

/// Stored form of an optional context/audience: absent is the empty string.
pub(crate) fn blank_if_none(value: Option<&str>) -> &str {
    value.map(str::trim).unwrap_or("")
}

/// Upsert a rating on its natural key. Re-rating the same (title, rating,
/// context, audience) only refreshes `updated_at`. Returns the feedback id.
pub fn record_rating(
    conn: &Connection,
    track_title: &str,
    track_artist: Option<&str>,
    spotify_id: Option<&str>,
    rating: Rating,
    context: Option<&str>,
    audience: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "INSERT INTO track_feedback (
            track_title, track_artist, spotify_id, rating, context, audience, updated_at
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(track_title, rating, context, audience)
         DO UPDATE SET updated_at = datetime('now')
         RETURNING id",
        params![
            track_title,
            track_artist,
            spotify_id,
            rating.as_ref(),
            blank_if_none(context),
            blank_if_none(audience),
        ],
        |row| row.get(0),
    )
}

pub fn begin_sync_log(conn: &Connection, entity: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "INSERT INTO sync_log (entity, sync_started_at, status)
         VALUES (?1, datetime('now'), 'running')
         RETURNING id",
        params![entity],
        |row| row.get(0),
    )
}

pub fn complete_sync_log(
    conn: &Connection,
    log_id: i64,
    added: u32,
    updated: u32,
    failed: u32,
    total: u32,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_log
         SET sync_completed_at = datetime('now'),
             records_added = ?2,
             records_updated = ?3,
             records_failed = ?4,
             records_total = ?5,
             status = 'completed'
         WHERE id = ?1",
        params![log_id, added, updated, failed, total],
    )?;
    Ok(())
}

pub fn fail_sync_log(conn: &Connection, log_id: i64, message: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_log
         SET sync_completed_at = datetime('now'), status = 'failed', error_message = ?2
         WHERE id = ?1",
        params![log_id, message],
    )?;
    Ok(())
}

/// (status, records_total, error_message) of a sync run.
pub fn get_sync_log(
    conn: &Connection,
    log_id: i64,
) -> Result<Option<(String, i64, Option<String>)>, rusqlite::Error> {
    conn.query_row(
        "SELECT status, records_total, error_message FROM sync_log WHERE id = ?1",
        params![log_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = open_test();
        migrate(&conn).expect("second migration should be a no-op");
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.sqlite3");
        let conn = open(&path).expect("store should open in a fresh directory");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(path.exists());
    }

    #[test]
    fn catalog_opens_lazily_and_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(dir.path().join("catalog.sqlite3"));
        assert!(!catalog.path().exists());
        catalog.conn().expect("catalog should open on first use");
        assert!(catalog.path().exists());

        // A directory cannot be opened as a database file.
        let broken = Catalog::new(dir.path().to_path_buf());
        let err = broken.conn().unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        // The failure is remembered rather than retried.
        assert!(matches!(broken.conn().unwrap_err(), Error::Unavailable(_)));
    }

    #[test]
    fn re_rating_refreshes_instead_of_duplicating() {
        let conn = open_test();
        let first = record_rating(
            &conn,
            "Titanium",
            Some("David Guetta"),
            None,
            Rating::Up,
            Some("climb"),
            None,
        )
        .unwrap();
        let second = record_rating(
            &conn,
            "Titanium",
            Some("David Guetta"),
            None,
            Rating::Up,
            Some("climb"),
            Some(""),
        )
        .unwrap();
        assert_eq!(first, second);

        let other_audience = record_rating(
            &conn,
            "Titanium",
            Some("David Guetta"),
            None,
            Rating::Up,
            Some("climb"),
            Some("50+"),
        )
        .unwrap();
        assert_ne!(first, other_audience);

        let down = record_rating(
            &conn,
            "Titanium",
            Some("David Guetta"),
            None,
            Rating::Down,
            Some("climb"),
            None,
        )
        .unwrap();
        assert_ne!(first, down);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM track_feedback", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[test]
    fn sync_log_lifecycle() {
        let conn = open_test();
        let ok = begin_sync_log(&conn, "tracks").unwrap();
        complete_sync_log(&conn, ok, 2, 1, 0, 3).unwrap();
        assert_eq!(
            get_sync_log(&conn, ok).unwrap(),
            Some(("completed".to_string(), 3, None))
        );

        let bad = begin_sync_log(&conn, "tracks").unwrap();
        fail_sync_log(&conn, bad, "fetch failed").unwrap();
        assert_eq!(
            get_sync_log(&conn, bad).unwrap(),
            Some(("failed".to_string(), 0, Some("fetch failed".to_string())))
        );
        assert_eq!(get_sync_log(&conn, 999).unwrap(), None);
    }

    #[test]
    fn sync_log_timestamps_come_from_sqlite() {
        let conn = open_test();
        let id = begin_sync_log(&conn, "routines").unwrap();
        let (started, completed): (String, Option<String>) = conn
            .query_row(
                "SELECT sync_started_at, sync_completed_at FROM sync_log WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(started.len(), "2024-01-01 00:00:00".len());
        assert_eq!(completed, None);

        complete_sync_log(&conn, id, 0, 0, 0, 0).unwrap();
        let completed: Option<String> = conn
            .query_row(
                "SELECT sync_completed_at FROM sync_log WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert!(completed.is_some_and(|ts| ts >= started));
    }
}
