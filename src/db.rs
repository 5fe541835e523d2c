use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags, params, params_from_iter};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Track, TrackFilter};

/// Tables a Mixxx library must have before anything else is queried.
pub const REQUIRED_TABLES: [&str; 3] = ["library", "crates", "crate_tracks"];

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Mixxx database not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("Mixxx database at {} is locked. Close Mixxx and try again.", .0.display())]
    Locked(PathBuf),
    #[error(
        "{} is not a valid Mixxx database (missing tables: {})",
        .path.display(),
        .missing.join(", ")
    )]
    Schema { path: PathBuf, missing: Vec<String> },
    #[error("Mixxx database handle is already closed")]
    Closed,
    #[error("Mixxx database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl DbError {
    fn classify(path: &Path, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Self::Locked(path.to_path_buf())
            }
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::NotADatabase => {
                Self::Schema {
                    path: path.to_path_buf(),
                    missing: REQUIRED_TABLES.iter().map(|t| t.to_string()).collect(),
                }
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Read-write handle on a Mixxx `mixxxdb.sqlite` file.
pub struct LibraryDb {
    conn: Option<Connection>,
    path: PathBuf,
}

impl LibraryDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit wait for locks held by another process (e.g. Mixxx).
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(DbError::NotFound(path));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DbError::classify(&path, e))?;
        conn.busy_timeout(busy_timeout)?;

        let missing = missing_tables(&conn).map_err(|e| DbError::classify(&path, e))?;
        if !missing.is_empty() {
            return Err(DbError::Schema { path, missing });
        }
        debug!("Mixxx schema validated for {}", path.display());

        // WAL lets Mixxx keep reading while we write.
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| DbError::classify(&path, e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("journal_mode is {mode}, expected wal");
        }

        info!("Connected to Mixxx database at {}", path.display());
        Ok(Self {
            conn: Some(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, DbError> {
        self.conn.as_ref().ok_or(DbError::Closed)
    }

    pub fn track_count(&self) -> Result<i64, DbError> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(id) FROM library WHERE mixxx_deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Names of crates holding at least one non-deleted track, alphabetically.
    pub fn crates(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn()?.prepare(
            "SELECT DISTINCT c.name
             FROM crates c
             JOIN crate_tracks ct ON c.id = ct.crate_id
             JOIN library l ON ct.track_id = l.id
             WHERE l.mixxx_deleted = 0
             ORDER BY c.name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Distinct non-empty genres of non-deleted tracks, alphabetically.
    pub fn genres(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn()?.prepare(
            "SELECT DISTINCT genre
             FROM library
             WHERE genre IS NOT NULL AND genre != '' AND mixxx_deleted = 0
             ORDER BY genre",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn tracks(&self, filter: &TrackFilter) -> Result<Vec<Track>, DbError> {
        let mut sql = String::from(
            "SELECT l.id, COALESCE(l.artist, ''), COALESCE(l.title, ''), l.genre
             FROM library l
             WHERE l.mixxx_deleted = 0",
        );
        let mut binds: Vec<&str> = Vec::new();

        if !filter.crates.is_empty() {
            let list = placeholders(binds.len() + 1, filter.crates.len());
            sql.push_str(&format!(
                " AND l.id IN (
                    SELECT ct.track_id FROM crate_tracks ct
                    JOIN crates c ON ct.crate_id = c.id
                    WHERE c.name IN ({list}))"
            ));
            binds.extend(filter.crates.iter().map(String::as_str));
        }

        if !filter.genres.is_empty() {
            let list = placeholders(binds.len() + 1, filter.genres.len());
            sql.push_str(&format!(" AND l.genre IN ({list})"));
            binds.extend(filter.genres.iter().map(String::as_str));
        }

        sql.push_str(" ORDER BY l.id");
        debug!("track query: {sql} {binds:?}");

        let mut stmt = self.conn()?.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter()), row_to_track)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Overwrite the genre of `track.id`. Writing the same value again is a no-op change.
    pub fn update_track_genre(&self, track: &Track, genre: &str) -> Result<(), DbError> {
        let changed = self.conn()?.execute(
            "UPDATE library SET genre = ?1 WHERE id = ?2",
            params![genre, track.id],
        )?;
        if changed == 0 {
            warn!("no library row with id {} to update", track.id);
        }
        Ok(())
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close() {
                Ok(()) => debug!("Closed Mixxx database at {}", self.path.display()),
                Err((_, e)) => warn!("closing {} failed: {e}", self.path.display()),
            }
        }
    }
}

impl Drop for LibraryDb {
    fn drop(&mut self) {
        self.close();
    }
}

fn missing_tables(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        if !stmt.exists([table])? {
            missing.push(table.to_string());
        }
    }
    Ok(missing)
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_track(row: &rusqlite::Row) -> Result<Track, rusqlite::Error> {
    Ok(Track {
        id: row.get(0)?,
        artist: row.get(1)?,
        title: row.get(2)?,
        genre: row.get(3)?,
    })
}

/// `MIXXX_DB_PATH` if set, otherwise where Mixxx keeps its library on this OS.
pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MIXXX_DB_PATH") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    platform_db_path()
}

fn platform_db_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    if cfg!(target_os = "windows") {
        Some(home.join("AppData").join("Local").join("Mixxx").join("mixxxdb.sqlite"))
    } else if cfg!(target_os = "macos") {
        Some(
            home.join("Library/Containers/org.mixxx.mixxx/Data/Library/Application Support/Mixxx")
                .join("mixxxdb.sqlite"),
        )
    } else if cfg!(target_os = "linux") {
        Some(home.join(".mixxx").join("mixxxdb.sqlite"))
    } else {
        None
    }
}

/// Pick the database path: command line, then config (`default` defers), then platform default.
pub fn resolve_db_path(cli: Option<&Path>, configured: &str) -> Option<PathBuf> {
    if let Some(path) = cli {
        return Some(path.to_path_buf());
    }
    let configured = configured.trim();
    if !configured.is_empty() && configured != "default" {
        let path = PathBuf::from(configured);
        return Some(std::path::absolute(&path).unwrap_or(path));
    }
    default_db_path()
}

/// Build a small Mixxx library on disk. Every genre write is logged to
/// `genre_writes` by a trigger so tests can count updates.
#[cfg(test)]
pub(crate) fn create_test_library(dir: &Path) -> PathBuf {
    let path = dir.join("mixxxdb.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "
        CREATE TABLE library (
            id INTEGER PRIMARY KEY,
            artist VARCHAR(64),
            title VARCHAR(64),
            genre VARCHAR(64),
            mixxx_deleted INTEGER DEFAULT 0
        );
        CREATE TABLE crates (
            id INTEGER PRIMARY KEY,
            name VARCHAR(48) UNIQUE NOT NULL
        );
        CREATE TABLE crate_tracks (
            crate_id INTEGER NOT NULL REFERENCES crates(id),
            track_id INTEGER NOT NULL REFERENCES library(id),
            UNIQUE (crate_id, track_id)
        );
        CREATE TABLE genre_writes (track_id INTEGER, genre TEXT);
        CREATE TRIGGER log_genre_write AFTER UPDATE OF genre ON library
        BEGIN
            INSERT INTO genre_writes (track_id, genre) VALUES (NEW.id, NEW.genre);
        END;

        INSERT INTO library (id, artist, title, genre) VALUES (1, 'Burial', 'Archangel', 'Dubstep');
        INSERT INTO library (id, artist, title, genre) VALUES (2, 'Burial', 'Endorphin', 'Dubstep');
        INSERT INTO library (id, artist, title, genre) VALUES (3, 'Actress', 'R.I.P.', 'Techno');
        INSERT INTO library (id, artist, title, genre) VALUES (4, 'Ricardo Villalobos', 'Dexter (Original Mix)', 'Minimal');
        INSERT INTO library (id, artist, title, genre) VALUES (5, 'Burial', 'Unknown Track', NULL);
        INSERT INTO library (id, artist, title, genre, mixxx_deleted) VALUES (6, 'Gone', 'Deleted Track', 'House', 1);
        INSERT INTO library (id, artist, title, genre) VALUES (7, 'Actress', 'Hubble', '');

        INSERT INTO crates (id, name) VALUES (1, 'Deep Cuts');
        INSERT INTO crates (id, name) VALUES (2, 'Warmup');
        INSERT INTO crates (id, name) VALUES (3, 'Trash');
        INSERT INTO crates (id, name) VALUES (4, 'Empty');
        INSERT INTO crate_tracks (crate_id, track_id) VALUES (1, 1);
        INSERT INTO crate_tracks (crate_id, track_id) VALUES (1, 3);
        INSERT INTO crate_tracks (crate_id, track_id) VALUES (2, 3);
        INSERT INTO crate_tracks (crate_id, track_id) VALUES (2, 4);
        INSERT INTO crate_tracks (crate_id, track_id) VALUES (3, 6);
        ",
    )
    .unwrap();
    path
}

#[cfg(test)]
pub(crate) fn genre_writes(path: &Path) -> Vec<(i64, String)> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT track_id, genre FROM genre_writes ORDER BY rowid")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tracks: &[Track]) -> Vec<i64> {
        tracks.iter().map(|t| t.id).collect()
    }

    fn filter(crates: &[&str], genres: &[&str]) -> TrackFilter {
        TrackFilter::new(
            crates.iter().map(|s| s.to_string()).collect(),
            genres.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn open_switches_to_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        let mode: String = db
            .conn()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibraryDb::open(dir.path().join("nope.sqlite"))
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, DbError::NotFound(_)));
        assert!(!dir.path().join("nope.sqlite").exists(), "open must not create");
    }

    #[test]
    fn open_reports_missing_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE library (id INTEGER PRIMARY KEY);")
            .unwrap();

        match LibraryDb::open(&path) {
            Err(DbError::Schema { missing, .. }) => {
                assert_eq!(missing, vec!["crates".to_string(), "crate_tracks".to_string()]);
            }
            Err(other) => panic!("expected schema error, got {other}"),
            Ok(_) => panic!("expected schema error"),
        }
    }

    #[test]
    fn open_non_database_file_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not a sqlite file\n".repeat(64)).unwrap();
        let err = LibraryDb::open(&path).err().expect("text file must fail");
        assert!(matches!(err, DbError::Schema { .. }), "got {err}");
    }

    #[test]
    fn open_while_exclusively_locked_is_locked_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_library(dir.path());

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let err = LibraryDb::open_with_timeout(&path, Duration::from_millis(50))
            .err()
            .expect("locked database must fail");
        assert!(matches!(err, DbError::Locked(_)), "got {err}");

        holder.execute_batch("ROLLBACK;").unwrap();
        drop(holder);
        assert!(LibraryDb::open(&path).is_ok());
    }

    #[test]
    fn track_count_excludes_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        assert_eq!(db.track_count().unwrap(), 6);
    }

    #[test]
    fn crates_only_lists_crates_with_live_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        assert_eq!(db.crates().unwrap(), vec!["Deep Cuts", "Warmup"]);
    }

    #[test]
    fn genres_are_distinct_sorted_and_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        assert_eq!(db.genres().unwrap(), vec!["Dubstep", "Minimal", "Techno"]);
    }

    #[test]
    fn empty_filters_return_all_live_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        let all = db.tracks(&TrackFilter::default()).unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3, 4, 5, 7]);
        assert_eq!(all, db.tracks(&filter(&[], &[])).unwrap());

        let unknown = all.iter().find(|t| t.id == 5).unwrap();
        assert_eq!(unknown.genre, None);
    }

    #[test]
    fn crate_filter_is_a_subset() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        let all = ids(&db.tracks(&TrackFilter::default()).unwrap());
        let deep = ids(&db.tracks(&filter(&["Deep Cuts"], &[])).unwrap());
        assert_eq!(deep, vec![1, 3]);
        assert!(deep.len() < all.len());
        assert!(deep.iter().all(|id| all.contains(id)));
    }

    #[test]
    fn track_in_two_selected_crates_is_returned_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        let tracks = db.tracks(&filter(&["Deep Cuts", "Warmup"], &[])).unwrap();
        assert_eq!(ids(&tracks), vec![1, 3, 4]);
    }

    #[test]
    fn crate_and_genre_filters_compose_with_and() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        assert_eq!(ids(&db.tracks(&filter(&["Warmup"], &["Techno"])).unwrap()), vec![3]);
        assert_eq!(ids(&db.tracks(&filter(&[], &["Dubstep"])).unwrap()), vec![1, 2]);
        assert!(db.tracks(&filter(&["Deep Cuts"], &["Minimal"])).unwrap().is_empty());
    }

    #[test]
    fn deleted_tracks_never_match_filters() {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        assert!(db.tracks(&filter(&["Trash"], &[])).unwrap().is_empty());
        assert!(db.tracks(&filter(&[], &["House"])).unwrap().is_empty());
        assert!(db.tracks(&filter(&["No Such Crate"], &[])).unwrap().is_empty());
    }

    #[test]
    fn update_genre_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_library(dir.path());
        let db = LibraryDb::open(&path).unwrap();
        let track = db
            .tracks(&TrackFilter::default())
            .unwrap()
            .into_iter()
            .find(|t| t.id == 5)
            .unwrap();

        db.update_track_genre(&track, "Garage").unwrap();
        let once = db.tracks(&TrackFilter::default()).unwrap();
        db.update_track_genre(&track, "Garage").unwrap();
        let twice = db.tracks(&TrackFilter::default()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(
            twice.iter().find(|t| t.id == 5).unwrap().genre.as_deref(),
            Some("Garage")
        );
        assert_eq!(db.genres().unwrap(), vec!["Dubstep", "Garage", "Minimal", "Techno"]);
    }

    #[test]
    fn close_is_safe_to_repeat_and_blocks_queries() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = LibraryDb::open(create_test_library(dir.path())).unwrap();
        db.close();
        db.close();
        assert!(matches!(db.track_count(), Err(DbError::Closed)));
    }

    #[test]
    fn resolve_prefers_cli_then_config() {
        let cli = PathBuf::from("/tmp/cli.sqlite");
        assert_eq!(
            resolve_db_path(Some(&cli), "/tmp/config.sqlite"),
            Some(cli.clone())
        );
        assert_eq!(
            resolve_db_path(None, "/tmp/config.sqlite"),
            Some(PathBuf::from("/tmp/config.sqlite"))
        );
    }

    #[test]
    fn placeholders_are_numbered_from_offset() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(3, 2), "?3, ?4");
    }
}
