//! `SQLite` snapshot store.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use super::{MutationEvent, PersistenceHook};
use crate::error::{Error, Result};
use crate::experiment::ExperimentSnapshot;

/// Stores experiment snapshots in a `SQLite` database, keyed by name.
///
/// Uses WAL mode for concurrent readers and a single writer. Installed as
/// a hook, it replaces the experiment's row after every mutation inside a
/// transaction, so a reader always sees a complete snapshot.
///
/// # Examples
///
/// ```no_run
/// use stagewise::Experiment;
/// use stagewise::storage::SqliteStore;
///
/// let store = SqliteStore::open("experiments.db").unwrap();
/// if let Some(snapshot) = store.load_snapshot("tuning").unwrap() {
///     let experiment = Experiment::from_snapshot(snapshot).unwrap();
/// }
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl ToString) -> Error {
    Error::persistence(None, e)
}

impl SqliteStore {
    /// Opens (or creates) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;

        // WAL mode: concurrent readers, single writer.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS experiments (
                name       TEXT PRIMARY KEY,
                num_trials INTEGER NOT NULL,
                snapshot   TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace the snapshot stored under `snapshot.name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if serialization or the write fails.
    pub fn save_snapshot(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        let data = serde_json::to_string(snapshot).map_err(db_err)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO experiments (name, num_trials, snapshot) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                snapshot.name,
                i64::try_from(snapshot.trials.len()).unwrap_or(i64::MAX),
                data
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    /// The snapshot stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the read or parsing fails.
    pub fn load_snapshot(&self, name: &str) -> Result<Option<ExperimentSnapshot>> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM experiments WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        data.map(|d| serde_json::from_str(&d).map_err(db_err))
            .transpose()
    }

    /// Names of every stored experiment, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the query fails.
    pub fn experiment_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM experiments ORDER BY name")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

impl PersistenceHook for SqliteStore {
    fn on_mutation(&self, _event: &MutationEvent, snapshot: &ExperimentSnapshot) -> Result<()> {
        self.save_snapshot(snapshot)
    }
}
