//! JSONL event journal.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;

use super::{MutationEvent, PersistenceHook};
use crate::error::{Error, Result};
use crate::experiment::ExperimentSnapshot;

/// A hook that appends every mutation as a JSON line to a file.
///
/// The journal is an append-only audit log of the experiment's history.
/// Multiple processes can safely share the same file: writes use an
/// exclusive file lock, reads use a shared file lock.
///
/// # Examples
///
/// ```no_run
/// use stagewise::storage::JournalHook;
///
/// let hook = JournalHook::new("experiment.jsonl");
/// let events = JournalHook::read_events("experiment.jsonl").unwrap();
/// ```
pub struct JournalHook {
    path: PathBuf,
    /// Serialise in-process writes so we only hold the file lock briefly.
    write_lock: Mutex<()>,
}

impl JournalHook {
    /// Creates a journal hook appending to `path`.
    ///
    /// The file is created on the first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// The journal file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event from a journal file, in write order.
    ///
    /// Returns an empty list if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file exists but cannot be read
    /// or a line cannot be parsed.
    pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<MutationEvent>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::persistence(None, e)),
        };

        file.lock_shared().map_err(|e| Error::persistence(None, e))?;

        let reader = BufReader::new(&file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| Error::persistence(None, e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            events.push(serde_json::from_str(line).map_err(|e| Error::persistence(None, e))?);
        }

        file.unlock().map_err(|e| Error::persistence(None, e))?;
        Ok(events)
    }

    fn append(&self, event: &MutationEvent) -> Result<()> {
        let index = Some(event.index());
        let _guard = self.write_lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::persistence(index, e))?;
        file.lock_exclusive()
            .map_err(|e| Error::persistence(index, e))?;

        let line = serde_json::to_string(event).map_err(|e| Error::persistence(index, e))?;
        writeln!(file, "{line}").map_err(|e| Error::persistence(index, e))?;
        file.flush().map_err(|e| Error::persistence(index, e))?;

        file.unlock().map_err(|e| Error::persistence(index, e))
    }
}

impl PersistenceHook for JournalHook {
    fn on_mutation(&self, event: &MutationEvent, _snapshot: &ExperimentSnapshot) -> Result<()> {
        self.append(event)
    }
}
