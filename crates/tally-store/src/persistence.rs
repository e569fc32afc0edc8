//! Durable storage for the clock and the message log.
//!
//! The replica calls `append_messages` and then `save_clock` for every
//! mutating operation. A crash or failure between the two calls leaves
//! messages on disk that the saved clock does not account for.
//! [`Replica::open`](crate::Replica::open) compares the log against the
//! saved trie's root hash, rebuilds the trie when they differ, and moves
//! the clock past any logged timestamp newer than it.

use crate::error::StorageError;
use crate::message::Message;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Everything a replica needs to resume after a restart.
#[derive(Clone, Debug, Default)]
pub struct PersistedState {
    /// The serialized clock document, if one was ever saved.
    pub clock: Option<String>,
    /// The message log, in the order it was appended.
    pub messages: Vec<Message>,
}

/// Storage backend for one replica.
pub trait Persistence: Send + Sync {
    /// Load the persisted clock and log. A backend that has never been
    /// written to returns an empty state.
    fn load(&self) -> Result<PersistedState>;

    /// Durably append messages to the log.
    fn append_messages(&self, messages: &[Message]) -> Result<()>;

    /// Durably replace the clock document.
    fn save_clock(&self, clock: &str) -> Result<()>;
}

impl<P: Persistence + ?Sized> Persistence for Arc<P> {
    fn load(&self) -> Result<PersistedState> {
        (**self).load()
    }

    fn append_messages(&self, messages: &[Message]) -> Result<()> {
        (**self).append_messages(messages)
    }

    fn save_clock(&self, clock: &str) -> Result<()> {
        (**self).save_clock(clock)
    }
}

/// In-memory backend for tests and simulation.
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<PersistedState>,
    fail_appends: AtomicBool,
    fail_clock_saves: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
        self.fail_clock_saves.store(failing, Ordering::SeqCst);
    }

    /// Fail only clock saves, simulating a crash after the log append.
    pub fn set_failing_clock_saves(&self, failing: bool) {
        self.fail_clock_saves.store(failing, Ordering::SeqCst);
    }

    /// A copy of what is currently stored.
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<PersistedState> {
        Ok(self.snapshot())
    }

    fn append_messages(&self, messages: &[Message]) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("message append rejected".into()));
        }
        self.state.lock().messages.extend_from_slice(messages);
        Ok(())
    }

    fn save_clock(&self, clock: &str) -> Result<()> {
        if self.fail_clock_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("clock save rejected".into()));
        }
        self.state.lock().clock = Some(clock.to_string());
        Ok(())
    }
}

const CLOCK_FILE: &str = "clock.json";
const CLOCK_TMP_FILE: &str = "clock.json.tmp";
const LOG_FILE: &str = "messages.jsonl";

/// Directory backend: `clock.json` plus an append-only `messages.jsonl`.
pub struct FilePersistence {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePersistence {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FilePersistence {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_log(&self) -> Result<Vec<Message>> {
        let path = self.dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;

        let mut messages = Vec::new();
        let mut offset = 0;
        for (index, line) in contents.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += line.len();
            let record = line.trim_end();
            if record.is_empty() {
                continue;
            }
            match serde_json::from_str(record) {
                Ok(message) => messages.push(message),
                // a torn final record from an interrupted append
                Err(e) if !line.ends_with('\n') => {
                    warn!(line = index + 1, error = %e, "Truncating incomplete log record");
                    OpenOptions::new()
                        .write(true)
                        .open(&path)?
                        .set_len(start as u64)?;
                }
                Err(e) => {
                    return Err(StorageError::Corrupt {
                        line: index + 1,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(messages)
    }
}

impl Persistence for FilePersistence {
    fn load(&self) -> Result<PersistedState> {
        let clock_path = self.dir.join(CLOCK_FILE);
        let clock = if clock_path.exists() {
            Some(fs::read_to_string(&clock_path)?)
        } else {
            None
        };
        Ok(PersistedState {
            clock,
            messages: self.load_log()?,
        })
    }

    fn append_messages(&self, messages: &[Message]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut buf = String::new();
        for message in messages {
            buf.push_str(&serde_json::to_string(message)?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(LOG_FILE))?;
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn save_clock(&self, clock: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let tmp = self.dir.join(CLOCK_TMP_FILE);
        let mut file = File::create(&tmp)?;
        file.write_all(clock.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, self.dir.join(CLOCK_FILE))?;
        Ok(())
    }
}
