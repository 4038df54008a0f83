// Session persistence: the on-disk record, the store seam, and the clock used
// to stamp saved sessions.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::http::StoredCookie;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write session file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to remove session file {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to encode session record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What survives between process runs. Never contains the password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub cookies: Vec<StoredCookie>,
    pub username: String,
    pub saved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait SessionStore: Send + Sync {
    /// The saved record, or `None` if there is none or it cannot be used.
    /// Never an error: an unusable record means "log in again".
    fn load(&self) -> Option<SessionRecord>;

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove the saved record. Removing a record that does not exist is fine.
    fn clear(&self) -> Result<(), StoreError>;

    /// Where the record lives, for display.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// JSON file store. Not locked across processes; concurrent writers race.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<SessionRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved session");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), "cannot read session file: {e}");
                return None;
            }
        };

        // Invalid UTF-8 is a decode error as well and takes the corrupt path.
        match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) => {
                info!(
                    path = %self.path.display(),
                    username = %record.username,
                    cookies = record.cookies.len(),
                    "loaded saved session"
                );
                Some(record)
            }
            Err(e) => {
                warn!(path = %self.path.display(), "discarding corrupt session file: {e}");
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), "failed to remove corrupt session file: {e}");
                }
                None
            }
        }
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_vec_pretty(record)?;
        let mut file = owner_only_options().open(&self.path).map_err(write_err)?;
        file.write_all(&json).map_err(write_err)?;
        // The creation mode does not apply to a file left by an earlier run.
        restrict_permissions(&self.path).map_err(write_err)?;

        info!(path = %self.path.display(), cookies = record.cookies.len(), "session saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "session file removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Create-or-truncate for writing. New files are created owner-only on unix.
fn owner_only_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

/// Owner read/write only; cookies in the file grant portal access.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
