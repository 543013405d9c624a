//! Engine state persistence: sessions, ledger, device bindings, directory.
//!
//! Each concern lives in its own JSON file inside the base directory,
//! wrapped in a versioned envelope:
//! ```json
//! {
//!     "version": 1,
//!     "data": [ ... ]
//! }
//! ```
//!
//! A missing file is an empty collection. The ledger and sessions are
//! validated on restore, so a hand-edited file with duplicate records is
//! rejected instead of silently loaded.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::directory::InMemoryDirectory;
use crate::error::{AttendanceError, Result};
use crate::ids::{AccountId, DeviceId};
use crate::ledger::AttendanceRecord;
use crate::session::Session;

// ── File format constants ─────────────────────────────────────────────────────

const STATE_FILE_VERSION: u32 = 1;

const SESSIONS_FILE: &str = "sessions.json";
const LEDGER_FILE: &str = "ledger.json";
const DEVICES_FILE: &str = "devices.json";
const DIRECTORY_FILE: &str = "directory.json";
const CONFIG_FILE: &str = "config.json";

// ── On-disk structures ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct StateFile<T> {
    version: u32,
    data: T,
}

/// One persisted trusted-device binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub account: AccountId,
    pub device: DeviceId,
}

/// Everything the engine needs to resume where it left off.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub sessions: Vec<Session>,
    pub records: Vec<AttendanceRecord>,
    pub devices: Vec<DeviceBinding>,
}

// ── StateStore ────────────────────────────────────────────────────────────────

/// Filesystem-backed store for engine state.
///
/// Safe for single-process use; concurrent writers from several processes
/// are not coordinated. Files are replaced atomically one at a time.
pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE)
    }

    /// Load `config.json`, or the defaults if there is none.
    pub fn load_config(&self) -> Result<EngineConfig> {
        EngineConfig::load(self.config_path())
    }

    pub fn save_config(&self, config: &EngineConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| AttendanceError::SerializationError(e.to_string()))?;
        write_atomic(&self.config_path(), json.as_bytes())
    }

    /// Load the course and account directory.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::NotFound` if no directory has been saved.
    pub fn load_directory(&self) -> Result<InMemoryDirectory> {
        self.read(DIRECTORY_FILE)?.ok_or_else(|| {
            AttendanceError::NotFound(format!(
                "no directory at {}",
                self.base_dir.join(DIRECTORY_FILE).display()
            ))
        })
    }

    pub fn save_directory(&self, directory: &InMemoryDirectory) -> Result<()> {
        self.write(DIRECTORY_FILE, directory)
    }

    /// Load sessions, ledger and device bindings. Missing files are empty.
    pub fn load_state(&self) -> Result<EngineState> {
        let state = EngineState {
            sessions: self.read(SESSIONS_FILE)?.unwrap_or_default(),
            records: self.read(LEDGER_FILE)?.unwrap_or_default(),
            devices: self.read(DEVICES_FILE)?.unwrap_or_default(),
        };
        log::debug!(
            "loaded state from {}: {} sessions, {} records, {} bindings",
            self.base_dir.display(),
            state.sessions.len(),
            state.records.len(),
            state.devices.len()
        );
        Ok(state)
    }

    /// Persist sessions, then the ledger, then device bindings.
    ///
    /// Each file is replaced atomically, but the three files are not one
    /// transaction. Sessions go first so a crash between files can leave
    /// sessions without their records, never records without their session.
    pub fn save_state(&self, state: &EngineState) -> Result<()> {
        self.write(SESSIONS_FILE, &state.sessions)?;
        self.write(LEDGER_FILE, &state.records)?;
        self.write(DEVICES_FILE, &state.devices)?;
        Ok(())
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.base_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;
        let file: StateFile<T> = serde_json::from_slice(&bytes).map_err(|e| {
            AttendanceError::InvalidFileFormat(format!(
                "failed to parse {}: {e}",
                path.display()
            ))
        })?;
        if file.version != STATE_FILE_VERSION {
            return Err(AttendanceError::InvalidFileFormat(format!(
                "{} has version {}, expected {STATE_FILE_VERSION}",
                path.display(),
                file.version
            )));
        }
        Ok(Some(file.data))
    }

    fn write<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let file = StateFile {
            version: STATE_FILE_VERSION,
            data,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| AttendanceError::SerializationError(e.to_string()))?;
        write_atomic(&self.base_dir.join(name), json.as_bytes())
    }
}

/// Write `data` to `path` through a sibling temp file and `std::fs::rename`,
/// so a crash mid-write never leaves a partial file behind.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
