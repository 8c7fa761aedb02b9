//! JSON-file ledger — a `MemoryLedger` loaded from and saved to disk

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use clausia_core::MemoryLedger;
use thiserror::Error;
use tracing::debug;

/// I/O or decode failure on the ledger file
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read ledger '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("ledger '{}' is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot encode ledger: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("cannot write ledger '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLedger { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger; a missing file is an empty ledger
    pub fn load(&self) -> Result<MemoryLedger, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "ledger file absent, starting empty");
                return Ok(MemoryLedger::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the ledger through a sibling temp file so a crash never leaves
    /// a half-written ledger behind
    pub fn save(&self, ledger: &MemoryLedger) -> Result<(), StoreError> {
        let encoded = serde_json::to_string_pretty(ledger).map_err(StoreError::Encode)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), assets = ledger.len(), "ledger saved");
        Ok(())
    }
}
