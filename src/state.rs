use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::contract::{ContractSnapshot, SnapshotError, StorageContract};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file {0} already exists; the contract was already initialized")]
    AlreadyInitialized(PathBuf),
    #[error("state file {0} not found; run `init` first")]
    NotInitialized(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("inconsistent state file {path}: {source}")]
    Inconsistent {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
}

/// JSON file holding one contract instance between calls.
#[derive(Clone, Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes the first snapshot; refuses to overwrite an existing file.
    pub fn init(&self, contract: &StorageContract) -> Result<(), StateError> {
        let bytes = self.encode(&contract.snapshot())?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => StateError::AlreadyInitialized(self.path.clone()),
                _ => self.io(err),
            })?;
        file.write_all(&bytes).map_err(|err| self.io(err))?;
        file.sync_all().map_err(|err| self.io(err))?;
        debug!(path = %self.path.display(), "state file created");
        Ok(())
    }

    pub fn load(&self) -> Result<StorageContract, StateError> {
        let bytes = fs::read(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StateError::NotInitialized(self.path.clone()),
            _ => self.io(err),
        })?;
        let snapshot: ContractSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| StateError::Json {
                path: self.path.clone(),
                source,
            })?;
        let contract =
            StorageContract::restore(snapshot).map_err(|source| StateError::Inconsistent {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            path = %self.path.display(),
            height = contract.gateway().ledger().height(),
            "state file loaded"
        );
        Ok(contract)
    }

    /// Replaces the file through a sibling temp file and a rename, so a crash
    /// leaves either the old or the new state.
    pub fn save(&self, contract: &StorageContract) -> Result<(), StateError> {
        if !self.exists() {
            return Err(StateError::NotInitialized(self.path.clone()));
        }
        let bytes = self.encode(&contract.snapshot())?;
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        {
            let mut file = fs::File::create(&tmp).map_err(|err| self.io(err))?;
            file.write_all(&bytes).map_err(|err| self.io(err))?;
            file.sync_all().map_err(|err| self.io(err))?;
        }
        fs::rename(&tmp, &self.path).map_err(|err| self.io(err))?;
        debug!(path = %self.path.display(), "state file saved");
        Ok(())
    }

    fn encode(&self, snapshot: &ContractSnapshot) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec_pretty(snapshot).map_err(|source| StateError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn io(&self, source: io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
