//! Generated contract records.
//!
//! Records live in memory keyed by UUID and can be persisted to a JSON file.
//! Saves go through a temp file in the same directory and a rename, so a
//! crash never leaves a half-written store.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use scg_core::{ContractKind, ProgramId};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Lifecycle of a stored contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Generated,
    Built,
    Failed,
    Deployed,
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContractStatus::Generated => "generated",
            ContractStatus::Built => "built",
            ContractStatus::Failed => "failed",
            ContractStatus::Deployed => "deployed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: Uuid,
    pub kind: ContractKind,
    pub name: String,
    pub code: String,
    pub program_id: Option<ProgramId>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractRecord {
    pub fn new(kind: ContractKind, name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            code: code.into(),
            program_id: None,
            status: ContractStatus::Generated,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Contract not found: {0}")]
    NotFound(Uuid),
}

/// In-memory contract map with optional JSON persistence.
#[derive(Debug, Default)]
pub struct ContractStore {
    path: Option<PathBuf>,
    records: HashMap<Uuid, ContractRecord>,
}

impl ContractStore {
    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it when the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => {
                let list: Vec<ContractRecord> =
                    serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), count = records.len(), "opened contract store");
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persist to disk; a no-op for in-memory stores.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let io_error = |source: std::io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(&self.list()).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_error)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
        tmp.write_all(json.as_bytes()).map_err(io_error)?;
        tmp.write_all(b"\n").map_err(io_error)?;
        tmp.persist(path).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    /// Insert a record, returning its id.
    pub fn insert(&mut self, record: ContractRecord) -> Uuid {
        let id = record.id;
        self.records.insert(id, record);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&ContractRecord> {
        self.records.get(id)
    }

    /// Look up by full UUID or a unique prefix of its string form.
    pub fn find(&self, id_or_prefix: &str) -> Option<&ContractRecord> {
        if let Ok(id) = id_or_prefix.parse::<Uuid>() {
            return self.records.get(&id);
        }
        let prefix = id_or_prefix.to_lowercase();
        let mut matches = self
            .records
            .values()
            .filter(|r| r.id.to_string().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(record), None) => Some(record),
            _ => None,
        }
    }

    /// Replace a record's code; a changed body resets its status to `Generated`.
    pub fn update_code(&mut self, id: &Uuid, code: impl Into<String>) -> Result<(), StoreError> {
        let record = self.get_mut(id)?;
        let code = code.into();
        if record.code != code {
            record.code = code;
            record.status = ContractStatus::Generated;
        }
        record.touch();
        Ok(())
    }

    pub fn set_status(&mut self, id: &Uuid, status: ContractStatus) -> Result<(), StoreError> {
        let record = self.get_mut(id)?;
        record.status = status;
        record.touch();
        Ok(())
    }

    pub fn set_program_id(&mut self, id: &Uuid, program_id: ProgramId) -> Result<(), StoreError> {
        let record = self.get_mut(id)?;
        record.program_id = Some(program_id);
        record.touch();
        Ok(())
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<&ContractRecord> {
        let mut records: Vec<&ContractRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn get_mut(&mut self, id: &Uuid) -> Result<&mut ContractRecord, StoreError> {
        self.records.get_mut(id).ok_or(StoreError::NotFound(*id))
    }
}
