//! Durable governance state.
//!
//! Autonomy levels survive restarts through an [`AutonomyStore`]. The JSON
//! file layout is a single document carrying the records, a UTC stamp, and
//! a sha256 digest over the canonical record encoding. A document whose
//! digest does not match is treated as absent data would be dangerous:
//! loading fails loudly instead of silently granting stale authority.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::autonomy::AutonomyRecord;
use crate::ids::IntersectionId;

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("governance store io failure: {0}")]
    Io(#[from] io::Error),
    #[error("governance state encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("governance state digest mismatch: stored {stored}, computed {computed}")]
    DigestMismatch { stored: String, computed: String },
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "GW-STORE-0001",
            Self::Encoding(_) => "GW-STORE-0002",
            Self::DigestMismatch { .. } => "GW-STORE-0003",
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// On-disk schema. `digest` covers the canonical JSON of `records` only,
/// so the human-readable stamp can change without invalidating the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomyStateDocument {
    pub saved_at_utc: String,
    pub records: BTreeMap<IntersectionId, AutonomyRecord>,
    pub digest: String,
}

impl AutonomyStateDocument {
    pub fn new(
        records: BTreeMap<IntersectionId, AutonomyRecord>,
        saved_at_utc: String,
    ) -> Result<Self, StoreError> {
        let digest = records_digest(&records)?;
        Ok(Self {
            saved_at_utc,
            records,
            digest,
        })
    }

    pub fn verify(&self) -> Result<(), StoreError> {
        let computed = records_digest(&self.records)?;
        if computed != self.digest {
            return Err(StoreError::DigestMismatch {
                stored: self.digest.clone(),
                computed,
            });
        }
        Ok(())
    }
}

fn records_digest(
    records: &BTreeMap<IntersectionId, AutonomyRecord>,
) -> Result<String, StoreError> {
    let canonical = serde_json::to_vec(records)?;
    Ok(sha256_hex(&canonical))
}

// ---------------------------------------------------------------------------
// Store trait and implementations
// ---------------------------------------------------------------------------

/// Where governance records live between restarts.
pub trait AutonomyStore: Send {
    fn save(
        &mut self,
        records: &BTreeMap<IntersectionId, AutonomyRecord>,
    ) -> Result<(), StoreError>;

    /// `Ok(None)` means no prior state exists, which is a normal first
    /// boot, not an error.
    fn load(
        &mut self,
    ) -> Result<Option<BTreeMap<IntersectionId, AutonomyRecord>>, StoreError>;
}

/// JSON file store with atomic replace semantics: the document is written
/// to a sibling temp file and renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileAutonomyStore {
    path: PathBuf,
}

impl JsonFileAutonomyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    }
}

impl AutonomyStore for JsonFileAutonomyStore {
    fn save(
        &mut self,
        records: &BTreeMap<IntersectionId, AutonomyRecord>,
    ) -> Result<(), StoreError> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let document = AutonomyStateDocument::new(records.clone(), stamp)?;
        let bytes = serde_json::to_vec_pretty(&document)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        fs::write(&temp, &bytes)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn load(
        &mut self,
    ) -> Result<Option<BTreeMap<IntersectionId, AutonomyRecord>>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let document: AutonomyStateDocument = serde_json::from_slice(&bytes)?;
        document.verify()?;
        Ok(Some(document.records))
    }
}

/// Test and embedding convenience: governance state held in memory only.
#[derive(Debug, Default)]
pub struct InMemoryAutonomyStore {
    records: Option<BTreeMap<IntersectionId, AutonomyRecord>>,
    pub saves: u64,
}

impl InMemoryAutonomyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AutonomyStore for InMemoryAutonomyStore {
    fn save(
        &mut self,
        records: &BTreeMap<IntersectionId, AutonomyRecord>,
    ) -> Result<(), StoreError> {
        self.records = Some(records.clone());
        self.saves = self.saves.saturating_add(1);
        Ok(())
    }

    fn load(
        &mut self,
    ) -> Result<Option<BTreeMap<IntersectionId, AutonomyRecord>>, StoreError> {
        Ok(self.records.clone())
    }
}
