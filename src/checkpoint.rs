use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AmpliflowError;
use crate::workspace::Workspace;

/// Hex SHA-256 digest over a stage's inputs and configuration. Any upstream
/// change produces a different fingerprint and so invalidates old entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub fn new(stage: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(stage.as_bytes());
        hasher.update([0]);
        Self { hasher }
    }

    pub fn field(mut self, label: &str, value: impl fmt::Display) -> Self {
        self.hasher.update(label.as_bytes());
        self.hasher.update(b"=");
        self.hasher.update(value.to_string().as_bytes());
        self.hasher.update([0]);
        self
    }

    /// Folds in a file's name and contents, so edited inputs change the key
    /// even when paths stay the same.
    pub fn input_file(mut self, path: &Utf8Path) -> Result<Self, AmpliflowError> {
        self.hasher
            .update(path.file_name().unwrap_or(path.as_str()).as_bytes());
        self.hasher.update([0]);
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("open {path}: {err}")))?;
        let mut reader = std::io::BufReader::new(file);
        let mut buf = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|err| AmpliflowError::Filesystem(format!("read {path}: {err}")))?;
            if n == 0 {
                break;
            }
            self.hasher.update(&buf[..n]);
        }
        self.hasher.update([0]);
        Ok(self)
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(format!("{:x}", self.hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub stage: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointMeta {
    stage: String,
    fingerprint: Fingerprint,
    written_at: String,
}

/// Durable blob store for expensive stage state, one entry per stage. A read
/// whose fingerprint disagrees with the persisted entry surfaces
/// [`AmpliflowError::CheckpointMismatch`] instead of the stale blob.
pub struct CheckpointStore {
    root: Utf8PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CheckpointStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Blobs are named by their fingerprint, so a key can never resolve to
    /// another key's bytes even when two processes replace the entry
    /// concurrently. Superseded blobs are left behind; a reader whose
    /// metadata names a fingerprint must always find that blob.
    fn blob_path(&self, stage: &str, fingerprint: &Fingerprint) -> Utf8PathBuf {
        self.root.join(stage).join(format!("{fingerprint}.bin"))
    }

    fn meta_path(&self, stage: &str) -> Utf8PathBuf {
        self.root.join(stage).join("state.json")
    }

    /// Reads and writes for a key are mutually exclusive, guarded by the
    /// stage entry they touch.
    fn guard(&self, stage: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("checkpoint lock map poisoned");
        locks
            .entry(stage.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn put(&self, key: &CheckpointKey, blob: &[u8]) -> Result<(), AmpliflowError> {
        let guard = self.guard(&key.stage);
        let _held = guard.lock().expect("checkpoint guard poisoned");

        let meta = CheckpointMeta {
            stage: key.stage.clone(),
            fingerprint: key.fingerprint.clone(),
            written_at: chrono::Utc::now().to_rfc3339(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;

        // Blob first; the metadata rename is the commit point.
        Workspace::write_bytes_atomic(&self.blob_path(&key.stage, &key.fingerprint), blob)?;
        Workspace::write_bytes_atomic(&self.meta_path(&key.stage), &meta_bytes)?;
        Ok(())
    }

    /// `Ok(None)` means no entry exists for the stage; `CheckpointMismatch`
    /// means an entry exists but was produced from different inputs.
    pub fn get(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, AmpliflowError> {
        let guard = self.guard(&key.stage);
        let _held = guard.lock().expect("checkpoint guard poisoned");

        let meta_path = self.meta_path(&key.stage);
        if !meta_path.as_std_path().exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(meta_path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("read {meta_path}: {err}")))?;
        let meta: CheckpointMeta = serde_json::from_str(&content)
            .map_err(|err| AmpliflowError::Filesystem(format!("parse {meta_path}: {err}")))?;

        if meta.stage != key.stage || meta.fingerprint != key.fingerprint {
            return Err(AmpliflowError::CheckpointMismatch {
                stage: key.stage.clone(),
                expected: key.fingerprint.to_string(),
                found: meta.fingerprint.to_string(),
            });
        }

        let blob_path = self.blob_path(&key.stage, &key.fingerprint);
        let blob = fs::read(blob_path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("read {blob_path}: {err}")))?;
        Ok(Some(blob))
    }
}
