use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::SampleId;
use crate::error::AmpliflowError;

/// Output layout for one pipeline run: per-stage directories mirroring input
/// filenames, a checkpoint root, and the final retention report. Stage inputs
/// are never mutated in place; every stage writes into its own directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    out_root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(out_root: Utf8PathBuf) -> Self {
        Self { out_root }
    }

    pub fn out_root(&self) -> &Utf8Path {
        &self.out_root
    }

    pub fn stage_dir(&self, stage: &str) -> Utf8PathBuf {
        self.out_root.join("stages").join(stage)
    }

    pub fn stage_file(&self, stage: &str, file_name: &str) -> Utf8PathBuf {
        self.stage_dir(stage).join(file_name)
    }

    pub fn scratch_dir(&self) -> Utf8PathBuf {
        self.out_root.join("scratch")
    }

    pub fn scratch_file(&self, stage: &str, sample: &SampleId, file_name: &str) -> Utf8PathBuf {
        self.scratch_dir()
            .join(format!("{stage}-{sample}-{file_name}"))
    }

    pub fn checkpoint_root(&self) -> Utf8PathBuf {
        self.out_root.join("checkpoints")
    }

    pub fn retention_path(&self) -> Utf8PathBuf {
        self.out_root.join("retention.tsv")
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.out_root.join("report.json")
    }

    pub fn ensure_stage_dir(&self, stage: &str) -> Result<Utf8PathBuf, AmpliflowError> {
        let dir = self.stage_dir(stage);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    pub fn ensure_scratch_dir(&self) -> Result<Utf8PathBuf, AmpliflowError> {
        let dir = self.scratch_dir();
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    /// Atomic publish of a finished scratch file into a stage directory. Only
    /// the runner calls this, and only for accepted invocations; anything a
    /// timed-out invocation wrote stays in scratch.
    pub fn publish(source: &Utf8Path, dest: &Utf8Path) -> Result<(), AmpliflowError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| AmpliflowError::Filesystem(format!("create {parent}: {err}")))?;
        }
        fs::rename(source.as_std_path(), dest.as_std_path()).map_err(|err| {
            AmpliflowError::Filesystem(format!("rename {source} -> {dest}: {err}"))
        })
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), AmpliflowError> {
        let parent = path
            .parent()
            .ok_or_else(|| AmpliflowError::Filesystem(format!("no parent for {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("create {parent}: {err}")))?;
        let temp = tempfile::Builder::new()
            .prefix(".ampliflow")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content)
            .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
