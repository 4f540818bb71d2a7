use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::StorageError;
use crate::job::{ArtifactKind, ArtifactRef, Job, JobId};

const STAGING_DIR: &str = ".staging";
const RECORD_FILE: &str = "job.json";

/// What a stage hands back for the store to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPayload {
    /// In-memory content, written through a staging file.
    Bytes(Vec<u8>),
    /// A file the stage already wrote into its staging path.
    StagedFile(PathBuf),
    /// A directory the stage already filled in its staging path.
    StagedDir(PathBuf),
}

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem) and falls back to copy + delete.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let err = |e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };
    std::fs::copy(src, dst).map_err(err)?;
    std::fs::remove_file(src).map_err(err)?;
    Ok(())
}

/// On-disk layout of per-job artifacts.
///
/// ```text
/// <root>/<job_id>/video.mp4
///                 audio.mp3
///                 frames/frame_000.jpg ...
///                 analysis.json
///                 export.json
///                 job.json
///                 .staging/        (in-progress writes)
/// ```
///
/// Every artifact is produced under `.staging` and moved into place with a
/// rename, so readers never see a partially written artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join(job_id.as_str())
    }

    /// Final location of an artifact. Pure path arithmetic.
    pub fn path_for(&self, job_id: &JobId, kind: ArtifactKind) -> PathBuf {
        self.job_dir(job_id).join(kind.file_name())
    }

    pub fn record_path(&self, job_id: &JobId) -> PathBuf {
        self.job_dir(job_id).join(RECORD_FILE)
    }

    pub fn exists(&self, job_id: &JobId, kind: ArtifactKind) -> bool {
        let path = self.path_for(job_id, kind);
        if kind.is_directory() {
            path.is_dir()
        } else {
            path.is_file()
        }
    }

    /// A fresh path inside the job's staging area for a collaborator to
    /// write into. The artifact's file name is kept as a suffix so tools
    /// that infer the format from the extension keep working.
    pub fn staging_path(
        &self,
        job_id: &JobId,
        kind: ArtifactKind,
    ) -> Result<PathBuf, StorageError> {
        let staging = self.job_dir(job_id).join(STAGING_DIR);
        ensure_directory(&staging)?;
        Ok(staging.join(format!("{}-{}", uuid::Uuid::new_v4(), kind.file_name())))
    }

    pub fn write(
        &self,
        job_id: &JobId,
        kind: ArtifactKind,
        data: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        let staged = self.staging_path(job_id, kind)?;
        write_file(&staged, data)?;
        self.commit(&staged, &self.path_for(job_id, kind), false)
    }

    /// Commits a stage's payload to the artifact's final location.
    pub fn persist(
        &self,
        job_id: &JobId,
        kind: ArtifactKind,
        payload: ArtifactPayload,
    ) -> Result<ArtifactRef, StorageError> {
        let dest = self.path_for(job_id, kind);
        match payload {
            ArtifactPayload::Bytes(data) => self.write(job_id, kind, &data),
            ArtifactPayload::StagedFile(staged) => {
                if !staged.is_file() {
                    return Err(StorageError::StagedMissing(staged));
                }
                self.commit(&staged, &dest, false)
            }
            ArtifactPayload::StagedDir(staged) => {
                if !staged.is_dir() {
                    return Err(StorageError::StagedMissing(staged));
                }
                self.commit(&staged, &dest, true)
            }
        }
    }

    fn commit(
        &self,
        staged: &Path,
        dest: &Path,
        is_dir: bool,
    ) -> Result<ArtifactRef, StorageError> {
        if let Some(parent) = dest.parent() {
            ensure_directory(parent)?;
        }

        if is_dir {
            if dest.exists() {
                std::fs::remove_dir_all(dest).map_err(|e| StorageError::RemoveStale {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
            }
            std::fs::rename(staged, dest).map_err(|e| StorageError::MoveFile {
                from: staged.to_path_buf(),
                to: dest.to_path_buf(),
                source: e,
            })?;
        } else {
            move_file(staged, dest)?;
        }

        Ok(ArtifactRef::new(dest.to_path_buf()))
    }

    /// Writes the job's `job.json` record.
    pub fn save_record(&self, job: &Job) -> Result<PathBuf, StorageError> {
        let json = serde_json::to_vec_pretty(job)?;
        let staging = self.job_dir(job.id()).join(STAGING_DIR);
        ensure_directory(&staging)?;

        let staged = staging.join(format!("{}-{}", uuid::Uuid::new_v4(), RECORD_FILE));
        write_file(&staged, &json)?;

        let dest = self.record_path(job.id());
        move_file(&staged, &dest)?;
        Ok(dest)
    }

    pub fn load_record(&self, job_id: &JobId) -> Result<Job, StorageError> {
        read_record(&self.record_path(job_id))
    }

    /// Scans the root for job records. Unreadable records are skipped with a
    /// warning. Jobs come back in creation order.
    pub fn load_records(&self) -> Result<Vec<Job>, StorageError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut jobs: Vec<Job> = WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == RECORD_FILE)
            .filter_map(|entry| match read_record(entry.path()) {
                Ok(job) => Some(job),
                Err(e) => {
                    log::warn!("Skipping job record: {}", e);
                    None
                }
            })
            .collect();

        jobs.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(jobs)
    }

    /// Removes leftovers of interrupted writes for a job.
    pub fn clear_staging(&self, job_id: &JobId) -> Result<(), StorageError> {
        let staging = self.job_dir(job_id).join(STAGING_DIR);
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| StorageError::RemoveStale {
                path: staging.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<Job, StorageError> {
    let content = std::fs::read(path).map_err(|e| StorageError::ReadRecord {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&content).map_err(|e| StorageError::ReadRecord {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let err = |e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = std::fs::File::create(path).map_err(err)?;
    file.write_all(data).map_err(err)?;
    file.sync_all().map_err(err)?;
    Ok(())
}

pub(crate) fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
