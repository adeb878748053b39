//! Disposable on-disk copy of a synchronization plan.
//!
//! Each chunk's entries go into their own JSON file inside a uniquely named
//! directory. The directory is held under an exclusive advisory lock for the
//! life of the cache and removed when the cache is dropped. Nothing here is a
//! stable format: a new session always rebuilds its plan from the catalogs.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::planner::{ChunkInfo, ChunkPlan, RecordingSpan, SyncPlan};

const LOCK_FILE: &str = ".sync.lock";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub session_id: String,
    pub span: RecordingSpan,
    pub chunk_duration: f64,
    pub chunks: Vec<ChunkInfo>,
}

pub struct PlanCache {
    session_id: Uuid,
    dir: TempDir,
    lock: File,
}

impl PlanCache {
    /// Create an empty cache directory under `base` (system temp dir when `None`).
    pub fn create(base: Option<&Path>) -> Result<Self> {
        let session_id = Uuid::new_v4();
        let prefix = format!("longrec-sync-{}-", session_id.simple());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base).map_err(|e| SyncError::io(base, e))?;
                builder.tempdir_in(base).map_err(|e| SyncError::io(base, e))?
            }
            None => builder
                .tempdir()
                .map_err(|e| SyncError::io(&std::env::temp_dir(), e))?,
        };

        let lock_path = dir.path().join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SyncError::io(&lock_path, e))?;
        lock.try_lock_exclusive().map_err(|e| SyncError::io(&lock_path, e))?;

        tracing::debug!("sync cache at {}", dir.path().display());
        Ok(Self { session_id, dir, lock })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn chunk_path(&self, chunk_index: usize) -> PathBuf {
        self.dir.path().join(format!("chunk_{:05}.json", chunk_index))
    }

    /// Write the manifest and one file per chunk.
    pub fn store_plan(&self, plan: &SyncPlan) -> Result<()> {
        let manifest = CacheManifest {
            session_id: self.session_id.to_string(),
            span: plan.span,
            chunk_duration: plan.chunk_duration,
            chunks: plan.chunks.clone(),
        };
        write_json(&self.dir.path().join(MANIFEST_FILE), &manifest)?;

        for chunk in &plan.chunks {
            let entries: Vec<&ChunkPlan> = plan.chunk_entries(chunk.index).collect();
            write_json(&self.chunk_path(chunk.index), &entries)?;
        }
        tracing::info!(
            "cached {} chunk plan(s) in {}",
            plan.chunks.len(),
            self.dir.path().display()
        );
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<CacheManifest> {
        read_json(&self.dir.path().join(MANIFEST_FILE))
    }

    pub fn load_chunk(&self, chunk_index: usize) -> Result<Vec<ChunkPlan>> {
        read_json(&self.chunk_path(chunk_index))
    }

    /// Chunk files currently in the cache.
    pub fn chunk_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.dir.path().join("chunk_*.json");
        let pattern = pattern.to_string_lossy();
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .collect();
        files.sort();
        Ok(files)
    }
}

impl Drop for PlanCache {
    fn drop(&mut self) {
        // the TempDir field removes the directory after this
        if let Err(e) = FileExt::unlock(&self.lock) {
            tracing::debug!("unlocking sync cache: {}", e);
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| SyncError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|e| SyncError::decode(path, e))?;
    writer.flush().map_err(|e| SyncError::io(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| SyncError::decode(path, e))
}
