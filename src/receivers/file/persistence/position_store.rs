// SPDX-License-Identifier: Apache-2.0

//! Durable application → read position map.
//!
//! Memory is the source of truth while running. [`PositionStore::checkpoint`]
//! folds the live task offsets into it and rewrites the whole file through a
//! temp file and rename, so a crash mid-write leaves the previous snapshot.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info};

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::persistence::schema::{self, FileOffset, PositionMap};

#[derive(Debug)]
pub struct PositionStore {
    path: PathBuf,
    positions: Mutex<PositionMap>,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            positions: Mutex::new(PositionMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, PositionMap> {
        self.positions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the position file and merge it into memory, returning the result.
    ///
    /// A missing file is created empty. Failing to read or parse the file is
    /// an error on the first run; afterwards it is logged and the in-memory
    /// snapshot is returned unchanged.
    pub fn load(&self, first_run: bool) -> Result<PositionMap> {
        match self.read_file() {
            Ok(on_disk) => {
                let mut positions = self.lock();
                for (app, mut entry) in on_disk {
                    if entry.app_name.is_empty() {
                        entry.app_name = app;
                    }
                    schema::merge(&mut positions, entry);
                }
                debug!(path = ?self.path, entries = positions.len(), "Loaded positions.");
                Ok(positions.clone())
            }
            Err(e) if first_run => Err(e),
            Err(e) => {
                error!(path = ?self.path, error = %e, "Unable to load position file, using in-memory positions.");
                Ok(self.snapshot())
            }
        }
    }

    fn read_file(&self) -> Result<PositionMap> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                create_parent(&self.path)?;
                File::create(&self.path).map_err(|e| {
                    Error::Persistence(format!(
                        "failed to create position file {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                info!(path = ?self.path, "Created empty position file.");
                return Ok(PositionMap::new());
            }
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to open position file {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(PositionMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            Error::Persistence(format!(
                "failed to parse position file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Update one application's record in memory without touching disk.
    pub fn hot_save(&self, offset: FileOffset) {
        let mut positions = self.lock();
        if schema::merge(&mut positions, offset) {
            debug!("Hot-saved position.");
        }
    }

    /// Merge `offsets` into memory and overwrite the position file.
    pub fn checkpoint(&self, offsets: impl IntoIterator<Item = FileOffset>) -> Result<()> {
        let mut positions = self.lock();
        for offset in offsets {
            schema::merge(&mut positions, offset);
        }
        atomic_write(&self.path, &positions)?;
        debug!(path = ?self.path, entries = positions.len(), "Checkpointed positions.");
        Ok(())
    }

    pub fn get(&self, app_name: &str) -> Option<FileOffset> {
        self.lock().get(app_name).cloned()
    }

    pub fn snapshot(&self) -> PositionMap {
        self.lock().clone()
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!(
                    "failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

fn atomic_write(path: &Path, positions: &PositionMap) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    create_parent(path)?;

    let unique_id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, positions)
        .map_err(|e| Error::Persistence(format!("failed to write positions: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush positions: {}", e)))?;
    drop(writer);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Persistence(format!(
            "failed to replace position file: {}",
            e
        )));
    }
    Ok(())
}
