// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of tail tasks.
//!
//! Each reload rescans the tracked patterns, diffs the result against the
//! live path set and then stops, starts or refreshes tasks. A stopped task
//! leaves its offset behind as a dying offset so a task started later for the
//! same path resumes where it stopped.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{self, BoundedSender};
use crate::receivers::file::config::{TailConfig, TrackedFile};
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{DirectoryScanner, StartAt, StartPosition};
use crate::receivers::file::persistence::{FileOffset, PositionMap, PositionStore};
use crate::receivers::file::reconcile::{LivePaths, Reconciliation, reconcile};
use crate::receivers::file::tail::supervisor::TailSupervisor;
use crate::receivers::file::tail::task::{TailContext, TailHandle, TailWork};
use crate::store::{ExpiringStore, KeyedStore};

pub struct TailManager {
    tracked: HashMap<String, Arc<TrackedFile>>,
    scanner: DirectoryScanner,
    positions: Arc<PositionStore>,
    tasks: KeyedStore<TailHandle>,
    app_names: ExpiringStore<String>,
    dying: ExpiringStore<u64>,
    live: LivePaths,
    work_tx: BoundedSender<TailWork>,
    start_at: StartAt,
    expiry_ttl: Duration,
    cancel: CancellationToken,
    first_run: bool,
}

impl TailManager {
    /// Build the manager and the supervisor that runs its tasks. Every task
    /// token is a child of `cancel`.
    pub fn new(
        config: &TailConfig,
        positions: Arc<PositionStore>,
        dying: ExpiringStore<u64>,
        app_names: ExpiringStore<String>,
        ctx: Arc<TailContext>,
        cancel: CancellationToken,
    ) -> (Self, TailSupervisor) {
        let (work_tx, work_rx) = bounded_channel::bounded(config.work_queue_size);
        let scanner = DirectoryScanner::new(
            config.tracked.clone(),
            config.freshness_window,
            app_names.clone(),
            config.expiry_ttl,
        );
        let tracked = config
            .tracked
            .iter()
            .map(|t| (t.app_name.clone(), Arc::new(t.clone())))
            .collect();

        let manager = Self {
            tracked,
            scanner,
            positions,
            tasks: KeyedStore::new(),
            app_names,
            dying,
            live: LivePaths::default(),
            work_tx,
            start_at: config.start_at,
            expiry_ttl: config.expiry_ttl,
            cancel,
            first_run: true,
        };
        let supervisor =
            TailSupervisor::new(work_rx, ctx, config.poll_interval, config.max_log_size);
        (manager, supervisor)
    }

    /// Populate the live path set from a scan, ahead of the first reload.
    pub fn seed(&self) -> usize {
        let paths: HashSet<_> = self.scanner.scan().into_iter().map(|f| f.path).collect();
        let count = paths.len();
        self.live.set(paths);
        count
    }

    pub fn live_paths(&self) -> HashSet<PathBuf> {
        self.live.get()
    }

    pub fn tasks(&self) -> &KeyedStore<TailHandle> {
        &self.tasks
    }

    /// Current offset of every live task.
    pub fn offsets(&self) -> Vec<FileOffset> {
        self.tasks
            .values()
            .iter()
            .map(TailHandle::file_offset)
            .collect()
    }

    pub async fn reload(&mut self) -> Result<Reconciliation> {
        let first_run = self.first_run;
        let positions = self.positions.load(first_run)?;

        let scanned = self.scanner.scan();
        let current: HashSet<PathBuf> = scanned.iter().map(|f| f.path.clone()).collect();
        let owners: HashMap<PathBuf, String> =
            scanned.into_iter().map(|f| (f.path, f.app_name)).collect();

        let diff = reconcile(&self.live.get(), &current, first_run);
        self.live.set(diff.live());

        for path in &diff.old {
            self.stop_task(path);
        }
        for path in &diff.new {
            self.start_or_log(path, &owners, &positions).await?;
        }
        for path in &diff.same {
            if first_run {
                self.start_or_log(path, &owners, &positions).await?;
            } else {
                self.refresh_task(path);
            }
        }

        self.first_run = false;
        info!(
            first_run,
            new = diff.new.len(),
            same = diff.same.len(),
            old = diff.old.len(),
            "Reloaded tail tasks."
        );
        Ok(diff)
    }

    async fn start_or_log(
        &self,
        path: &Path,
        owners: &HashMap<PathBuf, String>,
        positions: &PositionMap,
    ) -> Result<()> {
        let key = path.to_string_lossy();
        let Some(app_name) = owners
            .get(path)
            .cloned()
            .or_else(|| self.app_names.get(&key))
        else {
            error!(path = ?path, "No application recorded for path, not tailing.");
            return Ok(());
        };

        match self.start_task(path, &app_name, positions).await {
            Err(Error::ChannelSend) => Err(Error::ChannelSend),
            Err(e) => {
                error!(path = ?path, app = %app_name, error = %e, "Unable to start tail task.");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub(crate) async fn start_task(
        &self,
        path: &Path,
        app_name: &str,
        positions: &PositionMap,
    ) -> Result<()> {
        let tracked = self
            .tracked
            .get(app_name)
            .cloned()
            .ok_or_else(|| Error::UnknownApp(app_name.to_string()))?;

        let key = path.to_string_lossy();
        if self.tasks.contains(&key) {
            return Err(Error::AlreadyTailing(path.to_path_buf()));
        }

        let start = match self.resolve_start(path, app_name, positions) {
            // Pin the end now so the handle never reports 0 for a file it skipped.
            StartPosition::End => match std::fs::metadata(path) {
                Ok(metadata) => StartPosition::Offset(metadata.len()),
                Err(_) => StartPosition::End,
            },
            start => start,
        };
        let offset = match start {
            StartPosition::Offset(offset) => offset,
            _ => 0,
        };
        let handle = TailHandle::new(path, app_name, offset, self.cancel.child_token());
        self.positions.hot_save(handle.file_offset());
        self.tasks.set(key.clone(), handle.clone());

        let work = TailWork {
            handle,
            tracked,
            start,
        };
        if self.work_tx.send(work).await.is_err() {
            self.tasks.get_and_remove(&key);
            return Err(Error::ChannelSend);
        }
        debug!(path = ?path, app = app_name, start = ?start, "Queued tail task.");
        Ok(())
    }

    /// Pick where a new task for `path` begins: the larger of the app's
    /// persisted offset for this same file and the offset a previous task for
    /// the path died at.
    pub(crate) fn resolve_start(
        &self,
        path: &Path,
        app_name: &str,
        positions: &PositionMap,
    ) -> StartPosition {
        let key = path.to_string_lossy();
        let persisted = positions
            .get(app_name)
            .filter(|p| p.file_name == key)
            .map(|p| p.offset);
        let dying = self.dying.get_and_remove(&key);

        match persisted.max(dying) {
            Some(offset) => StartPosition::Offset(offset),
            None => match self.start_at {
                StartAt::Beginning => StartPosition::Beginning,
                StartAt::End => StartPosition::End,
            },
        }
    }

    pub(crate) fn stop_task(&self, path: &Path) {
        let key = path.to_string_lossy();
        let Some(handle) = self.tasks.get_and_remove(&key) else {
            warn!(path = ?path, "No live tail task to stop.");
            return;
        };

        let offset = handle.stop();
        self.dying
            .set_with_expiry(key.into_owned(), offset, self.expiry_ttl);
        self.positions.hot_save(handle.file_offset());
        info!(path = ?path, app = handle.app_name(), offset, "Stopped tail task.");
    }

    fn refresh_task(&self, path: &Path) {
        match self.tasks.get(&path.to_string_lossy()) {
            Some(handle) => self.positions.hot_save(handle.file_offset()),
            None => warn!(path = ?path, "Live path has no tail task."),
        }
    }

    /// Stop every task and return the offsets they stopped at.
    pub fn stop_all(&self) -> Vec<FileOffset> {
        self.tasks
            .drain()
            .into_iter()
            .map(|(_, handle)| {
                handle.stop();
                handle.file_offset()
            })
            .collect()
    }
}
