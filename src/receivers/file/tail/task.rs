// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::receivers::file::alarm::AlarmTracker;
use crate::receivers::file::config::TrackedFile;
use crate::receivers::file::event::{AlertDispatch, MatchEvent};
use crate::receivers::file::filter::KeywordFilter;
use crate::receivers::file::input::{FileFollower, StartPosition};
use crate::receivers::file::limiter::RateLimiter;
use crate::receivers::file::persistence::FileOffset;

// Set once the handle is stopped; the low bits keep the final offset.
const STOPPED: u64 = 1 << 63;

/// Control side of a running tail task, shared with the task itself.
///
/// The offset and the stopped flag share one atomic, so a line is either
/// committed before [`TailHandle::stop`] and counted in the offset it returns,
/// or rejected and left for the next task on the path.
#[derive(Debug, Clone)]
pub struct TailHandle {
    path: PathBuf,
    app_name: String,
    cancel: CancellationToken,
    offset: Arc<AtomicU64>,
}

impl TailHandle {
    pub fn new(
        path: impl Into<PathBuf>,
        app_name: impl Into<String>,
        offset: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            app_name: app_name.into(),
            cancel,
            offset: Arc::new(AtomicU64::new(offset)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Offset just past the last line the task has consumed.
    pub fn tell(&self) -> u64 {
        self.offset.load(Ordering::Acquire) & !STOPPED
    }

    /// Record that everything before `offset` has been consumed. Returns
    /// false once the handle is stopped.
    fn commit(&self, offset: u64) -> bool {
        self.offset
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current & STOPPED == 0).then_some(offset & !STOPPED)
            })
            .is_ok()
    }

    /// Stop the task and return its final offset.
    pub fn stop(&self) -> u64 {
        let offset = self.offset.fetch_or(STOPPED, Ordering::AcqRel) & !STOPPED;
        self.cancel.cancel();
        offset
    }

    pub fn is_stopped(&self) -> bool {
        self.offset.load(Ordering::Acquire) & STOPPED != 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn file_offset(&self) -> FileOffset {
        FileOffset::new(
            self.app_name.clone(),
            self.path.to_string_lossy(),
            self.tell(),
        )
    }
}

/// Everything a tail task needs besides its own file.
pub struct TailContext {
    pub filter: Arc<dyn KeywordFilter>,
    pub limiter: Arc<RateLimiter>,
    pub alarms: Arc<AlarmTracker>,
    pub dispatcher: Arc<dyn AlertDispatch>,
    pub host_ip: String,
}

/// A queued request to start tailing one path.
#[derive(Debug, Clone)]
pub struct TailWork {
    pub handle: TailHandle,
    pub tracked: Arc<TrackedFile>,
    pub start: StartPosition,
}

pub(crate) struct TailTask {
    work: TailWork,
    ctx: Arc<TailContext>,
    poll_interval: Duration,
    max_log_size: usize,
}

impl TailTask {
    pub(crate) fn new(
        work: TailWork,
        ctx: Arc<TailContext>,
        poll_interval: Duration,
        max_log_size: usize,
    ) -> Self {
        Self {
            work,
            ctx,
            poll_interval,
            max_log_size,
        }
    }

    pub(crate) async fn run(self) {
        let handle = &self.work.handle;
        let mut follower = FileFollower::new(
            handle.path(),
            self.work.start,
            self.poll_interval,
            self.max_log_size,
        );
        info!(path = ?handle.path(), app = handle.app_name(), start = ?self.work.start, "Started tailing.");

        loop {
            select! {
                biased;

                _ = handle.cancel.cancelled() => break,

                line = follower.next_line() => match line {
                    Ok(line) => {
                        if !handle.commit(follower.offset()) {
                            break;
                        }
                        self.process(&line);
                    }
                    Err(e) => {
                        error!(path = ?handle.path(), error = %e, "Error reading file.");
                        select! {
                            _ = handle.cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.poll_interval) => {},
                        }
                    }
                },
            }
        }

        debug!(path = ?handle.path(), offset = handle.tell(), "Stopped tailing.");
    }

    fn process(&self, line: &str) {
        let tracked = &self.work.tracked;
        let ctx = &self.ctx;
        let path = self.work.handle.path();

        if let Some(keyword) = ctx.filter.find(line, &tracked.keywords) {
            if ctx.limiter.try_consume(path) {
                ctx.dispatcher.dispatch(MatchEvent {
                    app_name: tracked.app_name.clone(),
                    file_name: path.to_string_lossy().into_owned(),
                    matched_keyword: keyword.to_string(),
                    rule_name: tracked.rule_name.clone(),
                    host_ip: ctx.host_ip.clone(),
                    timestamp: SystemTime::now(),
                });
                if tracked.tracks_alarms() {
                    ctx.alarms.mark_firing(&tracked.app_name);
                }
            } else {
                warn!(path = ?path, app = %tracked.app_name, keyword, "Alert rate limited, dropping.");
            }
        }

        if tracked.tracks_alarms() && ctx.filter.find(line, &tracked.resolved_keywords).is_some() {
            ctx.alarms.mark_resolved(&tracked.app_name);
        }
    }
}
