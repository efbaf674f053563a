// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::receivers::file::tail::task::{TailContext, TailTask, TailWork};

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumes queued start requests and owns the spawned tail tasks.
pub struct TailSupervisor {
    work_rx: BoundedReceiver<TailWork>,
    ctx: Arc<TailContext>,
    poll_interval: Duration,
    max_log_size: usize,
}

impl TailSupervisor {
    pub(crate) fn new(
        work_rx: BoundedReceiver<TailWork>,
        ctx: Arc<TailContext>,
        poll_interval: Duration,
        max_log_size: usize,
    ) -> Self {
        Self {
            work_rx,
            ctx,
            poll_interval,
            max_log_size,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BoxError> {
        let mut tasks = JoinSet::new();

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                work = self.work_rx.next() => match work {
                    Some(work) => {
                        if work.handle.is_cancelled() {
                            debug!(path = ?work.handle.path(), "Tail task stopped before it started.");
                            continue;
                        }
                        let task = TailTask::new(work, self.ctx.clone(), self.poll_interval, self.max_log_size);
                        tasks.spawn(task.run());
                    }
                    None => break,
                },

                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!(error = ?e, "Tail task failed.");
                    }
                },
            }
        }

        info!(running = tasks.len(), "Stopping tail supervisor.");
        let drain = async { while tasks.join_next().await.is_some() {} };
        if timeout(TASK_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("Timed out waiting for tail tasks to stop, aborting.");
            tasks.abort_all();
        }
        Ok(())
    }
}
