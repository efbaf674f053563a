// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::crypto::init_crypto_provider;
use crate::exporters::prometheus::{BackgroundDispatcher, RemoteWriteExporter};
use crate::init::config::AgentConfig;
use crate::init::misc::instance_label;
use crate::init::wait;
use crate::receivers::file::{
    AlarmTracker, AlertDispatch, FileOffset, MatchEvent, PositionStore, RateLimiter,
    SubstringFilter, TailContext, TailManager, TrackedFile,
};
use crate::store::ExpiringStore;

pub struct Agent {
    config: AgentConfig,
    shutdown_timeout: Duration,
    checkpoint_rx: Option<BoundedReceiver<()>>,
}

impl Agent {
    pub fn new(config: AgentConfig, shutdown_timeout: Duration) -> Self {
        Self {
            config,
            shutdown_timeout,
            checkpoint_rx: None,
        }
    }

    /// Each message received forces an immediate checkpoint.
    pub fn with_checkpoint_requests(mut self, rx: BoundedReceiver<()>) -> Self {
        self.checkpoint_rx = Some(rx);
        self
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        info!("Starting keyword exporter.");

        init_crypto_provider()?;

        let instance = instance_label(self.config.instance.as_deref())?;
        let exporter = RemoteWriteExporter::from_config(self.config.remote_write_config()?)?;
        let dispatcher = Arc::new(BackgroundDispatcher::new(Arc::new(exporter)));

        self.run_with(agent_cancel, instance, dispatcher).await
    }

    /// Run with an explicit `instance` label and alert sink.
    pub async fn run_with(
        self,
        agent_cancel: CancellationToken,
        instance: String,
        dispatcher: Arc<dyn AlertDispatch>,
    ) -> Result<(), BoxError> {
        let tail_config = self.config.tail_config();
        info!(
            instance = %instance,
            apps = tail_config.tracked.len(),
            position_file = ?tail_config.position_file,
            "Configured keyword exporter."
        );

        let positions = Arc::new(PositionStore::new(&tail_config.position_file));
        let (refill, burst) = self.config.rate_limit();
        let limiter = Arc::new(RateLimiter::new(refill, burst));
        let alarms = Arc::new(AlarmTracker::new(
            tail_config.tracked.iter().map(|t| t.app_name.as_str()),
        ));
        let app_names = ExpiringStore::new();
        let dying = ExpiringStore::new();

        let ctx = Arc::new(TailContext {
            filter: Arc::new(SubstringFilter),
            limiter: limiter.clone(),
            alarms: alarms.clone(),
            dispatcher: dispatcher.clone(),
            host_ip: instance.clone(),
        });

        let tails_cancel = CancellationToken::new();
        let (mut manager, supervisor) = TailManager::new(
            &tail_config,
            positions.clone(),
            dying.clone(),
            app_names.clone(),
            ctx,
            tails_cancel.clone(),
        );

        let mut task_set = JoinSet::new();
        task_set.spawn(supervisor.run(tails_cancel.clone()));

        let seeded = manager.seed();
        debug!(files = seeded, "Seeded live file set.");
        if let Err(e) = manager.reload().await {
            tails_cancel.cancel();
            let _ = wait::wait_for_tasks_with_timeout(&mut task_set, self.shutdown_timeout).await;
            return Err(format!("failed initial reload: {}", e).into());
        }

        let resender = Resender {
            tracked: tail_config
                .tracked
                .iter()
                .map(|t| (t.app_name.clone(), t.clone()))
                .collect(),
            positions: positions.clone(),
            alarms,
            dispatcher,
            instance,
        };

        let schedule = self.config.schedule();
        let mut checkpoint_timer = ticker(schedule.checkpoint);
        let mut rescan_timer = ticker(schedule.rescan);
        let mut sweep_timer = ticker(schedule.sweep);
        let mut resend_timer = ticker(schedule.resend);
        let mut checkpoint_rx = self.checkpoint_rx;

        let mut result = Ok(());
        loop {
            select! {
                biased;

                _ = agent_cancel.cancelled() => {
                    info!("Shutdown requested, stopping.");
                    break;
                },

                e = wait::wait_for_any_task(&mut task_set) => {
                    match e {
                        Ok(()) => warn!("Unexpected early exit of tail supervisor."),
                        Err(e) => result = Err(e),
                    }
                    break;
                },

                _ = checkpoint_timer.tick() => checkpoint(&positions, manager.offsets()),

                Some(()) = next_request(&mut checkpoint_rx) => {
                    info!("Checkpoint requested.");
                    checkpoint(&positions, manager.offsets());
                },

                _ = rescan_timer.tick() => {
                    if let Err(e) = manager.reload().await {
                        error!(error = %e, "Failed to reload tail tasks.");
                    }
                },

                _ = sweep_timer.tick() => {
                    let expired = app_names.expire_sweep() + dying.expire_sweep();
                    limiter.retain_live(&manager.live_paths());
                    debug!(expired, "Swept expiring stores.");
                },

                _ = resend_timer.tick() => resender.resend_firing(),
            }
        }

        checkpoint(&positions, manager.stop_all());
        tails_cancel.cancel();

        let drained = wait::wait_for_tasks_with_timeout(&mut task_set, self.shutdown_timeout).await;
        info!("Keyword exporter stopped.");
        result.and(drained)
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_request(rx: &mut Option<BoundedReceiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.next().await,
        None => std::future::pending().await,
    }
}

fn checkpoint(positions: &PositionStore, offsets: Vec<FileOffset>) {
    let count = offsets.len();
    match positions.checkpoint(offsets) {
        Ok(()) => debug!(files = count, "Checkpointed offsets."),
        Err(e) => error!(error = %e, "Failed to checkpoint offsets."),
    }
}

/// Re-emits a sample for every application whose alarm is still firing.
struct Resender {
    tracked: HashMap<String, TrackedFile>,
    positions: Arc<PositionStore>,
    alarms: Arc<AlarmTracker>,
    dispatcher: Arc<dyn AlertDispatch>,
    instance: String,
}

impl Resender {
    fn resend_firing(&self) {
        self.alarms.for_each_firing(|app| {
            let Some(tracked) = self.tracked.get(app) else {
                warn!(app, "Firing alarm for unknown application.");
                return;
            };
            let file_name = self
                .positions
                .get(app)
                .map(|p| p.file_name)
                .unwrap_or_default();

            debug!(app, file = %file_name, "Re-sending firing alarm.");
            self.dispatcher.dispatch(MatchEvent {
                app_name: app.to_string(),
                file_name,
                matched_keyword: tracked.keywords.join(","),
                rule_name: tracked.rule_name.clone(),
                host_ip: self.instance.clone(),
                timestamp: SystemTime::now(),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::init::config::TrackedFileEntry;
    use crate::receivers::file::persistence::PositionMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<MatchEvent>>,
    }

    impl AlertDispatch for Recorder {
        fn dispatch(&self, event: MatchEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    fn config(dir: &TempDir) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.log_file.position_file = dir.path().join("state/position.json");
        config.log_file.poll_interval_ms = 10;
        config.log_file.list.push(TrackedFileEntry {
            app_name: "api".to_string(),
            keywords: vec!["ERROR".to_string(), "FATAL".to_string()],
            resolved_keywords: vec!["RECOVERED".to_string()],
            file_path: format!("{}/api*.log", dir.path().display()),
            rule_name: "api-errors".to_string(),
        });
        config.remote_write.resend_interval_secs = 1;
        config
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn read_positions(dir: &TempDir) -> PositionMap {
        let raw = fs::read_to_string(dir.path().join("state/position.json")).unwrap_or_default();
        if raw.trim().is_empty() {
            return PositionMap::new();
        }
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn checkpoints_on_request_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("api.log");
        fs::write(&log, "boot\nERROR failed to bind\n").unwrap();

        let recorder = Arc::new(Recorder::default());
        let (checkpoint_tx, checkpoint_rx) = bounded(1);
        let cancel = CancellationToken::new();
        let agent = Agent::new(config(&dir), Duration::from_secs(5))
            .with_checkpoint_requests(checkpoint_rx);
        let run = tokio::spawn(agent.run_with(
            cancel.clone(),
            "10.0.0.7".to_string(),
            recorder.clone(),
        ));

        let r = recorder.clone();
        wait_until(|| r.count() >= 1).await;

        let len = fs::metadata(&log).unwrap().len();
        let mut checkpointed = false;
        for _ in 0..100 {
            checkpoint_tx.send(()).await.unwrap();
            sleep(Duration::from_millis(20)).await;
            if read_positions(&dir).get("api").map(|p| p.offset) == Some(len) {
                checkpointed = true;
                break;
            }
        }
        assert!(checkpointed, "forced checkpoint never recorded the offset");

        fs::OpenOptions::new()
            .append(true)
            .open(&log)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"more\n"))
            .unwrap();
        sleep(Duration::from_millis(200)).await;

        cancel.cancel();
        run.await.unwrap().unwrap();

        let positions = read_positions(&dir);
        assert_eq!(len + 5, positions["api"].offset);
        assert_eq!(log.to_string_lossy(), positions["api"].file_name);
    }

    #[tokio::test]
    async fn resends_firing_alarms() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("api.log"), "FATAL out of memory\n").unwrap();

        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let agent = Agent::new(config(&dir), Duration::from_secs(5));
        let run = tokio::spawn(agent.run_with(
            cancel.clone(),
            "10.0.0.7".to_string(),
            recorder.clone(),
        ));

        let r = recorder.clone();
        wait_until(|| r.count() >= 2).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        let events = recorder.events.lock().unwrap();
        assert_eq!("FATAL", events[0].matched_keyword);
        let resent = &events[1];
        assert_eq!("ERROR,FATAL", resent.matched_keyword);
        assert_eq!("api-errors", resent.rule_name);
        assert!(resent.file_name.ends_with("api.log"));
    }

    #[tokio::test]
    async fn corrupt_position_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("state")).unwrap();
        fs::write(dir.path().join("state/position.json"), "][").unwrap();

        let agent = Agent::new(config(&dir), Duration::from_secs(1));
        let res = agent
            .run_with(
                CancellationToken::new(),
                "10.0.0.7".to_string(),
                Arc::new(Recorder::default()),
            )
            .await;
        assert!(res.is_err());
    }
}
