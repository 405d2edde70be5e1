//! Scheduler lifecycle.
//!
//! [`SchedulerController`] owns the background tick loop: `start` spawns
//! it, `stop` signals it and waits for the current tick to finish. Every
//! tick refreshes a [`Heartbeat`] in the store and, when configured, in a
//! JSON file that other processes can read with [`HeartbeatFile::read`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use agora_events::{Heartbeat, RunState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{EngineError, StoreError};
use crate::store::Store;

/// Heartbeat persisted as a standalone JSON file.
#[derive(Debug, Clone)]
pub struct HeartbeatFile {
    path: PathBuf,
}

impl HeartbeatFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file atomically.
    pub fn write(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(heartbeat)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// `None` when no scheduler has written the file yet.
    pub fn read(&self) -> Result<Option<Heartbeat>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
struct HeartbeatSink {
    store: Arc<dyn Store>,
    file: Option<HeartbeatFile>,
}

impl HeartbeatSink {
    fn publish(&self, heartbeat: &Heartbeat) {
        if let Err(e) = self.store.write_heartbeat(heartbeat) {
            tracing::warn!("failed to store heartbeat: {}", e);
        }
        if let Some(file) = &self.file {
            if let Err(e) = file.write(heartbeat) {
                tracing::warn!("failed to write heartbeat {}: {}", file.path().display(), e);
            }
        }
    }
}

struct RunHandle {
    run_id: Uuid,
    stop: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    task: JoinHandle<u64>,
}

pub struct SchedulerController {
    engine: Arc<Engine>,
    heartbeat_file: Option<HeartbeatFile>,
    run: Mutex<Option<RunHandle>>,
}

impl SchedulerController {
    pub fn new(engine: Arc<Engine>) -> Self {
        let heartbeat_file = engine
            .config()
            .telemetry
            .heartbeat_path
            .as_ref()
            .map(HeartbeatFile::new);
        Self {
            engine,
            heartbeat_file,
            run: Mutex::new(None),
        }
    }

    pub fn with_heartbeat_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.heartbeat_file = Some(HeartbeatFile::new(path));
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn handle(&self) -> Result<std::sync::MutexGuard<'_, Option<RunHandle>>, EngineError> {
        self.run
            .lock()
            .map_err(|_| EngineError::Store(StoreError::Poisoned))
    }

    /// Spawns the tick loop. The first tick runs immediately, then one per
    /// interval; `max_ticks` ends the loop on its own.
    pub fn start(&self, max_ticks: Option<u64>) -> Result<Uuid, EngineError> {
        let mut run = self.handle()?;
        if run.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Err(EngineError::AlreadyRunning);
        }

        let run_id = Uuid::new_v4();
        let interval_secs = self.engine.config().scheduler.interval_secs;
        let heartbeat = Heartbeat::started(run_id, interval_secs, self.engine.clock().real_now());
        let sink = HeartbeatSink {
            store: self.engine.store().clone(),
            file: self.heartbeat_file.clone(),
        };
        sink.publish(&heartbeat);

        let (stop, stopped) = watch::channel(false);
        let (finished, done) = watch::channel(false);
        let task = tokio::spawn(tick_loop(
            self.engine.clone(),
            sink,
            heartbeat,
            LoopSignals { stopped, finished },
            max_ticks,
        ));
        tracing::info!("scheduler {} started, interval {}s", run_id, interval_secs);
        *run = Some(RunHandle {
            run_id,
            stop,
            done,
            task,
        });
        Ok(run_id)
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .map(|run| run.as_ref().is_some_and(|r| !r.task.is_finished()))
            .unwrap_or(false)
    }

    /// Signals the loop and waits for the tick in flight. Returns the
    /// number of ticks the run completed.
    pub async fn stop(&self) -> Result<u64, EngineError> {
        let run = self.handle()?.take().ok_or(EngineError::NotRunning)?;
        // the loop may already have exited on max_ticks
        let _ = run.stop.send(true);
        Ok(join(run).await)
    }

    /// Waits for a run started with `max_ticks` to end on its own.
    /// Dropping the future leaves the run untouched.
    pub async fn wait(&self) -> Result<u64, EngineError> {
        let mut done = match self.handle()?.as_ref() {
            Some(run) => run.done.clone(),
            None => return Err(EngineError::NotRunning),
        };
        // a closed channel means the loop task is gone
        let _ = done.wait_for(|finished| *finished).await;
        let run = self.handle()?.take().ok_or(EngineError::NotRunning)?;
        Ok(join(run).await)
    }

    /// The heartbeat file when configured, else the store's copy.
    pub fn status(&self) -> Result<Option<Heartbeat>, EngineError> {
        let heartbeat = match &self.heartbeat_file {
            Some(file) => file.read()?,
            None => self.engine.store().read_heartbeat()?,
        };
        Ok(heartbeat)
    }
}

async fn join(run: RunHandle) -> u64 {
    match run.task.await {
        Ok(ticks) => {
            tracing::info!("scheduler {} stopped after {} ticks", run.run_id, ticks);
            ticks
        }
        Err(e) => {
            tracing::error!("scheduler {} loop failed: {}", run.run_id, e);
            0
        }
    }
}

struct LoopSignals {
    stopped: watch::Receiver<bool>,
    finished: watch::Sender<bool>,
}

async fn tick_loop(
    engine: Arc<Engine>,
    sink: HeartbeatSink,
    mut heartbeat: Heartbeat,
    signals: LoopSignals,
    max_ticks: Option<u64>,
) -> u64 {
    let LoopSignals {
        mut stopped,
        finished,
    } = signals;
    let mut ticker = tokio::time::interval(engine.config().scheduler.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        tokio::select! {
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let record = engine.run_tick().await;
                ticks += 1;
                heartbeat.last_tick_id = Some(record.tick_id);
                heartbeat.last_tick_at = Some(record.real_timestamp);
                heartbeat.updated_at = engine.clock().real_now();
                sink.publish(&heartbeat);
            }
        }
    }

    heartbeat.state = RunState::Stopped;
    heartbeat.updated_at = engine.clock().real_now();
    sink.publish(&heartbeat);
    finished.send_replace(true);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::config::AgoraConfig;
    use crate::perception::StaticFeed;
    use agora_events::fixtures;
    use chrono::{TimeZone, Utc};

    fn engine() -> Arc<Engine> {
        let mut config = AgoraConfig::default();
        config.scheduler.interval_secs = 10.0;
        config.population.size = 2;
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let engine = Engine::builder(config)
            .time_source(Arc::new(ManualTimeSource::new(start)))
            .feed(Arc::new(StaticFeed::new(fixtures::sample_feed())))
            .build()
            .unwrap();
        engine.seed_population().unwrap();
        Arc::new(engine)
    }

    #[test]
    fn test_heartbeat_file_missing_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = HeartbeatFile::new(dir.path().join("hb.json"));
        assert_eq!(file.read().unwrap(), None);
    }

    #[test]
    fn test_heartbeat_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = HeartbeatFile::new(dir.path().join("hb.json"));
        let hb = Heartbeat::started(Uuid::new_v4(), 30.0, Utc::now());
        file.write(&hb).unwrap();
        assert_eq!(file.read().unwrap(), Some(hb));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_max_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            SchedulerController::new(engine()).with_heartbeat_file(dir.path().join("hb.json"));

        let run_id = controller.start(Some(3)).unwrap();
        assert_eq!(controller.wait().await.unwrap(), 3);

        let hb = controller.status().unwrap().unwrap();
        assert_eq!(hb.run_id, run_id);
        assert_eq!(hb.state, RunState::Stopped);
        assert_eq!(hb.last_tick_id, Some(3));
        assert_eq!(controller.engine().recent_ticks(10).unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let controller = SchedulerController::new(engine());
        controller.start(None).unwrap();
        assert!(controller.is_running());
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(matches!(controller.start(None), Err(EngineError::AlreadyRunning)));

        let ticks = controller.stop().await.unwrap();
        assert_eq!(ticks, 1);
        assert!(!controller.is_running());
        let hb = controller.status().unwrap().unwrap();
        assert_eq!(hb.state, RunState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let controller = SchedulerController::new(engine());
        assert!(matches!(controller.stop().await, Err(EngineError::NotRunning)));
        assert_eq!(controller.status().unwrap(), None);
    }
}
