// File: agent/src/monitors/framework.rs
//
// Abstract periodic sampler contract. A monitor declares name(),
// default_interval_seconds(), and run_cycle(); the framework supplies
// scheduling, lifecycle, overlap prevention, and a bounded-wait subprocess
// helper every platform probe goes through. Modeled on the reference
// workspace's HealthMonitor worker loop, generalized from one fixed check-all
// cadence to one independently-cadenced worker per monitor.
use crate::csv_store::{CSVStream, MonitorRecord};
use crate::errors::CsvError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Created,
    Running,
    Stopping,
    Stopped,
}

#[async_trait]
pub trait Monitor: Send + Sync + 'static {
    type Record: MonitorRecord;

    fn name(&self) -> &'static str;
    fn default_interval_seconds(&self) -> u64;

    /// Runs one sampling cycle. `Ok(None)` means "no data this cycle" (e.g. a
    /// missing platform binary or a timed-out probe), not an error.
    async fn run_cycle(&self) -> anyhow::Result<Option<Self::Record>>;

    /// Periodic hook, default once per 24h, where the monitor may prune
    /// internal caches. Most monitors accept the default no-op.
    async fn on_cleanup(&self) {}

    fn cleanup_interval_seconds(&self) -> u64 {
        24 * 3600
    }

    /// Tail length and on-disk retention for this monitor's `CSVStream`.
    /// High-frequency monitors override these upward.
    fn csv_tail_len(&self) -> usize {
        200
    }

    fn csv_retention_days(&self) -> i64 {
        30
    }
}

/// Owns one monitor's worker task, lifecycle state, last-result cache, and the
/// `CSVStream` every cycle's record is appended to.
pub struct MonitorWorker<M: Monitor> {
    monitor: Arc<M>,
    csv: CSVStream<M::Record>,
    state: Mutex<MonitorState>,
    last_result: Mutex<Option<M::Record>>,
    shutdown: watch::Sender<bool>,
    cycles_run: AtomicU64,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<M: Monitor> MonitorWorker<M> {
    pub fn new(monitor: M, data_dir: &Path) -> Result<Arc<Self>, CsvError> {
        let (tx, _rx) = watch::channel(false);
        let path = data_dir.join(format!("{}.csv", monitor.name()));
        let csv = CSVStream::open(&path, monitor.csv_tail_len(), monitor.csv_retention_days())?;
        Ok(Arc::new(Self {
            monitor: Arc::new(monitor),
            csv,
            state: Mutex::new(MonitorState::Created),
            last_result: Mutex::new(None),
            shutdown: tx,
            cycles_run: AtomicU64::new(0),
            handle: Mutex::new(None),
        }))
    }

    /// Full in-memory tail of persisted records, newest last.
    pub async fn csv_tail(&self) -> Vec<M::Record> {
        self.csv.tail().await
    }

    /// Scans the on-disk log for records within `since..=until`.
    pub async fn csv_query(&self, since: chrono::DateTime<chrono::Utc>, until: chrono::DateTime<chrono::Utc>) -> Result<Vec<M::Record>, CsvError> {
        self.csv.query(since, until).await
    }

    pub fn name(&self) -> &'static str {
        self.monitor.name()
    }

    pub async fn state(&self) -> MonitorState {
        *self.state.lock().await
    }

    pub async fn last_result(&self) -> Option<M::Record> {
        self.last_result.lock().await.clone()
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    /// Spawns the worker loop if not already running. The embedder's
    /// `interval_override`, if given, always wins over the monitor's own
    /// `default_interval_seconds()`.
    pub async fn start(self: &Arc<Self>, interval_override: Option<Duration>) {
        let mut state = self.state.lock().await;
        if *state == MonitorState::Running {
            return;
        }
        *state = MonitorState::Running;
        drop(state);

        let interval = interval_override.unwrap_or_else(|| Duration::from_secs(self.monitor.default_interval_seconds()));
        let worker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_cleanup = tokio::time::Instant::now();
            let cleanup_interval = Duration::from_secs(worker.monitor.cleanup_interval_seconds());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        worker.run_one_cycle().await;
                        if last_cleanup.elapsed() >= cleanup_interval {
                            worker.monitor.on_cleanup().await;
                            if let Err(e) = worker.csv.prune_now().await {
                                warn!(monitor = worker.name(), error = %e, "csv retention prune failed");
                            }
                            last_cleanup = tokio::time::Instant::now();
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_ok() && *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            let mut state = worker.state.lock().await;
            *state = MonitorState::Stopped;
        });

        *self.handle.lock().await = Some(handle);
    }

    async fn run_one_cycle(self: &Arc<Self>) {
        match self.monitor.run_cycle().await {
            Ok(Some(record)) => {
                self.cycles_run.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.csv.append(&record).await {
                    error!(monitor = self.name(), error = %e, "failed to persist monitor record to csv");
                }
                *self.last_result.lock().await = Some(record);
                debug!(monitor = self.name(), "cycle produced a record");
            }
            Ok(None) => {
                self.cycles_run.fetch_add(1, Ordering::Relaxed);
                debug!(monitor = self.name(), "cycle produced no data");
            }
            Err(e) => {
                if is_transient(&e) {
                    debug!(monitor = self.name(), error = %e, "transient error in cycle");
                } else {
                    error!(monitor = self.name(), error = %e, "contract violation in cycle");
                }
            }
        }
    }

    /// Requests cancellation and waits up to `wait` for the worker to join.
    pub async fn stop(self: &Arc<Self>, wait: Duration) {
        {
            let mut state = self.state.lock().await;
            if *state != MonitorState::Running {
                return;
            }
            *state = MonitorState::Stopping;
        }
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(wait, handle).await.is_err() {
                warn!(monitor = self.name(), "worker did not stop within the bounded wait");
            }
        }
        *self.state.lock().await = MonitorState::Stopped;
    }
}

fn is_transient(e: &anyhow::Error) -> bool {
    let text = e.to_string().to_lowercase();
    text.contains("timeout") || text.contains("connection") || text.contains("unreachable")
}

/// Runs `cmd` with a hard deadline, returning `None` on timeout instead of
/// blocking the worker indefinitely. Used by every monitor that shells out to
/// a platform probe binary.
pub async fn bounded_command(mut cmd: tokio::process::Command, deadline: Duration) -> Option<std::process::Output> {
    match tokio::time::timeout(deadline, cmd.output()).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!(error = %e, "platform probe command failed to spawn");
            None
        }
        Err(_) => {
            warn!(deadline_s = deadline.as_secs(), "platform probe command timed out");
            None
        }
    }
}

/// Tracks whether an external binary is known to be present, probed once and
/// cached rather than retried every cycle.
pub struct BinaryPresence {
    known: Mutex<Option<bool>>,
    binary: &'static str,
}

impl BinaryPresence {
    pub fn new(binary: &'static str) -> Self {
        Self {
            known: Mutex::new(None),
            binary,
        }
    }

    pub async fn is_present(&self) -> bool {
        let mut known = self.known.lock().await;
        if let Some(v) = *known {
            return v;
        }
        let present = tokio::process::Command::new("which")
            .arg(self.binary)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !present {
            warn!(binary = self.binary, "platform binary not found; monitor will emit no-data records");
        } else {
            info!(binary = self.binary, "platform binary located");
        }
        *known = Some(present);
        present
    }
}
