//! Periodic cache maintenance and the free-disk-space watchdog.
//!
//! The sweep timer first fires after a short delay, then re-arms only once
//! the previous sweep job has finished, reading the interval at that moment.
//! Each sweep runs as a job on the background queue and visits every
//! registered cache once, in registration order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use keel_ledger::{JobScheduler, JobType, RecoveryCoordinator, Sweepable};

use crate::lifecycle::Component;
use crate::metrics::NodeMetrics;
use crate::shutdown::StopSignal;
use crate::NodeError;

/// Below this many free bytes the node shuts itself down.
pub const MIN_FREE_DISK_BYTES: u64 = 512 * 1024 * 1024;

/// Reports free bytes on the filesystem holding a path.
pub type FreeSpace = Arc<dyn Fn(&Path) -> std::io::Result<u64> + Send + Sync>;

/// Free space as reported by the operating system.
pub fn fs2_free_space() -> FreeSpace {
    Arc::new(|path: &Path| fs2::available_space(path))
}

pub struct DiskWatchdog {
    path: PathBuf,
    threshold: u64,
    free_space: FreeSpace,
    stop: StopSignal,
    fired: AtomicBool,
    signals: AtomicU64,
    metrics: Arc<NodeMetrics>,
}

impl DiskWatchdog {
    pub fn new(
        path: impl Into<PathBuf>,
        threshold: u64,
        free_space: FreeSpace,
        stop: StopSignal,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            path: path.into(),
            threshold,
            free_space,
            stop,
            fired: AtomicBool::new(false),
            signals: AtomicU64::new(0),
            metrics,
        }
    }

    /// Check free space once and return the free byte count. Low space is
    /// a [`NodeError::ResourceExhaustion`] and stops the node; only the
    /// first low reading issues the stop request.
    pub fn check(&self) -> Result<u64, NodeError> {
        let free = (self.free_space)(&self.path)?;
        self.metrics
            .free_disk_bytes
            .set(i64::try_from(free).unwrap_or(i64::MAX));
        if free >= self.threshold {
            return Ok(free);
        }
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.signals.fetch_add(1, Ordering::Relaxed);
            self.stop.signal_stop("low disk space");
        }
        Err(NodeError::ResourceExhaustion(format!(
            "{free} bytes free on {}, minimum is {}",
            self.path.display(),
            self.threshold
        )))
    }

    /// The failure behind this watchdog's stop request, if it issued one.
    pub fn exhaustion(&self) -> Option<NodeError> {
        self.fired.load(Ordering::Acquire).then(|| {
            NodeError::ResourceExhaustion(format!(
                "free disk space on {} fell below {} bytes",
                self.path.display(),
                self.threshold
            ))
        })
    }

    /// Stop requests this watchdog has issued.
    pub fn signals_issued(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }
}

struct SweepState {
    caches: RwLock<Vec<Arc<dyn Sweepable>>>,
    interval_ms: AtomicU64,
    armed: Mutex<Vec<Duration>>,
    cycles: AtomicU64,
    recovery: OnceLock<RecoveryCoordinator>,
    metrics: Arc<NodeMetrics>,
}

impl SweepState {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    fn run_cycle(&self) {
        let started = Instant::now();
        let caches = self
            .caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for cache in &caches {
            cache.sweep();
        }
        if let Some(recovery) = self.recovery.get() {
            self.metrics
                .missing_node_notifications
                .set(i64::try_from(recovery.notifications()).unwrap_or(i64::MAX));
            self.metrics
                .recovery_chases
                .set(i64::try_from(recovery.chases()).unwrap_or(i64::MAX));
        }
        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let elapsed = started.elapsed();
        self.metrics.sweep_cycles.inc();
        self.metrics
            .sweep_duration_ms
            .observe(elapsed.as_secs_f64() * 1000.0);
        tracing::debug!(cycle, caches = caches.len(), elapsed_ms = elapsed.as_millis() as u64, "sweep complete");
    }
}

pub struct SweepCoordinator {
    state: Arc<SweepState>,
    scheduler: Arc<dyn JobScheduler>,
    first_delay: Duration,
    watchdog: Option<(Arc<DiskWatchdog>, Duration)>,
    cancel: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SweepCoordinator {
    pub fn new(
        scheduler: Arc<dyn JobScheduler>,
        first_delay: Duration,
        interval: Duration,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            state: Arc::new(SweepState {
                caches: RwLock::new(Vec::new()),
                interval_ms: AtomicU64::new(duration_ms(interval)),
                armed: Mutex::new(Vec::new()),
                cycles: AtomicU64::new(0),
                recovery: OnceLock::new(),
                metrics,
            }),
            scheduler,
            first_delay,
            watchdog: None,
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Report recovery counters on every sweep.
    pub fn with_recovery(self, recovery: RecoveryCoordinator) -> Self {
        if self.state.recovery.set(recovery).is_err() {
            tracing::warn!("recovery coordinator already attached to sweep");
        }
        self
    }

    /// Run `watchdog` every `interval` while started.
    pub fn with_watchdog(mut self, watchdog: Arc<DiskWatchdog>, interval: Duration) -> Self {
        self.watchdog = Some((watchdog, interval));
        self
    }

    pub fn register(&self, cache: Arc<dyn Sweepable>) {
        tracing::debug!(cache = cache.name(), "sweepable registered");
        self.state
            .caches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(cache);
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.state
            .caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Change the sweep interval. Takes effect at the next re-arm.
    pub fn set_interval(&self, interval: Duration) {
        self.state
            .interval_ms
            .store(duration_ms(interval), Ordering::Release);
        tracing::info!(interval_secs = interval.as_secs(), "sweep interval changed");
    }

    pub fn interval(&self) -> Duration {
        self.state.interval()
    }

    /// Sweep every registered cache now, on the calling thread.
    pub fn run_cycle(&self) {
        self.state.run_cycle();
    }

    pub fn cycles(&self) -> u64 {
        self.state.cycles.load(Ordering::Acquire)
    }

    /// Every delay the sweep timer has been armed with, oldest first.
    pub fn armed_delays(&self) -> Vec<Duration> {
        self.state
            .armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn watchdog(&self) -> Option<&Arc<DiskWatchdog>> {
        self.watchdog.as_ref().map(|(watchdog, _)| watchdog)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn sweep_timer(
    state: Arc<SweepState>,
    scheduler: Arc<dyn JobScheduler>,
    first_delay: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let mut delay = first_delay;
    loop {
        state
            .armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delay);
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let (done_tx, done_rx) = oneshot::channel();
        let job_state = Arc::clone(&state);
        let scheduled = scheduler.schedule(
            JobType::Sweep,
            "sweep",
            Box::new(move || {
                job_state.run_cycle();
                let _ = done_tx.send(());
            }),
        );
        if !scheduled {
            tracing::debug!("sweep not scheduled, job queue stopping");
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = done_rx => {}
        }
        delay = state.interval();
    }
    tracing::debug!("sweep timer cancelled");
}

async fn disk_timer(
    watchdog: Arc<DiskWatchdog>,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = tokio::time::sleep(interval) => match watchdog.check() {
                Ok(_) => {}
                Err(e @ NodeError::ResourceExhaustion(_)) => {
                    tracing::error!(error = %e, "fatal: remaining free disk space is below the minimum, stopping");
                }
                Err(e) => tracing::warn!(error = %e, "free space check failed"),
            }
        }
    }
    tracing::debug!("disk check timer cancelled");
}

#[async_trait]
impl Component for SweepCoordinator {
    fn name(&self) -> &str {
        "sweep_coordinator"
    }

    fn on_prepare(&self) -> Result<(), NodeError> {
        if self.state.interval().is_zero() {
            return Err(NodeError::Config("sweep interval must be positive".into()));
        }
        if let Some((_, interval)) = &self.watchdog {
            if interval.is_zero() {
                return Err(NodeError::Config(
                    "disk check interval must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    async fn on_start(&self) -> Result<(), NodeError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(tokio::spawn(sweep_timer(
            Arc::clone(&self.state),
            Arc::clone(&self.scheduler),
            self.first_delay,
            self.cancel.subscribe(),
        )));
        if let Some((watchdog, interval)) = &self.watchdog {
            tasks.push(tokio::spawn(disk_timer(
                Arc::clone(watchdog),
                *interval,
                self.cancel.subscribe(),
            )));
        }
        tracing::info!(
            first_sweep_secs = self.first_delay.as_secs(),
            interval_secs = self.interval().as_secs(),
            caches = self.cache_names().len(),
            "sweep timers armed"
        );
        Ok(())
    }

    async fn on_stop(&self) {
        self.cancel.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "sweep timer ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_nullables::{InlineScheduler, QueuedScheduler};

    struct CountingCache {
        name: &'static str,
        sweeps: AtomicU64,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Sweepable for CountingCache {
        fn name(&self) -> &str {
            self.name
        }

        fn sweep(&self) {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn metrics() -> Arc<NodeMetrics> {
        Arc::new(NodeMetrics::new().unwrap())
    }

    fn coordinator(scheduler: Arc<dyn JobScheduler>) -> SweepCoordinator {
        SweepCoordinator::new(
            scheduler,
            Duration::from_secs(10),
            Duration::from_secs(60),
            metrics(),
        )
    }

    fn counting(
        coordinator: &SweepCoordinator,
        log: &Arc<Mutex<Vec<&'static str>>>,
        names: &[&'static str],
    ) -> Vec<Arc<CountingCache>> {
        names
            .iter()
            .map(|&name| {
                let cache = Arc::new(CountingCache {
                    name,
                    sweeps: AtomicU64::new(0),
                    log: Arc::clone(log),
                });
                coordinator.register(Arc::clone(&cache) as Arc<dyn Sweepable>);
                cache
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn one_cycle_sweeps_each_cache_once_in_order() {
        let scheduler = Arc::new(InlineScheduler::new());
        let coordinator = coordinator(Arc::clone(&scheduler) as Arc<dyn JobScheduler>);
        let log = Arc::new(Mutex::new(Vec::new()));
        let caches = counting(&coordinator, &log, &["full_below", "tree_nodes", "history"]);

        coordinator.on_start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        coordinator.on_stop().await;

        assert_eq!(coordinator.cycles(), 1);
        assert!(caches.iter().all(|c| c.sweeps.load(Ordering::SeqCst) == 1));
        assert_eq!(*log.lock().unwrap(), vec!["full_below", "tree_nodes", "history"]);
        assert_eq!(
            scheduler.executed(),
            vec![(JobType::Sweep, "sweep".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_applies_at_next_rearm() {
        let coordinator = coordinator(Arc::new(InlineScheduler::new()));
        coordinator.on_start().await.unwrap();

        // First expiration uses the startup delay.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(coordinator.cycles(), 1);

        // Armed for 60 s already; the change only affects the re-arm after.
        coordinator.set_interval(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(coordinator.cycles(), 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(coordinator.cycles(), 2);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(coordinator.cycles(), 3);
        coordinator.on_stop().await;

        let armed = coordinator.armed_delays();
        assert_eq!(
            &armed[..4],
            &[
                Duration::from_secs(10),
                Duration::from_secs(60),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timer_waits_for_queued_sweep_to_finish() {
        let scheduler = Arc::new(QueuedScheduler::new());
        let coordinator = coordinator(Arc::clone(&scheduler) as Arc<dyn JobScheduler>);
        coordinator.on_start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(300)).await;
        // The job is queued but not run, so the timer is not re-armed.
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(coordinator.armed_delays().len(), 1);

        scheduler.run_all();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.cycles(), 1);
        assert_eq!(coordinator.armed_delays().len(), 2);
        coordinator.on_stop().await;
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let coordinator = SweepCoordinator::new(
            Arc::new(InlineScheduler::new()),
            Duration::from_secs(10),
            Duration::ZERO,
            metrics(),
        );
        assert!(matches!(coordinator.on_prepare(), Err(NodeError::Config(_))));
    }

    fn watchdog(free: u64, stop: &StopSignal) -> DiskWatchdog {
        DiskWatchdog::new(
            "/data",
            MIN_FREE_DISK_BYTES,
            Arc::new(move |_: &Path| -> std::io::Result<u64> { Ok(free) }),
            stop.clone(),
            metrics(),
        )
    }

    #[test]
    fn plenty_of_space_is_ok() {
        let stop = StopSignal::new();
        let watchdog = watchdog(MIN_FREE_DISK_BYTES, &stop);
        assert_eq!(watchdog.check().unwrap(), MIN_FREE_DISK_BYTES);
        assert!(watchdog.exhaustion().is_none());
        assert!(!stop.is_stopped());
    }

    #[test]
    fn low_space_stops_exactly_once() {
        let stop = StopSignal::new();
        stop.signal_stop("already stopping");
        let watchdog = watchdog(MIN_FREE_DISK_BYTES - 1, &stop);

        let err = watchdog.check().unwrap_err();
        assert!(matches!(err, NodeError::ResourceExhaustion(_)));
        assert_eq!(err.exit_code(), crate::EXIT_SETUP);
        assert!(matches!(
            watchdog.check(),
            Err(NodeError::ResourceExhaustion(_))
        ));
        assert_eq!(watchdog.signals_issued(), 1);
        assert_eq!(stop.requests(), 2);
        assert!(matches!(
            watchdog.exhaustion(),
            Some(NodeError::ResourceExhaustion(_))
        ));
    }

    #[test]
    fn unreadable_filesystem_does_not_stop() {
        let stop = StopSignal::new();
        let watchdog = DiskWatchdog::new(
            "/data",
            MIN_FREE_DISK_BYTES,
            Arc::new(|_: &Path| -> std::io::Result<u64> {
                Err(std::io::Error::other("no such device"))
            }),
            stop.clone(),
            metrics(),
        );
        assert!(matches!(watchdog.check(), Err(NodeError::Io(_))));
        assert!(watchdog.exhaustion().is_none());
        assert!(!stop.is_stopped());
    }

    #[test]
    fn fs2_reads_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        assert!(fs2_free_space()(dir.path()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn disk_timer_stops_node_on_low_space() {
        let stop = StopSignal::new();
        let coordinator = coordinator(Arc::new(InlineScheduler::new())).with_watchdog(
            Arc::new(watchdog(1024, &stop)),
            Duration::from_secs(20),
        );
        coordinator.on_start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(30), stop.wait())
            .await
            .expect("watchdog fired");
        coordinator.on_stop().await;
        assert_eq!(coordinator.watchdog().unwrap().signals_issued(), 1);
    }
}
