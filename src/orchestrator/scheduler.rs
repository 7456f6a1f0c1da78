use super::invocation::{CleanupSummary, Invocation, InvocationSummary, InvokeError, Role, TickOutcome, Trigger};
use crate::cleanup::TmpSweeper;
use crate::exporter::{ExportError, ExportOutput, Exporter};
use crate::leader::LeadershipEvent;
use crate::server::metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for an in-flight timer invocation to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Time between timer ticks.
    pub period: Duration,
    /// Start a timer invocation as soon as leadership is gained.
    pub run_on_leadership_gained: bool,
    /// Also sweep after a failed invocation.
    pub cleanup_on_failure: bool,
}

struct ElectionView {
    role: Role,
    current_leader: Option<String>,
}

/// Serializes export invocations coming from the timer and from callers.
///
/// At most one invocation runs at a time. Timer ticks only start one while
/// this process is leader; on-demand calls run regardless of leadership and
/// fail with `Busy` instead of waiting.
pub struct ExportOrchestrator {
    exporter: Arc<dyn Exporter>,
    sweeper: Option<TmpSweeper>,
    settings: OrchestratorSettings,
    identity: String,
    election: RwLock<ElectionView>,
    token: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
    last_invocation: Mutex<Option<InvocationSummary>>,
    leader_observer: Option<watch::Receiver<Option<String>>>,
    shutdown: CancellationToken,
}

impl ExportOrchestrator {
    pub fn new(
        exporter: Arc<dyn Exporter>,
        sweeper: Option<TmpSweeper>,
        settings: OrchestratorSettings,
        identity: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            exporter,
            sweeper,
            settings,
            identity: identity.into(),
            election: RwLock::new(ElectionView {
                role: Role::Follower,
                current_leader: None,
            }),
            token: tokio::sync::Mutex::new(()),
            in_flight: AtomicBool::new(false),
            last_invocation: Mutex::new(None),
            leader_observer: None,
            shutdown,
        }
    }

    /// Report the lease holder seen by the elector instead of only the one
    /// carried by transitions. Followers learn the leader this way.
    pub fn with_leader_observer(mut self, observer: watch::Receiver<Option<String>>) -> Self {
        self.leader_observer = Some(observer);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.election
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .role
    }

    /// Current lease holder, as far as this process knows.
    pub fn current_leader(&self) -> Option<String> {
        if let Some(observer) = &self.leader_observer {
            return observer.borrow().clone();
        }
        self.election
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .current_leader
            .clone()
    }

    /// Whether an invocation is running. Does not touch the token.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_invocation(&self) -> Option<InvocationSummary> {
        self.last_invocation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn on_leadership_gained(&self) {
        let mut view = self.election.write().unwrap_or_else(|e| e.into_inner());
        view.role = Role::Leader;
        view.current_leader = Some(self.identity.clone());
        metrics::set_is_leader(true);
        info!("Became leader, scheduled exports enabled");
    }

    pub fn on_leadership_lost(&self, new_leader: Option<String>) {
        let mut view = self.election.write().unwrap_or_else(|e| e.into_inner());
        view.role = Role::Follower;
        match &new_leader {
            Some(leader) => info!("Lost leadership, {} is leader now", leader),
            None => info!("Lost leadership"),
        }
        view.current_leader = new_leader;
        metrics::set_is_leader(false);
    }

    /// Start a timer invocation if leader and idle. Never waits.
    pub async fn on_timer_tick(&self) -> TickOutcome {
        if self.role() != Role::Leader {
            debug!("Tick skipped: not leader");
            metrics::record_skipped_tick("follower");
            return TickOutcome::SkippedNotLeader;
        }

        let _guard = match self.token.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Tick skipped: export already in progress");
                metrics::record_skipped_tick("busy");
                return TickOutcome::SkippedBusy;
            }
        };

        TickOutcome::Ran(self.execute(Trigger::Timer).await)
    }

    /// Run one invocation now and return its outcome.
    ///
    /// The invocation runs on its own task, so dropping the returned future
    /// (a client hanging up) does not abort the export or lose its outcome.
    pub async fn on_demand_invoke(self: &Arc<Self>) -> Result<ExportOutput, InvokeError> {
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.invoke_now().await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(InvokeError::Export(ExportError::Cancelled)),
        }
    }

    async fn invoke_now(&self) -> Result<ExportOutput, InvokeError> {
        let _guard = match self.token.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("On-demand export rejected: export already in progress");
                metrics::record_busy_rejection();
                return Err(InvokeError::Busy);
            }
        };

        let invocation = self.execute(Trigger::OnDemand).await;
        invocation.outcome.map_err(InvokeError::Export)
    }

    /// Runs with the exclusivity token held by the caller.
    async fn execute(&self, trigger: Trigger) -> Invocation {
        let _running = InFlight::enter(&self.in_flight);
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        info!("Starting {} export: {}", trigger, self.exporter.target());

        let outcome = tokio::select! {
            result = self.exporter.export() => result,
            _ = self.shutdown.cancelled() => Err(ExportError::Cancelled),
        };
        let duration = start.elapsed();

        match &outcome {
            Ok(output) => {
                info!(
                    "Export ({}) succeeded in {:?}: {} file(s), message: {}",
                    trigger,
                    duration,
                    output.exported_files.len(),
                    output.response.message
                );
                for file in &output.exported_files {
                    debug!("Exported file: {}", file);
                }
                metrics::record_exported_files(output.exported_files.len());
            }
            Err(ExportError::Cancelled) => {
                warn!("Export ({}) cancelled after {:?}", trigger, duration);
            }
            Err(e) => {
                error!("Export ({}) failed after {:?}: {}", trigger, duration, e);
            }
        }

        let cleanup = self.cleanup_after(&outcome).await;

        let invocation = Invocation {
            trigger,
            started_at,
            duration,
            outcome,
            cleanup,
        };
        metrics::record_invocation(trigger.as_str(), invocation.status_label(), duration);

        *self
            .last_invocation
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(invocation.summary());

        invocation
    }

    async fn cleanup_after(
        &self,
        outcome: &Result<ExportOutput, ExportError>,
    ) -> Option<CleanupSummary> {
        let sweeper = self.sweeper.clone()?;
        match outcome {
            Ok(_) => {}
            Err(ExportError::Cancelled) => return None,
            Err(_) if !self.settings.cleanup_on_failure => return None,
            Err(_) => {}
        }

        let result = tokio::task::spawn_blocking(move || sweeper.sweep()).await;
        let summary = match result {
            Ok(Ok(report)) => {
                for failure in &report.failures {
                    warn!("Cleanup: {}", failure);
                }
                info!(
                    "Cleanup removed {} director{} ({} failure(s))",
                    report.removed.len(),
                    if report.removed.len() == 1 { "y" } else { "ies" },
                    report.failures.len()
                );
                CleanupSummary::from(&report)
            }
            Ok(Err(e)) => {
                error!("Cleanup failed: {}", e);
                CleanupSummary {
                    removed: 0,
                    failures: vec![e.to_string()],
                }
            }
            Err(e) => {
                error!("Cleanup task failed: {}", e);
                CleanupSummary {
                    removed: 0,
                    failures: vec![format!("cleanup task panic: {}", e)],
                }
            }
        };
        metrics::record_cleanup(summary.removed, summary.failures.len());
        Some(summary)
    }

    /// Drive the timer and react to leadership events until shutdown.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LeadershipEvent>) {
        info!(
            "Starting export orchestrator (period {:?}, identity {})",
            self.settings.period, self.identity
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.period,
            self.settings.period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut running: Option<JoinHandle<()>> = None;
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Orchestrator received shutdown signal");
                    break;
                }
                event = events.recv(), if events_open => match event {
                    Some(LeadershipEvent::Gained) => {
                        self.on_leadership_gained();
                        ticker.reset();
                        if self.settings.run_on_leadership_gained {
                            track_in_flight(&mut running, self.spawn_tick());
                        }
                    }
                    Some(LeadershipEvent::Lost { new_leader }) => {
                        self.on_leadership_lost(new_leader);
                    }
                    None => {
                        debug!("Leadership event channel closed");
                        events_open = false;
                        if self.role() == Role::Leader {
                            self.on_leadership_lost(None);
                        }
                    }
                },
                _ = ticker.tick() => {
                    track_in_flight(&mut running, self.spawn_tick());
                }
            }
        }

        if let Some(handle) = running {
            if !handle.is_finished() {
                info!("Waiting for in-flight export to stop");
                if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                    warn!("In-flight export did not stop within {:?}", SHUTDOWN_GRACE);
                }
            }
        }

        info!("Export orchestrator stopped");
    }

    fn spawn_tick(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.on_timer_tick().await;
        })
    }
}

/// Marks an invocation as running for as long as it is alive.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        metrics::set_invocation_running(true);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        metrics::set_invocation_running(false);
    }
}

/// Keep the handle of the invocation shutdown has to wait for. A tick
/// spawned while another is still running ends up skipped.
fn track_in_flight(running: &mut Option<JoinHandle<()>>, handle: JoinHandle<()>) {
    if running.as_ref().map_or(true, |h| h.is_finished()) {
        *running = Some(handle);
    }
}
