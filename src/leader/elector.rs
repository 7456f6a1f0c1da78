use super::store::LeaseStore;
use crate::server::metrics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound of the random extra wait added to each acquisition retry,
/// as a fraction of `retry_period`.
const JITTER_FACTOR: f64 = 1.2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElectionError {
    #[error("lease name must not be empty")]
    EmptyName,
    #[error("lease identity must not be empty")]
    EmptyIdentity,
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("lease duration ({lease:?}) must be greater than renew deadline ({deadline:?})")]
    DurationNotAboveDeadline { lease: Duration, deadline: Duration },
    #[error("renew deadline ({deadline:?}) must be greater than 1.2 * retry period ({retry:?})")]
    DeadlineNotAboveRetry { deadline: Duration, retry: Duration },
}

/// Timing and naming of the election.
#[derive(Debug, Clone)]
pub struct ElectorSettings {
    pub lease_name: String,
    pub identity: String,
    /// How long a granted or renewed lease stays valid.
    pub lease_duration: Duration,
    /// How long the leader keeps retrying a failed renewal before giving up.
    pub renew_deadline: Duration,
    /// Wait between attempts.
    pub retry_period: Duration,
}

impl ElectorSettings {
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.lease_name.is_empty() {
            return Err(ElectionError::EmptyName);
        }
        if self.identity.is_empty() {
            return Err(ElectionError::EmptyIdentity);
        }
        for (label, value) in [
            ("lease duration", self.lease_duration),
            ("renew deadline", self.renew_deadline),
            ("retry period", self.retry_period),
        ] {
            if value.is_zero() {
                return Err(ElectionError::NonPositive(label));
            }
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ElectionError::DurationNotAboveDeadline {
                lease: self.lease_duration,
                deadline: self.renew_deadline,
            });
        }
        if self.renew_deadline.as_secs_f64() <= self.retry_period.as_secs_f64() * JITTER_FACTOR {
            return Err(ElectionError::DeadlineNotAboveRetry {
                deadline: self.renew_deadline,
                retry: self.retry_period,
            });
        }
        Ok(())
    }
}

/// Leadership transition as observed by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipEvent {
    Gained,
    Lost { new_leader: Option<String> },
}

enum RenewEnd {
    Lost,
    Shutdown,
}

/// Result of one acquire-or-renew round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Held,
    /// Another identity holds a live lease.
    Rejected,
    /// The store could not be reached.
    Failed,
}

/// Campaigns for a lease and reports transitions over a channel.
///
/// Events strictly alternate, starting with `Gained`. Store errors count
/// as failed attempts.
pub struct LeaderElector {
    store: Arc<dyn LeaseStore>,
    settings: ElectorSettings,
    events: mpsc::UnboundedSender<LeadershipEvent>,
    observed: watch::Sender<Option<String>>,
}

impl LeaderElector {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        settings: ElectorSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LeadershipEvent>), ElectionError> {
        settings.validate()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let (observed, _) = watch::channel(None);
        Ok((
            Self {
                store,
                settings,
                events,
                observed,
            },
            receiver,
        ))
    }

    pub fn identity(&self) -> &str {
        &self.settings.identity
    }

    /// Subscribe to the last observed lease holder.
    pub fn observe(&self) -> watch::Receiver<Option<String>> {
        self.observed.subscribe()
    }

    /// Run until `shutdown` is cancelled. A held lease is released on exit.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting leader election for lease \"{}\" as {}",
            self.settings.lease_name, self.settings.identity
        );

        loop {
            if !self.acquire(&shutdown).await {
                break;
            }

            info!("Acquired lease \"{}\"", self.settings.lease_name);
            metrics::record_leadership_transition("gained");
            self.emit(LeadershipEvent::Gained);

            match self.renew(&shutdown).await {
                RenewEnd::Lost => {
                    warn!("Lost lease \"{}\"", self.settings.lease_name);
                    metrics::record_leadership_transition("lost");
                    let new_leader = self.observed.borrow().clone();
                    self.emit(LeadershipEvent::Lost { new_leader });
                }
                RenewEnd::Shutdown => {
                    self.release().await;
                    metrics::record_leadership_transition("lost");
                    self.emit(LeadershipEvent::Lost { new_leader: None });
                    break;
                }
            }
        }

        info!("Leader election stopped");
    }

    fn emit(&self, event: LeadershipEvent) {
        if self.events.send(event).is_err() {
            debug!("Leadership event dropped, no subscriber");
        }
    }

    /// Retry until the lease is ours. Returns false on shutdown.
    async fn acquire(&self, shutdown: &CancellationToken) -> bool {
        loop {
            if self.attempt().await == Attempt::Held {
                return true;
            }
            let wait = jittered(self.settings.retry_period);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => return false,
            }
        }
    }

    async fn renew(&self, shutdown: &CancellationToken) -> RenewEnd {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.retry_period) => {}
                _ = shutdown.cancelled() => return RenewEnd::Shutdown,
            }

            let deadline = Instant::now() + self.settings.renew_deadline;
            loop {
                match tokio::time::timeout_at(deadline, self.attempt()).await {
                    Ok(Attempt::Held) => break,
                    Ok(Attempt::Rejected) => return RenewEnd::Lost,
                    Ok(Attempt::Failed) if Instant::now() < deadline => {}
                    _ => return RenewEnd::Lost,
                }
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline.min(Instant::now() + self.settings.retry_period)) => {}
                    _ = shutdown.cancelled() => return RenewEnd::Shutdown,
                }
            }
        }
    }

    /// One acquire-or-renew round trip. Also refreshes the observed holder.
    async fn attempt(&self) -> Attempt {
        let store = Arc::clone(&self.store);
        let name = self.settings.lease_name.clone();
        let identity = self.settings.identity.clone();
        let ttl = self.settings.lease_duration;

        let result = tokio::task::spawn_blocking(move || {
            let acquired = store.try_acquire_or_renew(&name, &identity, ttl)?;
            let holder = store
                .get(&name)?
                .map(|r| r.holder)
                .filter(|h| !h.is_empty());
            anyhow::Ok((acquired, holder))
        })
        .await;

        match result {
            Ok(Ok((acquired, holder))) => {
                self.observe_holder(holder);
                if acquired {
                    Attempt::Held
                } else {
                    Attempt::Rejected
                }
            }
            Ok(Err(e)) => {
                warn!("Lease attempt failed: {:#}", e);
                Attempt::Failed
            }
            Err(e) => {
                warn!("Lease attempt task failed: {}", e);
                Attempt::Failed
            }
        }
    }

    fn observe_holder(&self, holder: Option<String>) {
        self.observed.send_if_modified(|current| {
            if *current == holder {
                return false;
            }
            if let Some(h) = &holder {
                info!("{} is leader now", h);
            }
            *current = holder;
            true
        });
    }

    async fn release(&self) {
        let store = Arc::clone(&self.store);
        let name = self.settings.lease_name.clone();
        let identity = self.settings.identity.clone();
        match tokio::task::spawn_blocking(move || store.release(&name, &identity)).await {
            Ok(Ok(true)) => info!("Released lease \"{}\"", self.settings.lease_name),
            Ok(Ok(false)) => debug!("Lease was no longer held at release"),
            Ok(Err(e)) => warn!("Failed to release lease: {:#}", e),
            Err(e) => warn!("Lease release task failed: {}", e),
        }
    }
}

fn jittered(period: Duration) -> Duration {
    period + period.mul_f64(rand::random::<f64>() * JITTER_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::InMemoryLeaseStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn settings(identity: &str) -> ElectorSettings {
        ElectorSettings {
            lease_name: "export".to_string(),
            identity: identity.to_string(),
            lease_duration: Duration::from_millis(300),
            renew_deadline: Duration::from_millis(200),
            retry_period: Duration::from_millis(50),
        }
    }

    /// Delegates to an in-memory store until switched into failure mode.
    struct FlakyStore {
        inner: InMemoryLeaseStore,
        failing: AtomicBool,
        taken_by: std::sync::Mutex<Option<String>>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryLeaseStore::new(),
                failing: AtomicBool::new(false),
                taken_by: std::sync::Mutex::new(None),
            }
        }

        fn taken_by(&self) -> Option<String> {
            self.taken_by.lock().unwrap().clone()
        }
    }

    impl LeaseStore for FlakyStore {
        fn ensure_schema(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn try_acquire_or_renew(&self, name: &str, id: &str, ttl: Duration) -> anyhow::Result<bool> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("store unavailable");
            }
            if let Some(holder) = self.taken_by() {
                return Ok(holder == id);
            }
            self.inner.try_acquire_or_renew(name, id, ttl)
        }
        fn get(&self, name: &str) -> anyhow::Result<Option<crate::leader::LeaseRecord>> {
            let record = self.inner.get(name)?;
            Ok(match self.taken_by() {
                Some(holder) => record.map(|mut r| {
                    r.holder = holder;
                    r
                }),
                None => record,
            })
        }
        fn release(&self, name: &str, id: &str) -> anyhow::Result<bool> {
            self.inner.release(name, id)
        }
    }

    #[test]
    fn validation_rejects_inverted_timings() {
        let mut s = settings("a");
        s.renew_deadline = s.lease_duration;
        assert!(matches!(
            s.validate(),
            Err(ElectionError::DurationNotAboveDeadline { .. })
        ));

        let mut s = settings("a");
        s.retry_period = Duration::from_millis(180);
        assert!(matches!(
            s.validate(),
            Err(ElectionError::DeadlineNotAboveRetry { .. })
        ));

        let mut s = settings("");
        assert_eq!(s.validate(), Err(ElectionError::EmptyIdentity));
        s.identity = "a".to_string();
        s.retry_period = Duration::ZERO;
        assert_eq!(s.validate(), Err(ElectionError::NonPositive("retry period")));
    }

    #[test]
    fn default_timings_are_valid() {
        let s = ElectorSettings {
            lease_name: "export".to_string(),
            identity: "a".to_string(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        };
        assert!(s.validate().is_ok());
    }

    #[tokio::test]
    async fn single_candidate_gains_and_releases_on_shutdown() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let (elector, mut events) = LeaderElector::new(Arc::clone(&store), settings("a")).unwrap();
        let observed = elector.observe();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(elector.run(shutdown.clone()));

        assert_eq!(events.recv().await, Some(LeadershipEvent::Gained));
        assert_eq!(observed.borrow().as_deref(), Some("a"));

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(LeadershipEvent::Lost { new_leader: None })
        );
        assert_eq!(store.get("export").unwrap().unwrap().holder, "");
    }

    #[tokio::test]
    async fn second_candidate_takes_over_after_release() {
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let (first, mut first_events) =
            LeaderElector::new(Arc::clone(&store), settings("a")).unwrap();
        let (second, mut second_events) =
            LeaderElector::new(Arc::clone(&store), settings("b")).unwrap();
        let first_shutdown = CancellationToken::new();
        let second_shutdown = CancellationToken::new();

        let first_task = tokio::spawn(first.run(first_shutdown.clone()));
        assert_eq!(first_events.recv().await, Some(LeadershipEvent::Gained));

        let second_observed = second.observe();
        let second_task = tokio::spawn(second.run(second_shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(second_events.try_recv().is_err());
        assert_eq!(second_observed.borrow().as_deref(), Some("a"));

        first_shutdown.cancel();
        first_task.await.unwrap();

        let gained = tokio::time::timeout(Duration::from_secs(2), second_events.recv())
            .await
            .unwrap();
        assert_eq!(gained, Some(LeadershipEvent::Gained));

        second_shutdown.cancel();
        second_task.await.unwrap();
    }

    #[tokio::test]
    async fn renewal_failure_past_deadline_loses_leadership() {
        let store = Arc::new(FlakyStore::new());
        let dyn_store: Arc<dyn LeaseStore> = store.clone();
        let (elector, mut events) = LeaderElector::new(dyn_store, settings("a")).unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(elector.run(shutdown.clone()));

        assert_eq!(events.recv().await, Some(LeadershipEvent::Gained));
        store.failing.store(true, Ordering::SeqCst);

        let lost = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(
            lost,
            Some(LeadershipEvent::Lost {
                new_leader: Some("a".to_string())
            })
        );

        store.failing.store(false, Ordering::SeqCst);
        let regained = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(regained, Some(LeadershipEvent::Gained));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn lease_taken_by_another_identity_is_lost_without_waiting_for_deadline() {
        let store = Arc::new(FlakyStore::new());
        let dyn_store: Arc<dyn LeaseStore> = store.clone();
        let (elector, mut events) = LeaderElector::new(dyn_store, settings("a")).unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(elector.run(shutdown.clone()));

        assert_eq!(events.recv().await, Some(LeadershipEvent::Gained));
        *store.taken_by.lock().unwrap() = Some("b".to_string());

        // One retry period is 50ms; the renew deadline alone would take 200ms.
        let lost = tokio::time::timeout(Duration::from_millis(150), events.recv())
            .await
            .expect("leadership not dropped on the first rejected renewal");
        assert_eq!(
            lost,
            Some(LeadershipEvent::Lost {
                new_leader: Some("b".to_string())
            })
        );

        shutdown.cancel();
        task.await.unwrap();
    }
}
