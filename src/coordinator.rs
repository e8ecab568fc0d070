use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::poolsync::{DeviceError, DeviceSnapshot, PoolSyncClient};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// The coordinator never polls more often than this, whatever is configured.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// A refresh attempt failed. Carries a human-readable reason only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error communicating with PoolSync API: {0}")]
pub struct UpdateFailed(pub String);

impl From<DeviceError> for UpdateFailed {
    fn from(err: DeviceError) -> Self {
        Self(err.to_string())
    }
}

impl UpdateFailed {
    fn shut_down() -> Self {
        Self("coordinator has been shut down".to_owned())
    }
}

pub type RefreshResult = Result<Arc<DeviceSnapshot>, UpdateFailed>;

/// What observers see after every refresh attempt.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Last successfully fetched snapshot. Survives later failures.
    pub snapshot: Option<Arc<DeviceSnapshot>>,
    pub last_error: Option<UpdateFailed>,
    /// Outcome of the most recent attempt.
    pub last_update_success: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl CoordinatorState {
    /// Result of the most recent attempt.
    pub fn result(&self) -> RefreshResult {
        match (&self.snapshot, &self.last_error) {
            (Some(snapshot), None) if self.last_update_success => Ok(Arc::clone(snapshot)),
            (_, Some(err)) => Err(err.clone()),
            _ => Err(UpdateFailed("no data fetched yet".to_owned())),
        }
    }

    /// Data is present but the latest attempt failed.
    pub fn is_stale(&self) -> bool {
        self.snapshot.is_some() && !self.last_update_success
    }
}

/// Owns the polling task and the latest snapshot for one hub.
///
/// Cheap to clone; clones share state. Concurrent `refresh()` calls share a
/// single in-flight fetch.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: PoolSyncClient,
    state: watch::Sender<CoordinatorState>,
    in_flight: AtomicBool,
    /// Woken when an in-flight fetch ends without publishing.
    abandoned: Notify,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag. If the fetch is abandoned (future dropped)
/// waiters are told to retry; nothing is published for an abandoned fetch.
struct InFlight<'a> {
    inner: &'a Inner,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(&mut self) {
        self.finished = true;
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.in_flight.store(false, Ordering::Release);
            self.inner.abandoned.notify_waiters();
        }
    }
}

/// Apply the 15 s floor to a configured interval.
pub fn effective_interval(configured: Duration) -> Duration {
    configured.max(MIN_REFRESH_INTERVAL)
}

impl RefreshCoordinator {
    pub fn new(client: PoolSyncClient) -> Self {
        let (state, _) = watch::channel(CoordinatorState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                state,
                in_flight: AtomicBool::new(false),
                abandoned: Notify::new(),
                closed: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn client(&self) -> &PoolSyncClient {
        &self.inner.client
    }

    /// Copy of the current state. Snapshots are shared, not cloned.
    pub fn state(&self) -> CoordinatorState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified after every refresh attempt.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    pub fn is_available(&self) -> bool {
        self.inner.state.borrow().last_update_success
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run the first refresh inline, then poll every `interval` (at least
    /// [`MIN_REFRESH_INTERVAL`]) on a background task.
    ///
    /// Returns the first refresh result; a failure does not stop polling.
    pub async fn start(&self, interval: Duration) -> RefreshResult {
        let period = effective_interval(interval);
        if period != interval {
            warn!(
                configured_secs = interval.as_secs(),
                effective_secs = period.as_secs(),
                "Poll interval raised to minimum"
            );
        }

        let first = self.refresh().await;
        match &first {
            Ok(_) => info!("Initial PoolSync refresh succeeded"),
            Err(e) => warn!(error = %e, "Initial PoolSync refresh failed; will keep polling"),
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "PoolSync polling loop started");
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = this.refresh().await {
                    error!(error = %e, "Periodic PoolSync refresh failed");
                }
            }
        });

        if let Some(previous) = self.inner.task.lock().await.replace(handle) {
            previous.abort();
        }

        first
    }

    /// Fetch a new snapshot, or join the fetch already in flight.
    ///
    /// Every completed attempt notifies subscribers. On failure the previous
    /// snapshot stays in place. If the caller doing the fetch is dropped,
    /// nothing is published and the waiters start a fetch of their own.
    pub async fn refresh(&self) -> RefreshResult {
        loop {
            if self.is_closed() {
                return Err(UpdateFailed::shut_down());
            }

            // Register for both wake-ups before testing the flag so the
            // leader's outcome can't be missed.
            let mut rx = self.inner.state.subscribe();
            let abandoned = self.inner.abandoned.notified();
            tokio::pin!(abandoned);
            abandoned.as_mut().enable();

            if self
                .inner
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("Refresh already in flight; waiting for its result");
                tokio::select! {
                    woke = rx.changed() => {
                        if woke.is_err() || self.is_closed() {
                            return Err(UpdateFailed::shut_down());
                        }
                        let result = rx.borrow_and_update().result();
                        return result;
                    }
                    _ = &mut abandoned => {
                        debug!("In-flight refresh was abandoned; retrying");
                        continue;
                    }
                }
            }

            let mut guard = InFlight { inner: &self.inner, finished: false };
            let outcome = self.inner.client.fetch_all().await;

            if self.is_closed() {
                debug!("Discarding refresh result received after shutdown");
                drop(guard);
                return Err(UpdateFailed::shut_down());
            }

            guard.finish();
            return self.publish(outcome);
        }
    }

    /// Out-of-band refresh, e.g. after a write. Failures are logged only.
    pub async fn request_refresh(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Requested PoolSync refresh failed");
        }
    }

    /// Stop polling. An in-flight fetch is abandoned and nothing is published
    /// afterwards.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(handle) = self.inner.task.lock().await.take() {
            handle.abort();
        }
        info!("PoolSync refresh coordinator stopped");
    }

    fn publish(&self, outcome: Result<DeviceSnapshot, DeviceError>) -> RefreshResult {
        let now = Utc::now();
        let mut result = Err(UpdateFailed::shut_down());

        self.inner.state.send_modify(|state| {
            state.last_attempt_at = Some(now);
            match outcome {
                Ok(snapshot) => {
                    state.snapshot = Some(Arc::new(snapshot));
                    state.last_error = None;
                    state.last_update_success = true;
                    state.last_success_at = Some(now);
                    debug!("PoolSync snapshot updated");
                }
                Err(e) => {
                    let failed = UpdateFailed::from(e);
                    warn!(
                        error = %failed,
                        keeping_previous = state.snapshot.is_some(),
                        "PoolSync refresh failed"
                    );
                    state.last_error = Some(failed);
                    state.last_update_success = false;
                }
            }
            result = state.result();
        });

        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
