//! Serialized, interval-driven status polling.
//!
//! A [`Poller`] spawns one task per tracked set. The task fetches a snapshot,
//! applies it, and only then decides whether to schedule the next fetch, so
//! two fetches for the same set never overlap and snapshots are applied in
//! request order. The returned [`PollHandle`] publishes the current belief on
//! a `watch` channel and stops the task on [`PollHandle::stop`] or drop.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where a polling cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// A status request is in flight.
    Fetching,
    /// Something is pending; the next fetch is scheduled.
    Waiting,
    /// Nothing is pending; no fetch until [`PollHandle::restart`].
    Idle,
    /// Stopped by the owner.
    Stopped,
    /// The backend rejected the session.
    Unauthenticated,
    /// The maximum wait elapsed with work still pending.
    Expired,
}

impl PollPhase {
    /// True once the cycle will never fetch again.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            PollPhase::Stopped | PollPhase::Unauthenticated | PollPhase::Expired
        )
    }
}

/// The caller's view of a tracked set.
#[derive(Debug, Clone)]
pub struct PollView<S> {
    /// Latest applied snapshot, `None` until the first successful fetch.
    pub snapshot: Option<S>,
    pub phase: PollPhase,
    /// Completed fetch attempts, successful or not.
    pub fetches: u64,
    /// Consecutive failed fetches since the last success.
    pub failures: u64,
}

impl<S> PollView<S> {
    fn initial() -> Self {
        Self {
            snapshot: None,
            phase: PollPhase::Waiting,
            fetches: 0,
            failures: 0,
        }
    }
}

/// Polling policy: interval, per-request timeout and optional overall limit.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    request_timeout: Duration,
    max_wait: Option<Duration>,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_wait: None,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts a cycle that replaces the view with every new snapshot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S, F, Fut, P>(&self, fetcher: F, has_pending: P) -> PollHandle<S>
    where
        S: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, ClientError>> + Send + 'static,
        P: Fn(&S) -> bool + Send + 'static,
    {
        self.start_reconciling(fetcher, has_pending, |_, next| next)
    }

    /// Like [`start`](Self::start), but folds each new snapshot into the
    /// previous one with `reconcile` before it is published.
    pub fn start_reconciling<S, F, Fut, P, R>(
        &self,
        fetcher: F,
        has_pending: P,
        reconcile: R,
    ) -> PollHandle<S>
    where
        S: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, ClientError>> + Send + 'static,
        P: Fn(&S) -> bool + Send + 'static,
        R: FnMut(Option<&S>, S) -> S + Send + 'static,
    {
        let (tx, rx) = watch::channel(PollView::initial());
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            tx,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        });
        let cycle = Cycle {
            shared: Arc::clone(&shared),
            fetcher,
            has_pending,
            reconcile,
            policy: *self,
        };
        let task = tokio::spawn(cycle.run());
        PollHandle { shared, rx, task }
    }
}

struct Shared<S> {
    // Guards every publish; once set, nothing more is published.
    stopped: Mutex<bool>,
    tx: watch::Sender<PollView<S>>,
    wake: Notify,
    cancel: CancellationToken,
}

impl<S> Shared<S> {
    /// Publishes `update` unless the cycle is stopped. Returns false if it was.
    fn publish(&self, update: impl FnOnce(&mut PollView<S>)) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            return false;
        }
        self.tx.send_modify(update);
        true
    }

    fn finish(&self, phase: PollPhase) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            return;
        }
        *stopped = true;
        self.cancel.cancel();
        self.tx.send_modify(|view| view.phase = phase);
    }
}

struct Cycle<S, F, P, R> {
    shared: Arc<Shared<S>>,
    fetcher: F,
    has_pending: P,
    reconcile: R,
    policy: Poller,
}

impl<S, F, Fut, P, R> Cycle<S, F, P, R>
where
    S: Clone + Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, ClientError>> + Send + 'static,
    P: Fn(&S) -> bool + Send + 'static,
    R: FnMut(Option<&S>, S) -> S + Send + 'static,
{
    async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        let deadline = self.policy.max_wait.map(|d| Instant::now() + d);
        let mut next_at = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = sleep_until(next_at) => {}
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!("polling gave up after maximum wait");
                self.shared.finish(PollPhase::Expired);
                return;
            }

            if !self.shared.publish(|view| view.phase = PollPhase::Fetching) {
                return;
            }

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = timeout(self.policy.request_timeout, (self.fetcher)()) => result,
            };

            let pending = match result {
                Ok(Ok(snapshot)) => {
                    let reconcile = &mut self.reconcile;
                    let has_pending = &self.has_pending;
                    let mut pending = false;
                    let applied = self.shared.publish(|view| {
                        let next = reconcile(view.snapshot.as_ref(), snapshot);
                        pending = has_pending(&next);
                        view.snapshot = Some(next);
                        view.fetches += 1;
                        view.failures = 0;
                        view.phase = if pending {
                            PollPhase::Waiting
                        } else {
                            PollPhase::Idle
                        };
                    });
                    if !applied {
                        return;
                    }
                    debug!(pending, "applied snapshot");
                    pending
                }
                Ok(Err(err)) if err.is_unauthenticated() => {
                    warn!("status fetch rejected the session, stopping");
                    self.shared.finish(PollPhase::Unauthenticated);
                    return;
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "status fetch failed, keeping previous snapshot");
                    if !self.shared.publish(record_failure) {
                        return;
                    }
                    true
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.policy.request_timeout.as_millis() as u64,
                        "status fetch timed out, keeping previous snapshot"
                    );
                    if !self.shared.publish(record_failure) {
                        return;
                    }
                    true
                }
            };

            // The interval is measured from the start of the previous fetch.
            let floor = started + self.policy.interval;
            if pending {
                next_at = floor;
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = self.shared.wake.notified() => {}
            }
            debug!("polling restarted");
            next_at = floor.max(Instant::now());
        }
    }
}

fn record_failure<S>(view: &mut PollView<S>) {
    view.fetches += 1;
    view.failures += 1;
    view.phase = PollPhase::Waiting;
}

/// Owner's handle on a running cycle. Dropping it stops the cycle.
pub struct PollHandle<S> {
    shared: Arc<Shared<S>>,
    rx: watch::Receiver<PollView<S>>,
    task: JoinHandle<()>,
}

impl<S: Clone> PollHandle<S> {
    pub fn view(&self) -> PollView<S> {
        self.rx.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<S> {
        self.rx.borrow().snapshot.clone()
    }

    pub fn phase(&self) -> PollPhase {
        self.rx.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<PollView<S>> {
        self.rx.clone()
    }

    /// Waits until nothing is pending or the cycle has finished.
    pub async fn settled(&self) -> PollView<S> {
        let mut rx = self.rx.clone();
        let view = match rx
            .wait_for(|v| v.phase == PollPhase::Idle || v.phase.is_finished())
            .await
        {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        };
        view
    }
}

impl<S> PollHandle<S> {
    /// Wakes an idle cycle, e.g. after a new submission. The fetch still
    /// respects the interval floor.
    pub fn restart(&self) {
        self.shared.wake.notify_one();
    }

    /// Stops the cycle. Once this returns, no further snapshot is published,
    /// including one from a fetch that is already in flight.
    pub fn stop(&self) {
        self.shared.finish(PollPhase::Stopped);
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().phase.is_finished()
    }
}

impl<S> Drop for PollHandle<S> {
    fn drop(&mut self) {
        self.shared.finish(PollPhase::Stopped);
        self.task.abort();
    }
}
