//! Throttled push of session snapshots to observers.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};

use crate::models::SessionSnapshot;
use crate::store::SessionStore;

/// how many emissions a slow observer may fall behind before skipping
const CHANNEL_CAPACITY: usize = 64;

/// event pushed to observers, `{"event": ..., "data": ...}` on the wire
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ProgressEvent {
    Log(String),
    Progresses(Vec<SessionSnapshot>),
}

/// Rate-limited dispatcher for session snapshots.
///
/// The first `notify` in a quiet period emits right away. Further notifies
/// within `interval` of an emission are folded into a single trailing one.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    tx: broadcast::Sender<ProgressEvent>,
    interval: Duration,
    wake: Arc<Notify>,
    pending: AtomicBool,
    emissions: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Broadcaster {
    /// Spawns the dispatch loop on the current tokio runtime.
    pub fn new(store: Arc<dyn SessionStore>, interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(Inner {
            store,
            tx,
            interval,
            wake: wake.clone(),
            pending: AtomicBool::new(false),
            emissions: AtomicU64::new(0),
            shutdown,
        });
        tokio::spawn(run(Arc::downgrade(&inner), wake, shutdown_rx));
        Self { inner }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// signal that some session changed
    pub fn notify(&self) {
        self.inner.pending.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }

    /// emit now and drop any scheduled trailing emission
    pub fn flush(&self) {
        self.inner.pending.store(false, Ordering::Release);
        self.inner.emit();
    }

    /// drop a scheduled trailing emission without emitting
    pub fn cancel(&self) {
        self.inner.pending.store(false, Ordering::Release);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.tx.subscribe()
    }

    /// current snapshot of every session, outside the throttle
    pub fn snapshot(&self) -> ProgressEvent {
        self.inner.snapshot()
    }

    /// number of emissions so far
    pub fn emissions(&self) -> u64 {
        self.inner.emissions.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }
}

impl Inner {
    fn snapshot(&self) -> ProgressEvent {
        let sessions = self.store.list();
        ProgressEvent::Progresses(sessions.iter().map(SessionSnapshot::from).collect())
    }

    fn emit(&self) {
        let event = self.snapshot();
        self.emissions.fetch_add(1, Ordering::AcqRel);
        // no receivers is fine, nobody is watching yet
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::trace!("Broadcast progress snapshot to {} observer(s)", receivers);
    }
}

// holds only a weak handle while parked, so dropping the last broadcaster
// drops the shutdown sender and ends the loop
async fn run(inner: Weak<Inner>, wake: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = wake.notified() => {}
        }
        let Some(strong) = inner.upgrade() else {
            break;
        };
        if !strong.pending.swap(false, Ordering::AcqRel) {
            continue;
        }
        strong.emit();
        let interval = strong.interval;
        drop(strong);
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("Progress broadcaster stopped");
}
