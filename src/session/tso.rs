// ============================================================================
// Timestamp prefetch worker
// ============================================================================
//
// One background task per session keeps a single-slot buffer filled with a
// fresh timestamp from the store. The slot is overwritten on every fetch; a
// stale value is acceptable because uniqueness is the store's job.
//
// The stop signal is polled first before every request and during every
// wait, and an in-flight request is dropped when it fires, so no request is
// issued after cancellation.
//
// ============================================================================

use crate::core::{ConnectionId, DbError, Result};
use crate::store::Storage;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Counts running timestamp workers
#[derive(Debug, Clone, Default)]
pub struct WorkerGauge(Arc<AtomicUsize>);

impl WorkerGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> GaugeGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(Arc::clone(&self.0))
    }
}

/// Held by the task future; dropping it (completion or abort) uncounts the worker
struct GaugeGuard(Arc<AtomicUsize>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker tunables
#[derive(Debug, Clone, Copy)]
pub struct TsoSettings {
    pub refresh_interval: Duration,
    pub failure_threshold: u32,
    pub stop_timeout: Duration,
}

#[derive(Default)]
struct Slot {
    value: Mutex<Option<u64>>,
    consumed: Notify,
    failures: AtomicU32,
    degraded: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Slot {
    fn put(&self, ts: u64) {
        if let Ok(mut value) = self.value.lock() {
            *value = Some(ts);
        }
        self.failures.store(0, Ordering::SeqCst);
        self.degraded.store(false, Ordering::SeqCst);
    }

    fn record_failure(&self, err: &DbError, threshold: u32) -> bool {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(err.to_string());
        }
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        failures >= threshold && !self.degraded.swap(true, Ordering::SeqCst)
    }
}

pub struct TsoWorker {
    conn_id: ConnectionId,
    slot: Arc<Slot>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl TsoWorker {
    /// Starts prefetching from `store`. Must be called inside a tokio runtime.
    pub fn spawn(
        conn_id: ConnectionId,
        store: Arc<dyn Storage>,
        settings: TsoSettings,
        gauge: &WorkerGauge,
    ) -> Self {
        let slot = Arc::new(Slot::default());
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let live = gauge.enter();
        let worker_slot = Arc::clone(&slot);

        let join_handle = tokio::spawn(async move {
            let _live = live;
            loop {
                let fetched = tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    fetched = store.current_timestamp() => fetched,
                };

                match fetched {
                    Ok(ts) => worker_slot.put(ts),
                    Err(err) => {
                        if worker_slot.record_failure(&err, settings.failure_threshold) {
                            warn!(%conn_id, error = %err, "timestamp worker degraded");
                        } else {
                            debug!(%conn_id, error = %err, "timestamp prefetch failed");
                        }
                    }
                }

                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = worker_slot.consumed.notified() => {}
                    _ = sleep(settings.refresh_interval) => {}
                }
            }
            debug!(%conn_id, "timestamp worker stopped");
        });

        Self {
            conn_id,
            slot,
            stop_tx: Mutex::new(Some(stop_tx)),
            join_handle: Mutex::new(Some(join_handle)),
            stop_timeout: settings.stop_timeout,
        }
    }

    /// Takes the buffered timestamp, asking the worker to fetch the next one
    pub fn take(&self) -> Option<u64> {
        let ts = self.slot.value.lock().ok().and_then(|mut value| value.take());
        self.slot.consumed.notify_one();
        ts
    }

    /// Whether consecutive fetch failures have reached the threshold
    pub fn is_degraded(&self) -> bool {
        self.slot.degraded.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.slot.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .lock()
            .ok()
            .and_then(|h| h.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Signals the task and waits for it; aborts it after the stop timeout.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn stop(&self) -> Result<()> {
        self.signal();

        let handle = self.join_handle.lock()?.take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_cancelled() => Ok(()),
            Ok(Err(err)) => Err(DbError::ExecutionError(format!(
                "timestamp worker for {} panicked: {}",
                self.conn_id, err
            ))),
            Err(_) => {
                warn!(conn_id = %self.conn_id, "timestamp worker did not stop in time, aborting");
                handle.abort();
                Ok(())
            }
        }
    }

    /// Signals and aborts without waiting
    pub fn shutdown_now(&self) {
        self.signal();
        if let Ok(mut handle) = self.join_handle.lock() {
            if let Some(handle) = handle.take() {
                handle.abort();
            }
        }
    }

    fn signal(&self) {
        if let Ok(mut stop_tx) = self.stop_tx.lock() {
            if let Some(stop_tx) = stop_tx.take() {
                let _ = stop_tx.send(());
            }
        }
    }
}

impl Drop for TsoWorker {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
