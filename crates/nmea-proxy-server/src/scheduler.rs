//! Worker scheduling: one tokio task per link, one per listener.
//!
//! Every worker polls its link once per interval, so a stop request is
//! observed within one interval. Workers never share a task, which keeps a
//! stalled peer on one link from holding up any other.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nmea_proxy_core::{FanoutRegistry, LinkDriver, TickOutcome};

use crate::tcp::TcpLinkListener;

/// Extra time granted to workers on shutdown on top of two poll intervals.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(50);

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that observed the stop and returned in time.
    pub stopped: usize,
    /// Workers that had to be aborted.
    pub aborted: usize,
}

struct SchedulerInner {
    poll_interval: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Spawns and tracks every worker of the proxy.
///
/// Cheap to clone; all clones track the same set of workers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler. Must be called within a tokio runtime before
    /// spawning anything.
    pub fn new(poll_interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                poll_interval,
                workers: Mutex::new(Vec::new()),
                shutdown_tx,
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut workers = self.workers();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);
    }

    /// Receiver that turns true once shutdown has begun.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Number of workers still running.
    pub fn active_workers(&self) -> usize {
        self.workers()
            .iter()
            .filter(|worker| !worker.is_finished())
            .count()
    }

    /// Start the worker for one link.
    pub fn spawn_link(&self, driver: LinkDriver) {
        let handle = tokio::spawn(run_link(
            driver,
            self.inner.poll_interval,
            self.shutdown_signal(),
        ));
        self.track(handle);
    }

    /// Start the accept loop of a TCP listener.
    pub fn spawn_listener(&self, listener: TcpLinkListener, registry: FanoutRegistry) {
        let handle = tokio::spawn(listener.run(registry, self.clone(), self.shutdown_signal()));
        self.track(handle);
    }

    /// Stop every link and listener and wait for their workers.
    ///
    /// Workers get two poll intervals plus a short grace to return; any
    /// still running after that are aborted.
    pub async fn shutdown(&self, registry: &FanoutRegistry) -> ShutdownReport {
        self.inner.shutdown_tx.send_replace(true);
        registry.stop_all();

        let workers: Vec<_> = self.workers().drain(..).collect();
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let total = workers.len();
        let deadline = self.inner.poll_interval * 2 + SHUTDOWN_GRACE;

        let report = match tokio::time::timeout(deadline, join_all(workers)).await {
            Ok(_) => ShutdownReport {
                stopped: total,
                aborted: 0,
            },
            Err(_) => {
                let pending: Vec<_> = abort_handles.iter().filter(|h| !h.is_finished()).collect();
                for handle in &pending {
                    handle.abort();
                }
                ShutdownReport {
                    stopped: total - pending.len(),
                    aborted: pending.len(),
                }
            }
        };

        if report.aborted > 0 {
            warn!("{} workers did not stop in time and were aborted", report.aborted);
        }
        info!("Stopped {} workers", report.stopped);
        report
    }
}

/// Worker loop for one link.
async fn run_link(mut driver: LinkDriver, poll_interval: Duration, shutdown: watch::Receiver<bool>) {
    debug!("Worker for {} started", driver.label());

    loop {
        if *shutdown.borrow() {
            driver.endpoint().shared().request_stop();
        }
        if driver.tick() != TickOutcome::Continue {
            break;
        }
        tokio::time::sleep(poll_interval).await;
    }

    driver.finish();
    debug!("Worker for {} finished", driver.label());
}
