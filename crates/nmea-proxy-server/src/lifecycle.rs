//! Lifecycle control: shutdown and stats requests.
//!
//! Signals are not handled here directly. A forwarder task turns them into
//! [`ControlRequest`]s on a channel, and the [`LifecycleController`] is the
//! only place acting on them.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use nmea_proxy_core::{FanoutRegistry, LinkStatsSnapshot};

use crate::scheduler::{Scheduler, ShutdownReport};

/// Requests accepted by the [`LifecycleController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Stop every link and listener.
    Shutdown,
    /// Log tx/rx counters of every registered link.
    Stats,
}

/// Acts on shutdown and stats requests.
pub struct LifecycleController {
    registry: FanoutRegistry,
    scheduler: Scheduler,
    requests: mpsc::Receiver<ControlRequest>,
}

impl LifecycleController {
    /// Create a controller and the sender used to reach it.
    pub fn new(
        registry: FanoutRegistry,
        scheduler: Scheduler,
    ) -> (Self, mpsc::Sender<ControlRequest>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                registry,
                scheduler,
                requests: rx,
            },
            tx,
        )
    }

    /// Log identity and counters of every registered link.
    pub fn report_stats(&self) -> Vec<LinkStatsSnapshot> {
        let stats = self.registry.stats();
        info!("Stats for {} links", stats.len());
        for link in &stats {
            info!("{}", link);
        }
        stats
    }

    /// Stop everything and wait for the workers.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down {} links", self.registry.len());
        self.scheduler.shutdown(&self.registry).await
    }

    /// Serve requests until a shutdown is requested or every sender is gone.
    pub async fn run(mut self) -> ShutdownReport {
        while let Some(request) = self.requests.recv().await {
            match request {
                ControlRequest::Stats => {
                    self.report_stats();
                }
                ControlRequest::Shutdown => break,
            }
        }
        self.shutdown().await
    }
}

/// Forward process signals to a controller.
///
/// SIGINT requests a shutdown and SIGUSR1 a stats report. On non-unix
/// targets only Ctrl+C is forwarded.
#[cfg(unix)]
pub fn spawn_signal_forwarder(
    requests: mpsc::Sender<ControlRequest>,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut user1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                Some(()) = interrupt.recv() => {
                    info!("Received SIGINT");
                    ControlRequest::Shutdown
                }
                Some(()) = user1.recv() => ControlRequest::Stats,
                else => break,
            };
            if requests.send(request).await.is_err() {
                break;
            }
            if request == ControlRequest::Shutdown {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_forwarder(
    requests: mpsc::Sender<ControlRequest>,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                let _ = requests.send(ControlRequest::Shutdown).await;
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    }))
}
