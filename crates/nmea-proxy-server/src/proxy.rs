//! Assembles a running proxy from a [`ProxyConfig`].

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{error, info};

use nmea_proxy_core::{FanoutRegistry, LineFramer, LinkDriver, LinkHandler, ProxyConfig};

use crate::error::ProxyError;
use crate::lifecycle::{ControlRequest, LifecycleController};
use crate::scheduler::Scheduler;
use crate::serial::SerialLink;
use crate::tcp::TcpLinkListener;

/// A running NMEA proxy: every configured link attached to one bus.
pub struct NmeaProxy {
    config: ProxyConfig,
    registry: FanoutRegistry,
    scheduler: Scheduler,
    listener_addrs: Vec<SocketAddr>,
}

impl NmeaProxy {
    /// Bind every listener, open every serial device and start all workers.
    ///
    /// A listener that cannot bind is an error. A serial device that cannot
    /// be opened is logged and skipped; the remaining links still start.
    pub async fn start(config: ProxyConfig) -> Result<Self, ProxyError> {
        let registry = FanoutRegistry::new();
        let scheduler = Scheduler::new(config.poll_interval());

        let mut listeners = Vec::with_capacity(config.tcp_ports.len());
        for &port in &config.tcp_ports {
            listeners.push(TcpLinkListener::bind(port, config.max_line_length).await?);
        }

        let mut listener_addrs = Vec::with_capacity(listeners.len());
        for listener in listeners {
            listener_addrs.push(listener.local_addr());
            scheduler.spawn_listener(listener, registry.clone());
        }

        for spec in &config.serial {
            match SerialLink::open(spec, config.serial_error_policy) {
                Ok(link) => {
                    let endpoint = registry.register(link.label());
                    info!("Serial link {} running as link {}", spec, endpoint.id());
                    scheduler.spawn_link(LinkDriver::new(
                        Box::new(link),
                        endpoint,
                        LineFramer::new(config.max_line_length),
                    ));
                }
                Err(e) => error!("{}", e),
            }
        }

        if listener_addrs.is_empty() && registry.is_empty() {
            return Err(ProxyError::NothingToRun);
        }

        Ok(Self {
            config,
            registry,
            scheduler,
            listener_addrs,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn registry(&self) -> &FanoutRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Bound address of every TCP listener, in configuration order.
    pub fn listener_addrs(&self) -> &[SocketAddr] {
        &self.listener_addrs
    }

    /// Lifecycle controller for this proxy and the sender reaching it.
    pub fn controller(&self) -> (LifecycleController, mpsc::Sender<ControlRequest>) {
        LifecycleController::new(self.registry.clone(), self.scheduler.clone())
    }
}
