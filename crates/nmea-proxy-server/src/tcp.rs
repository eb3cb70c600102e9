//! TCP transport: the accept loop and one link per accepted client.
//!
//! A connection link is one-shot. When its peer goes away the link closes
//! and leaves the bus; a reconnecting client is accepted as a brand-new
//! link with fresh counters.

use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use nmea_proxy_core::{FanoutRegistry, LineFramer, LinkDriver, LinkError, LinkHandler};

use crate::error::ProxyError;
use crate::scheduler::Scheduler;
use crate::write::SentenceWriter;
use crate::READ_CHUNK_SIZE;

/// Back-off after a failed `accept()`, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// One accepted TCP client on the bus.
///
/// The socket is in non-blocking mode: a read with nothing pending and a
/// write to a full socket buffer both return immediately. A sentence that
/// only partly fits is finished by later flushes before anything else is
/// written.
pub struct TcpConnectionLink {
    label: String,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    writer: SentenceWriter,
}

impl TcpConnectionLink {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        Ok(Self {
            label: format!("tcp:{peer}"),
            stream: Some(stream),
            buffer: vec![0; READ_CHUNK_SIZE],
            writer: SentenceWriter::new(),
        })
    }
}

impl LinkHandler for TcpConnectionLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::Disconnected)?;

        match stream.read(&mut self.buffer) {
            Ok(0) => Err(LinkError::Disconnected),
            Ok(n) => Ok(Some(self.buffer[..n].to_vec())),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<bool, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::Disconnected)?;
        Ok(self.writer.send(stream, bytes)?)
    }

    fn flush(&mut self) -> Result<bool, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::Disconnected)?;
        Ok(self.writer.flush(stream)?)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.writer.clear();
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("{} shutdown error ignored: {}", self.label, e);
            }
        }
    }
}

/// Accepts TCP clients and attaches each one to the bus.
pub struct TcpLinkListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_line_length: usize,
}

impl TcpLinkListener {
    /// Bind to `port` on all interfaces. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16, max_line_length: usize) -> Result<Self, ProxyError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { port, source })?;
        let local_addr = listener.local_addr()?;

        info!("TCP listener bound to {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            max_line_length,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients until `shutdown` turns true.
    ///
    /// Each client gets its own link, registered with `registry` and driven
    /// by a worker spawned on `scheduler`.
    pub async fn run(
        self,
        registry: FanoutRegistry,
        scheduler: Scheduler,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Accepting NMEA clients on {}", self.local_addr);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.attach(stream, peer, &registry, &scheduler),
                    Err(e) => {
                        error!("Failed to accept connection on {}: {}", self.local_addr, e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("TCP listener on {} stopped", self.local_addr);
    }

    fn attach(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        registry: &FanoutRegistry,
        scheduler: &Scheduler,
    ) {
        let link = match stream
            .into_std()
            .and_then(|stream| TcpConnectionLink::new(stream, peer))
        {
            Ok(link) => link,
            Err(e) => {
                warn!("Dropping client {}: {}", peer, e);
                return;
            }
        };

        let endpoint = registry.register(link.label());
        info!("Client {} connected as link {}", peer, endpoint.id());
        let driver = LinkDriver::new(
            Box::new(link),
            endpoint,
            LineFramer::new(self.max_line_length),
        );
        scheduler.spawn_link(driver);
    }
}
