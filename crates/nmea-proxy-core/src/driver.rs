//! Per-iteration link driver.
//!
//! One [`LinkDriver`] wraps one transport. A worker calls [`LinkDriver::tick`]
//! once per polling interval and [`LinkDriver::finish`] when the loop ends.
//! Scheduling and sleeping are left to the runtime layer.

use tracing::{debug, info, warn};

use crate::framing::LineFramer;
use crate::link::{LinkError, LinkHandler, LinkId, LinkState};
use crate::registry::LinkEndpoint;

/// What the worker should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep polling.
    Continue,
    /// A stop was requested.
    Stopped,
    /// The transport failed; the link has flagged itself for stopping.
    Failed,
}

/// Drives one link: framing, fanout and draining of its outbound queue.
pub struct LinkDriver {
    link: Box<dyn LinkHandler>,
    endpoint: LinkEndpoint,
    framer: LineFramer,
    closed: bool,
}

impl LinkDriver {
    pub fn new(link: Box<dyn LinkHandler>, endpoint: LinkEndpoint, framer: LineFramer) -> Self {
        Self {
            link,
            endpoint,
            framer,
            closed: false,
        }
    }

    pub fn id(&self) -> LinkId {
        self.endpoint.id()
    }

    pub fn label(&self) -> &str {
        self.link.label()
    }

    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    pub fn stop_requested(&self) -> bool {
        self.endpoint.shared().stop_requested()
    }

    /// Run one receive/fanout/drain iteration.
    pub fn tick(&mut self) -> TickOutcome {
        if self.closed || self.stop_requested() {
            return TickOutcome::Stopped;
        }

        match self.link.receive() {
            Ok(Some(bytes)) => {
                for sentence in self.framer.push(&bytes) {
                    self.endpoint.broadcast(&sentence);
                }
            }
            Ok(None) => {}
            Err(e) => return self.fail("receive", e),
        }

        if let Err(e) = self.link.flush() {
            return self.fail("flush", e);
        }

        let mut failure = None;
        for sentence in self.endpoint.drain_pending() {
            match self.link.send(&sentence.to_wire()) {
                Ok(true) => {
                    self.endpoint.record_tx();
                    debug!("{} sent: {}", self.link.label(), sentence);
                }
                Ok(false) => debug!(
                    "{} not writable, dropped: {}",
                    self.link.label(),
                    sentence
                ),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            return self.fail("send", e);
        }

        TickOutcome::Continue
    }

    fn fail(&mut self, op: &str, error: LinkError) -> TickOutcome {
        info!("{} {} failed, closing link: {}", self.link.label(), op, error);
        self.endpoint.shared().request_stop();
        TickOutcome::Failed
    }

    /// Close the transport and leave the registry. Idempotent.
    pub fn finish(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let shared = self.endpoint.shared();
        shared.set_state(LinkState::Closing);
        self.link.close();
        shared.set_state(LinkState::Disconnected);
        self.endpoint.leave();

        let pending = shared.queued();
        if pending > 0 {
            warn!("{} closed with {} unsent sentences", self.link.label(), pending);
        }
        info!(
            "{} closed (tx={}, rx={})",
            self.link.label(),
            shared.stats().tx(),
            shared.stats().rx()
        );
    }
}

impl Drop for LinkDriver {
    fn drop(&mut self) {
        self.finish();
    }
}
