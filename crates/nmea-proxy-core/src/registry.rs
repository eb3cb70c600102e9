//! Fanout registry: the roster of active links and the sole broadcast point.
//!
//! The registry owns nothing but routing state. Each link owns its
//! transport and the receiving half of its outbound queue (held in a
//! [`LinkEndpoint`]); the registry keeps the shared half ([`LinkShared`]) for
//! broadcasting, stopping and stats.
//!
//! Membership is guarded by an internal `RwLock` and every outbound queue is
//! an unbounded MPMC channel, so callers never take a lock themselves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::link::{AtomicLinkState, LinkId, LinkState, LinkStats, LinkStatsSnapshot};
use crate::sentence::Sentence;

/// The part of a link visible to every other worker.
#[derive(Debug)]
pub struct LinkShared {
    id: LinkId,
    label: String,
    state: AtomicLinkState,
    stats: LinkStats,
    stop: AtomicBool,
    queue: Sender<Sentence>,
}

impl LinkShared {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> LinkState {
        self.state.load()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Ask the link's worker to stop at its next iteration.
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            self.state.store(LinkState::Closing);
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Number of sentences waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            id: self.id,
            label: self.label.clone(),
            state: self.state(),
            rx: self.stats.rx(),
            tx: self.stats.tx(),
            connected_at: self.stats.connected_at(),
        }
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.store(state);
    }
}

/// A link's membership in the bus, owned by the link's worker.
///
/// Holds the receiving half of the link's outbound queue and a handle to the
/// registry for broadcasting and leaving.
#[derive(Debug)]
pub struct LinkEndpoint {
    shared: Arc<LinkShared>,
    queue: Receiver<Sentence>,
    registry: FanoutRegistry,
}

impl LinkEndpoint {
    pub fn id(&self) -> LinkId {
        self.shared.id
    }

    pub fn shared(&self) -> &Arc<LinkShared> {
        &self.shared
    }

    pub fn registry(&self) -> &FanoutRegistry {
        &self.registry
    }

    /// Count `sentence` as received on this link and deliver it to every
    /// other registered link.
    pub fn broadcast(&self, sentence: &Sentence) -> usize {
        self.shared.stats.record_rx();
        self.registry.broadcast(self.shared.id, sentence)
    }

    /// Take the sentences queued before this call.
    ///
    /// Sentences enqueued while the iterator is consumed are left for the
    /// next call, so one drain is bounded by the queue length at its start.
    pub fn drain_pending(&self) -> impl Iterator<Item = Sentence> + '_ {
        let pending = self.queue.len();
        self.queue.try_iter().take(pending)
    }

    pub(crate) fn record_tx(&self) {
        self.shared.stats.record_tx();
    }

    /// Remove this link from the registry.
    pub fn leave(&self) {
        self.registry.unregister(self.shared.id);
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    links: RwLock<BTreeMap<LinkId, Arc<LinkShared>>>,
}

/// Shared roster of active links.
///
/// Cheap to clone; all clones refer to the same roster.
#[derive(Debug, Clone, Default)]
pub struct FanoutRegistry {
    inner: Arc<RegistryInner>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<LinkId, Arc<LinkShared>>> {
        self.inner
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<LinkId, Arc<LinkShared>>> {
        self.inner
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connected link and return the endpoint its worker drives.
    pub fn register(&self, label: impl Into<String>) -> LinkEndpoint {
        let id = LinkId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(LinkShared {
            id,
            label: label.into(),
            state: AtomicLinkState::new(LinkState::Connected),
            stats: LinkStats::new(),
            stop: AtomicBool::new(false),
            queue: tx,
        });

        self.write().insert(id, shared.clone());
        debug!("Registered link {} {}", id, shared.label);

        LinkEndpoint {
            shared,
            queue: rx,
            registry: self.clone(),
        }
    }

    /// Remove a link. Returns its shared state if it was registered.
    pub fn unregister(&self, id: LinkId) -> Option<Arc<LinkShared>> {
        let removed = self.write().remove(&id);
        if let Some(link) = &removed {
            debug!("Unregistered link {} {}", id, link.label);
        }
        removed
    }

    /// Enqueue `sentence` on every registered link except `sender`.
    ///
    /// Returns the number of queues the sentence was delivered to.
    pub fn broadcast(&self, sender: LinkId, sentence: &Sentence) -> usize {
        let links = self.read();
        links
            .values()
            .filter(|link| link.id != sender)
            .filter(|link| link.queue.send(sentence.clone()).is_ok())
            .count()
    }

    /// Ask every registered link to stop.
    pub fn stop_all(&self) {
        for link in self.read().values() {
            link.request_stop();
        }
    }

    pub fn get(&self, id: LinkId) -> Option<Arc<LinkShared>> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: LinkId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Stats for every registered link, in registration order.
    pub fn stats(&self) -> Vec<LinkStatsSnapshot> {
        self.read().values().map(|link| link.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn drained(endpoint: &LinkEndpoint) -> Vec<String> {
        endpoint.drain_pending().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_broadcast_reaches_all_but_sender() {
        let registry = FanoutRegistry::new();
        let endpoints: Vec<_> = (0..4).map(|i| registry.register(format!("link-{i}"))).collect();

        let delivered = endpoints[0].broadcast(&Sentence::from("$GPRMC,1"));
        assert_eq!(delivered, 3);

        assert!(drained(&endpoints[0]).is_empty());
        for endpoint in &endpoints[1..] {
            assert_eq!(drained(endpoint), vec!["$GPRMC,1"]);
        }
    }

    #[test]
    fn test_unregistered_link_receives_nothing() {
        let registry = FanoutRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        let c = registry.register("c");

        c.leave();
        assert!(!registry.contains(c.id()));
        assert_eq!(registry.len(), 2);

        assert_eq!(a.broadcast(&Sentence::from("$X")), 1);
        assert_eq!(drained(&b), vec!["$X"]);
        assert!(drained(&c).is_empty());
    }

    #[test]
    fn test_drain_is_bounded_to_queue_at_start() {
        let registry = FanoutRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");

        a.broadcast(&Sentence::from("1"));
        a.broadcast(&Sentence::from("2"));

        let mut seen = Vec::new();
        for sentence in b.drain_pending() {
            // Arrives mid-drain, must wait for the next drain
            a.broadcast(&Sentence::from("late"));
            seen.push(sentence.to_string());
        }
        assert_eq!(seen, vec!["1", "2"]);
        assert_eq!(drained(&b), vec!["late", "late"]);
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let registry = FanoutRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        assert!(a.id() < b.id());

        let labels: Vec<_> = registry.stats().into_iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn test_stop_all_marks_closing() {
        let registry = FanoutRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");

        registry.stop_all();
        for endpoint in [&a, &b] {
            assert!(endpoint.shared().stop_requested());
            assert_eq!(endpoint.shared().state(), LinkState::Closing);
        }
    }

    #[test]
    fn test_concurrent_broadcast_and_membership() {
        let registry = FanoutRegistry::new();
        let receiver = registry.register("receiver");
        let senders: Vec<_> = (0..8).map(|i| registry.register(format!("s{i}"))).collect();

        thread::scope(|scope| {
            for sender in &senders {
                scope.spawn(move || {
                    for _ in 0..100 {
                        sender.broadcast(&Sentence::from("$GPGGA"));
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..50 {
                    let transient = registry.register(format!("transient-{i}"));
                    transient.leave();
                }
            });
        });

        assert_eq!(receiver.drain_pending().count(), 800);
        assert_eq!(registry.len(), 9);
        for sender in &senders {
            assert_eq!(sender.shared().stats().rx(), 100);
        }
    }
}
