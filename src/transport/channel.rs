//! In-process transport fabric over bounded channels.
//!
//! Each connected peer gets a bounded inbound queue and a named dispatcher
//! thread delivering updates into its context through conflict resolution.
//! Senders use non-blocking `try_send` — the context lock is held during
//! sends, so the fabric must never stall a writer; overflowing updates are
//! counted and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::context::KnowledgeContext;
use crate::error::{KarlResult, TransportError};
use crate::record::KnowledgeRecord;
use crate::transport::{KnowledgeUpdate, Transport};

/// Fabric configuration.
#[derive(Debug, Clone)]
pub struct ChannelHubConfig {
    /// Max queued inbound updates per peer before drops apply.
    pub queue_capacity: usize,
}

impl Default for ChannelHubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct HubShared {
    peers: Mutex<HashMap<String, Sender<KnowledgeUpdate>>>,
}

/// A fabric connecting peer contexts inside one process.
///
/// This is the embedded reference transport: it exercises the full
/// propagation path (modified-set batching, conflict resolution on
/// receipt, waiter wake-up) without any socket code.
#[derive(Clone, Default)]
pub struct ChannelHub {
    config: ChannelHubConfig,
    shared: Arc<HubShared>,
}

impl ChannelHub {
    /// A fabric with explicit queue sizing.
    #[must_use]
    pub fn new(config: ChannelHubConfig) -> Self {
        Self {
            config,
            shared: Arc::new(HubShared::default()),
        }
    }

    /// Connects a peer, spawning its dispatcher thread.
    ///
    /// The returned transport broadcasts to every *other* connected peer;
    /// inbound updates flow into `context` via `apply_remote`, waking any
    /// blocked waiters. Dropping the transport disconnects the peer and
    /// joins its dispatcher.
    pub fn connect(
        &self,
        peer: impl Into<String>,
        context: Arc<KnowledgeContext>,
    ) -> KarlResult<Arc<ChannelTransport>> {
        let peer = peer.into();
        let capacity = self.config.queue_capacity.max(1);
        let (tx, rx) = bounded::<KnowledgeUpdate>(capacity);

        {
            let mut peers = self
                .shared
                .peers
                .lock()
                .map_err(|_| crate::error::KarlError::internal("poisoned hub lock"))?;
            if peers.contains_key(&peer) {
                return Err(TransportError::DuplicatePeer { peer }.into());
            }
            peers.insert(peer.clone(), tx);
        }

        let thread_peer = peer.clone();
        let join = thread::Builder::new()
            .name(format!("karl-transport-{peer}"))
            .spawn(move || dispatcher_loop(&thread_peer, &rx, &context))
            .map_err(|e| crate::error::KarlError::internal(format!("spawn failed: {e}")))?;

        Ok(Arc::new(ChannelTransport {
            peer,
            capacity,
            shared: Arc::clone(&self.shared),
            dropped: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        }))
    }
}

impl std::fmt::Debug for ChannelHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peers = self.shared.peers.lock().map(|p| p.len()).unwrap_or(0);
        f.debug_struct("ChannelHub")
            .field("config", &self.config)
            .field("peers", &peers)
            .finish()
    }
}

fn dispatcher_loop(peer: &str, rx: &Receiver<KnowledgeUpdate>, context: &KnowledgeContext) {
    while let Ok(update) = rx.recv() {
        if update.originator == peer {
            continue;
        }
        if let Err(err) = context.receive(&update) {
            // A bad inbound update must never corrupt local state; log
            // and keep dispatching.
            warn!(peer, %err, "dropped malformed inbound update");
        }
    }
    debug!(peer, "transport dispatcher exiting");
}

/// One peer's handle on the fabric.
pub struct ChannelTransport {
    peer: String,
    capacity: usize,
    shared: Arc<HubShared>,
    dropped: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTransport {
    /// This peer's originator identity.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Updates dropped because a receiver queue was full.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn broadcast(&self, update: &KnowledgeUpdate) -> KarlResult<()> {
        let targets: Vec<(String, Sender<KnowledgeUpdate>)> = {
            let peers = self
                .shared
                .peers
                .lock()
                .map_err(|_| crate::error::KarlError::internal("poisoned hub lock"))?;
            peers
                .iter()
                .filter(|(name, _)| name.as_str() != self.peer)
                .map(|(name, tx)| (name.clone(), tx.clone()))
                .collect()
        };
        for (name, tx) in targets {
            match tx.try_send(update.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        from = %self.peer,
                        to = %name,
                        capacity = self.capacity,
                        "receiver queue full, dropping update"
                    );
                }
                // A disconnecting peer is routine; its entry disappears
                // from the registry shortly after.
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        Ok(())
    }
}

impl Transport for ChannelTransport {
    fn send(&self, key: &str, record: &KnowledgeRecord) -> KarlResult<()> {
        let update = KnowledgeUpdate::assignment(key, record, self.peer.clone());
        self.broadcast(&update)
    }

    fn send_multi(&self, encoded: &str, clock: u64, quality: u32) -> KarlResult<()> {
        let update =
            KnowledgeUpdate::multiple_assignment(encoded, clock, quality, self.peer.clone());
        self.broadcast(&update)
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("peer", &self.peer)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        // Unregistering drops the queue's sender; the dispatcher drains
        // what is queued and exits, and we join it so no orphaned thread
        // outlives the fabric.
        if let Ok(mut peers) = self.shared.peers.lock() {
            peers.remove(&self.peer);
        }
        if let Ok(mut join) = self.join.lock() {
            if let Some(handle) = join.take() {
                let _ = handle.join();
            }
        }
    }
}
