//! Registry of open event streams, shared by the HTTP handlers and the broadcast loop.
//!
//! Each subscriber is the sending half of a bounded channel whose receiver feeds that
//! client's response body. Membership lives behind a `std::sync::Mutex` that is only
//! held for map updates and never across an `.await`. A broadcast copies the current
//! handles out, sends to them concurrently, then removes exactly the ones that failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::debug;

use crate::error::DeliveryError;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One subscriber's event queue. Clones share the queue and the id.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    tx: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id: ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)),
            tx,
        }
    }

    /// A handle plus the receiver its events arrive on, queueing at most `depth`.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Queues `payload`, waiting at most `deadline` for room.
    pub async fn send(&self, payload: Bytes, deadline: Duration) -> Result<(), DeliveryError> {
        self.tx
            .send_timeout(payload, deadline)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::TimedOut(deadline),
                SendTimeoutError::Closed(_) => DeliveryError::Disconnected,
            })
    }
}

/// Per-call delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

struct RegistryState {
    clients: HashMap<ClientId, ClientHandle>,
    closed: bool,
}

pub struct ClientRegistry {
    state: Mutex<RegistryState>,
    write_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                clients: HashMap::new(),
                closed: false,
            }),
            write_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `handle`; re-adding a present handle is a no-op. Returns whether it was
    /// newly inserted. A closed registry drops the handle, which ends its stream.
    pub fn add(&self, handle: ClientHandle) -> bool {
        let mut state = self.lock();
        if state.closed || state.clients.contains_key(&handle.id) {
            return false;
        }
        state.clients.insert(handle.id, handle);
        true
    }

    pub fn remove(&self, id: ClientId) -> Option<ClientHandle> {
        self.lock().clients.remove(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `payload` to every registered client. A client whose stream has ended or
    /// whose queue stays full past the write timeout is removed; the others are
    /// unaffected.
    pub async fn broadcast(&self, payload: Bytes) -> BroadcastOutcome {
        let clients: Vec<ClientHandle> = self.lock().clients.values().cloned().collect();
        if clients.is_empty() {
            return BroadcastOutcome::default();
        }

        let deadline = self.write_timeout;
        let results = join_all(clients.iter().map(|c| {
            let payload = payload.clone();
            async move { (c.id, c.send(payload, deadline).await) }
        }))
        .await;
        drop(clients);

        let mut outcome = BroadcastOutcome::default();
        let mut failed = Vec::new();
        for (id, res) in results {
            match res {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    debug!(client = %id, "dropping client: {e}");
                    failed.push(id);
                }
            }
        }
        if !failed.is_empty() {
            let mut state = self.lock();
            for id in &failed {
                if state.clients.remove(id).is_some() {
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }

    /// Closes the registry: later `add` calls are refused, and every current client is
    /// removed. Dropping the handles ends each client's stream once its queue drains.
    pub fn close_all(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let n = state.clients.len();
        state.clients.clear();
        n
    }
}
