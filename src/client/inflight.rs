//! Coalescing of concurrent identical requests.
//!
//! The first caller for a signature becomes the leader and performs the
//! actual work; callers arriving while it is outstanding become waiters
//! and receive a clone of the leader's outcome. The registry entry is
//! removed when the leader finishes, whatever the outcome, so a key can
//! never be stranded. A leader that is dropped mid-flight (task cancelled)
//! releases the key and fails its waiters rather than hanging them.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ClientError;

type Outcome<T> = Result<T, ClientError>;

/// Role assigned to a caller joining the registry.
pub enum Flight<T> {
    /// This caller must perform the work and publish the outcome.
    Leader(FlightGuard<T>),
    /// Another caller is already working; await its outcome.
    Waiter(broadcast::Receiver<Outcome<T>>),
}

/// Registry of outstanding requests keyed by canonical signature.
#[derive(Debug)]
pub struct InFlightRegistry<T> {
    entries: Arc<DashMap<String, broadcast::Sender<Outcome<T>>>>,
}

impl<T> Clone for InFlightRegistry<T> {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries) }
    }
}

impl<T> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }
}

impl<T: Clone> InFlightRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `signature`, becoming leader or waiter.
    pub fn join(&self, signature: &str) -> Flight<T> {
        match self.entries.entry(signature.to_string()) {
            Entry::Occupied(occupied) => {
                debug!(signature, "joining in-flight request as waiter");
                Flight::Waiter(occupied.get().subscribe())
            }
            Entry::Vacant(vacant) => {
                // capacity 1: exactly one outcome is ever published per key
                let (sender, _) = broadcast::channel(1);
                vacant.insert(sender.clone());
                Flight::Leader(FlightGuard {
                    entries: Arc::clone(&self.entries),
                    signature: signature.to_string(),
                    sender,
                    completed: false,
                })
            }
        }
    }

    /// Number of signatures currently in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Leader-side handle. Publishing the outcome releases the key; dropping
/// the guard without publishing releases the key and fails the waiters.
pub struct FlightGuard<T> {
    entries: Arc<DashMap<String, broadcast::Sender<Outcome<T>>>>,
    signature: String,
    sender: broadcast::Sender<Outcome<T>>,
    completed: bool,
}

impl<T: Clone> FlightGuard<T> {
    /// Publish the outcome to all waiters and release the key.
    ///
    /// The key is removed before the send so that a caller arriving after
    /// the underlying call finished starts a fresh flight instead of
    /// attaching to a completed one.
    pub fn complete(mut self, outcome: Outcome<T>) {
        self.entries.remove(&self.signature);
        let _ = self.sender.send(outcome);
        self.completed = true;
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.entries.remove(&self.signature);
            let _ = self.sender.send(Err(ClientError::Network {
                message: "in-flight request was abandoned before completing".into(),
            }));
        }
    }
}

/// Await the leader's outcome from the waiter side.
pub async fn await_leader<T: Clone>(
    mut receiver: broadcast::Receiver<Outcome<T>>,
) -> Outcome<T> {
    match receiver.recv().await {
        Ok(outcome) => outcome,
        Err(_) => Err(ClientError::Network {
            message: "in-flight request was abandoned before completing".into(),
        }),
    }
}
