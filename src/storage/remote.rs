//! Remote replicated document store capability
//!
//! The election document lives under one key of a replicated key-value store
//! that offers three primitives: a change subscription, an optimistic
//! read-modify-write transaction and an unconditional overwrite.
//!
//! [`InMemoryRemote`] is a faithful single-process stand-in: transactions run
//! the caller's update function outside the lock, then commit only when the
//! content digest of the document is unchanged, re-running the function
//! otherwise. Subscribers see every committed version.

use crate::errors::RemoteErrorKind;
use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Attempts before a contended transaction gives up
pub const MAX_TRANSACTION_ATTEMPTS: usize = 25;

/// One emission of a subscription: the current document (or none) or a failure
pub type RemoteEvent = Result<Option<Value>>;

/// Stream of document versions for one key
#[derive(Debug)]
pub struct RemoteSubscription {
    receiver: mpsc::UnboundedReceiver<RemoteEvent>,
}

impl RemoteSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<RemoteEvent>) -> Self {
        Self { receiver }
    }

    /// Next emission; `None` once the remote closed the stream.
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.receiver.recv().await
    }
}

/// Decision returned by a transaction update function
#[derive(Debug, Clone, PartialEq)]
pub enum TxnStep {
    Commit(Value),
    Abort,
}

/// Result of a transactional update
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub committed: bool,
    /// Document as stored once the transaction finished
    pub snapshot: Option<Value>,
}

/// Update function for [`RemoteStore::transactional_update`].
///
/// May be invoked several times; each invocation sees the latest document.
pub type UpdateFn<'a> = dyn FnMut(Option<Value>) -> TxnStep + Send + 'a;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Subscribe to every version of `key`, starting with the current one.
    async fn subscribe(&self, key: &str) -> Result<RemoteSubscription>;

    /// Atomic read-modify-write of one document.
    async fn transactional_update(
        &self,
        key: &str,
        update: &mut UpdateFn<'_>,
    ) -> Result<TransactionOutcome>;

    /// Replace the document unconditionally.
    async fn overwrite(&self, key: &str, value: Value) -> Result<()>;
}

/// Content digest used as the optimistic-concurrency version of a document
pub fn document_digest(value: Option<&Value>) -> Result<String> {
    match value {
        None => Ok(String::new()),
        Some(v) => {
            let bytes = serde_json::to_vec(v)?;
            Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
        }
    }
}

#[derive(Default)]
struct Slot {
    value: Option<Value>,
    subscribers: Vec<mpsc::UnboundedSender<RemoteEvent>>,
}

impl Slot {
    fn publish(&mut self) {
        let value = self.value.clone();
        self.subscribers
            .retain(|tx| tx.send(Ok(value.clone())).is_ok());
    }

    fn publish_error(&mut self, kind: RemoteErrorKind, raw: &str) {
        self.subscribers
            .retain(|tx| tx.send(Err(Error::remote(kind, raw))).is_ok());
    }
}

/// In-process replicated document store with fault injection
pub struct InMemoryRemote {
    slots: Mutex<HashMap<String, Slot>>,
    denied: AtomicBool,
    offline: AtomicBool,
    latency: Duration,
    max_attempts: usize,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            denied: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            latency: Duration::ZERO,
            max_attempts: MAX_TRANSACTION_ATTEMPTS,
        }
    }

    /// Pause between a transaction's read and its commit, widening the race window.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Reject every operation with PermissionDenied while set.
    ///
    /// Existing subscribers receive the failure as an emission.
    pub async fn set_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
        if denied {
            let mut slots = self.slots.lock().await;
            for slot in slots.values_mut() {
                slot.publish_error(RemoteErrorKind::PermissionDenied, "PERMISSION_DENIED");
            }
        }
    }

    /// Fail every operation with a network error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Current stored document, bypassing fault injection.
    pub async fn peek(&self, key: &str) -> Option<Value> {
        let slots = self.slots.lock().await;
        slots.get(key).and_then(|s| s.value.clone())
    }

    /// Seed a document without notifying anyone, as if written before startup.
    pub async fn seed(&self, key: &str, value: Value) {
        let mut slots = self.slots.lock().await;
        slots.entry(key.to_string()).or_default().value = Some(value);
    }

    fn check_access(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::remote(RemoteErrorKind::Network, "remote unreachable"));
        }
        if self.denied.load(Ordering::SeqCst) {
            return Err(Error::remote(
                RemoteErrorKind::PermissionDenied,
                "PERMISSION_DENIED: client doesn't have permission to access the desired data",
            ));
        }
        Ok(())
    }

    async fn backoff(&self, attempt: usize) {
        // ThreadRng is not Send; draw before awaiting
        let jitter_us = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=200u64 * attempt as u64)
        };
        tokio::time::sleep(Duration::from_micros(jitter_us)).await;
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, key: &str) -> Result<RemoteSubscription> {
        self.check_access()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_string()).or_default();
        // New subscribers get the current version first
        tx.send(Ok(slot.value.clone()))
            .map_err(|_| Error::remote(RemoteErrorKind::Unknown, "subscriber dropped"))?;
        slot.subscribers.push(tx);
        Ok(RemoteSubscription::new(rx))
    }

    async fn transactional_update(
        &self,
        key: &str,
        update: &mut UpdateFn<'_>,
    ) -> Result<TransactionOutcome> {
        for attempt in 1..=self.max_attempts {
            self.check_access()?;

            let current = {
                let slots = self.slots.lock().await;
                slots.get(key).and_then(|s| s.value.clone())
            };
            let expected = document_digest(current.as_ref())?;

            let step = update(current.clone());

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            } else {
                tokio::task::yield_now().await;
            }

            self.check_access()?;
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(key.to_string()).or_default();
            let actual = document_digest(slot.value.as_ref())?;

            if actual != expected {
                drop(slots);
                tracing::debug!(
                    "transaction conflict on key={} attempt={}, retrying",
                    key,
                    attempt
                );
                self.backoff(attempt).await;
                continue;
            }

            return match step {
                TxnStep::Abort => Ok(TransactionOutcome {
                    committed: false,
                    snapshot: slot.value.clone(),
                }),
                TxnStep::Commit(next) => {
                    slot.value = Some(next);
                    slot.publish();
                    Ok(TransactionOutcome {
                        committed: true,
                        snapshot: slot.value.clone(),
                    })
                }
            };
        }

        Err(Error::remote(
            RemoteErrorKind::Unknown,
            format!("transaction on {key} exceeded {} attempts", self.max_attempts),
        ))
    }

    async fn overwrite(&self, key: &str, value: Value) -> Result<()> {
        self.check_access()?;
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_string()).or_default();
        slot.value = Some(value);
        slot.publish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_subscribe_receives_current_then_updates() {
        let remote = InMemoryRemote::new();
        remote.seed("doc", json!({"n": 1})).await;

        let mut sub = remote.subscribe("doc").await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), Some(json!({"n": 1})));

        remote.overwrite("doc", json!({"n": 2})).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_transaction_abort_leaves_document() {
        let remote = InMemoryRemote::new();
        remote.seed("doc", json!({"n": 1})).await;

        let outcome = remote
            .transactional_update("doc", &mut |_| TxnStep::Abort)
            .await
            .unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.snapshot, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_concurrent_increments_all_applied() {
        let remote = Arc::new(InMemoryRemote::new().with_max_attempts(200));
        remote.seed("counter", json!({"n": 0})).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let remote = remote.clone();
            handles.push(tokio::spawn(async move {
                remote
                    .transactional_update("counter", &mut |current| {
                        let n = current
                            .as_ref()
                            .and_then(|v| v["n"].as_u64())
                            .unwrap_or(0);
                        TxnStep::Commit(json!({"n": n + 1}))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().committed);
        }

        assert_eq!(remote.peek("counter").await, Some(json!({"n": 20})));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let remote = InMemoryRemote::new();

        remote.set_offline(true);
        let err = remote.overwrite("doc", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Remote {
                kind: RemoteErrorKind::Network,
                ..
            }
        ));
        remote.set_offline(false);

        let mut sub = remote.subscribe("doc").await.unwrap();
        let _initial = sub.next().await;
        remote.set_denied(true).await;
        let emitted = sub.next().await.unwrap();
        assert!(emitted.unwrap_err().is_permission_denied());
        assert!(remote.subscribe("doc").await.unwrap_err().is_permission_denied());
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = document_digest(Some(&json!({"a": 1}))).unwrap();
        let b = document_digest(Some(&json!({"a": 1}))).unwrap();
        let c = document_digest(Some(&json!({"a": 2}))).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(document_digest(None).unwrap(), "");
    }
}
