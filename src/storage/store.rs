//! Election store: the single owner of the in-memory election document
//!
//! Lifecycle:
//! 1. [`ElectionStore::init`] picks the backend. With a remote store attached
//!    and enabled it subscribes to the document and every emission replaces
//!    the cache; otherwise the last locally persisted document is loaded.
//! 2. A startup timer ends the loading state even if no backend answers.
//! 3. Reads go through [`ElectionStore::get_snapshot`]; writes go through
//!    [`ElectionStore::save_snapshot`] (overwrite) or [`ElectionStore::update`]
//!    (transactional read-modify-write). In remote mode only the subscription
//!    writes the cache after a commit, so versions are applied in the order
//!    the remote published them.
//! 4. [`ElectionStore::teardown`] stops background tasks and drops listeners.

use crate::config::StoreConfig;
use crate::storage::local::LocalCache;
use crate::storage::notify::{ChangeNotifier, ChangeSubscription};
use crate::storage::remote::{RemoteStore, RemoteSubscription, TxnStep, document_digest};
use crate::types::{ElectionDocument, Phase1Display, Phase2Display, VotingPhase};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Backend connection state as seen by the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No backend answer yet
    Loading,
    /// Remote subscription delivered at least one version
    Connected,
    /// Running on the local cache only
    Offline,
    /// Remote attached but failing; the cache stays usable
    Degraded { reason: String },
}

enum Backend {
    Remote(Arc<dyn RemoteStore>),
    Local,
}

struct Shared {
    config: StoreConfig,
    instance_id: Uuid,
    cache: RwLock<ElectionDocument>,
    notifier: ChangeNotifier,
    status: watch::Sender<SyncStatus>,
    ready: watch::Sender<bool>,
    /// Bumped whenever a remote version lands in the cache
    applied: watch::Sender<u64>,
    /// Digests of the most recently applied remote versions, newest last
    recent: Mutex<VecDeque<String>>,
    local: Arc<dyn LocalCache>,
}

/// Applied remote versions remembered for read-your-writes waits
const RECENT_VERSIONS: usize = 64;

impl Shared {
    fn snapshot(&self) -> ElectionDocument {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace(&self, doc: ElectionDocument) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = doc;
    }

    fn replace_and_notify(&self, doc: ElectionDocument) {
        self.replace(doc);
        self.notifier.notify();
    }

    fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    fn record_applied(&self, digest: String) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() == RECENT_VERSIONS {
                recent.pop_front();
            }
            recent.push_back(digest);
        }
        self.applied.send_modify(|n| *n = n.wrapping_add(1));
    }

    fn has_applied(&self, digest: &str) -> bool {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|d| d == digest)
    }

    /// Wait until the subscription has applied the version with `digest`.
    async fn wait_applied(&self, digest: &str, timeout: Duration) -> bool {
        let mut applied = self.applied.subscribe();
        tokio::time::timeout(timeout, async {
            while !self.has_applied(digest) {
                if applied.changed().await.is_err() {
                    return false;
                }
            }
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Log a backend failure and downgrade the status when access is denied.
    fn report(&self, err: Error) -> Error {
        if err.is_permission_denied() {
            tracing::error!("🚫 {}", err.diagnostic());
            self.status.send_replace(SyncStatus::Degraded {
                reason: err.diagnostic(),
            });
        } else {
            tracing::warn!("⚠️  Remote store failure: {}", err);
        }
        err
    }

    async fn load_from_local(&self) {
        let key = &self.config.local_cache_key;
        match self.local.load(key).await {
            Ok(Some(raw)) => match ElectionDocument::from_json(&raw) {
                Ok(doc) => {
                    tracing::info!(
                        "💾 Loaded local document: voters={}, ballots_p1={}, ballots_p2={}",
                        doc.voters.len(),
                        doc.ballots_phase1.len(),
                        doc.ballots_phase2.len()
                    );
                    self.replace(doc);
                }
                Err(e) => tracing::error!("Local document unreadable, using defaults: {}", e),
            },
            Ok(None) => tracing::info!("No local document yet, using defaults"),
            Err(e) => tracing::error!("Local cache load failed, using defaults: {}", e),
        }
        self.status.send_replace(SyncStatus::Offline);
        self.mark_ready();
        self.notifier.notify();
    }
}

/// Continuously apply remote versions to the cache.
async fn run_remote_sync(shared: Arc<Shared>, mut subscription: RemoteSubscription) {
    while let Some(event) = subscription.next().await {
        let mut applied = None;
        match event {
            Ok(Some(value)) => {
                let digest = document_digest(Some(&value));
                match ElectionDocument::from_value(value) {
                    Ok(doc) => {
                        tracing::debug!(
                            "📡 Remote version applied: voters={}, ballots_p1={}, ballots_p2={}",
                            doc.voters.len(),
                            doc.ballots_phase1.len(),
                            doc.ballots_phase2.len()
                        );
                        shared.replace(doc);
                        applied = digest.ok();
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring undecodable remote document: {}", e);
                        continue;
                    }
                }
            }
            Ok(None) => tracing::info!("Remote has no document yet, keeping defaults"),
            Err(e) => {
                shared.report(e);
                continue;
            }
        }
        shared.status.send_replace(SyncStatus::Connected);
        shared.mark_ready();
        shared.notifier.notify();
        if let Some(digest) = applied {
            shared.record_applied(digest);
        }
    }
    tracing::debug!("Remote subscription closed");
}

/// Owner of the election document
pub struct ElectionStore {
    shared: Arc<Shared>,
    backend: Backend,
    /// Serializes local-mode writes
    write_gate: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ElectionStore {
    /// Build the store and connect it to its backend.
    ///
    /// A remote that fails to subscribe is abandoned for this session and the
    /// local cache takes over.
    pub async fn init(
        config: StoreConfig,
        remote: Option<Arc<dyn RemoteStore>>,
        local: Arc<dyn LocalCache>,
    ) -> Result<Self> {
        config.validate()?;

        let (status, _) = watch::channel(SyncStatus::Loading);
        let (ready, _) = watch::channel(false);
        let (applied, _) = watch::channel(0u64);
        let startup_timeout = config.startup_timeout();
        let remote_enabled = config.remote_enabled;

        let shared = Arc::new(Shared {
            config,
            instance_id: Uuid::new_v4(),
            cache: RwLock::new(ElectionDocument::default()),
            notifier: ChangeNotifier::new(),
            status,
            ready,
            applied,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_VERSIONS)),
            local,
        });

        let mut tasks = Vec::new();

        // The timer only unblocks the loading state; it never cancels the connection attempt
        {
            let shared = shared.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(startup_timeout).await;
                if !*shared.ready.borrow() {
                    tracing::warn!(
                        "⏱️  No backend response after {:?}, leaving loading state",
                        startup_timeout
                    );
                    shared.mark_ready();
                }
            }));
        }

        let backend = match remote.filter(|_| remote_enabled) {
            Some(remote) => match remote.subscribe(&shared.config.document_key).await {
                Ok(subscription) => {
                    tracing::info!(
                        "📡 Election store {} connected to remote backend '{}' key={}",
                        shared.instance_id,
                        remote.backend_tag(),
                        shared.config.document_key
                    );
                    tasks.push(tokio::spawn(run_remote_sync(shared.clone(), subscription)));
                    Backend::Remote(remote)
                }
                Err(e) => {
                    tracing::error!("Remote connection failed, falling back to local cache: {}", e);
                    shared.report(e);
                    shared.load_from_local().await;
                    Backend::Local
                }
            },
            None => {
                tracing::warn!(
                    "No remote store configured, election store {} runs offline on '{}'",
                    shared.instance_id,
                    shared.local.backend_tag()
                );
                shared.load_from_local().await;
                Backend::Local
            }
        };

        Ok(Self {
            shared,
            backend,
            write_gate: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(tasks),
        })
    }

    /// Stop background work and unregister every listener.
    pub fn teardown(self) {
        tracing::info!("Election store {} shutting down", self.shared.instance_id);
        self.shared.notifier.clear();
        // Drop aborts the tasks
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Deep, independent copy of the current document. Never blocks on I/O.
    pub fn get_snapshot(&self) -> ElectionDocument {
        self.shared.snapshot()
    }

    pub fn has_data(&self) -> bool {
        self.shared
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .has_data()
    }

    /// Register a change listener; see [`ChangeNotifier::subscribe`].
    pub fn on_change<F>(&self, listener: F) -> ChangeSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(listener)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_remote_connected(&self) -> bool {
        matches!(self.backend, Backend::Remote(_)) && self.sync_status() == SyncStatus::Connected
    }

    pub fn has_remote(&self) -> bool {
        matches!(self.backend, Backend::Remote(_))
    }

    /// Wait for the first backend answer or the startup timer.
    pub async fn wait_ready(&self) -> SyncStatus {
        let mut ready = self.shared.ready.subscribe();
        if ready.wait_for(|r| *r).await.is_err() {
            tracing::debug!("Readiness channel closed");
        }
        self.sync_status()
    }

    /// Unconditionally replace the whole document.
    ///
    /// The cache is updated and listeners notified before persisting. A
    /// backend failure is returned but the optimistic value is not rolled back.
    pub async fn save_snapshot(&self, mut doc: ElectionDocument) -> Result<()> {
        doc.migrate();
        match &self.backend {
            Backend::Remote(remote) => {
                self.shared.replace_and_notify(doc.clone());
                remote
                    .overwrite(&self.shared.config.document_key, doc.to_value()?)
                    .await
                    .map_err(|e| self.shared.report(e))
            }
            Backend::Local => {
                let _gate = self.write_gate.lock().await;
                self.shared.replace_and_notify(doc.clone());
                self.persist_local(&doc).await
            }
        }
    }

    /// Push the in-memory document to the remote, overwriting whatever it holds.
    pub async fn force_push_to_remote(&self) -> Result<()> {
        let Backend::Remote(remote) = &self.backend else {
            return Err(Error::validation("remote store not attached"));
        };
        let doc = self.get_snapshot();
        tracing::info!(
            "⬆️  Forcing local document onto remote: voters={}",
            doc.voters.len()
        );
        remote
            .overwrite(&self.shared.config.document_key, doc.to_value()?)
            .await
            .map_err(|e| self.shared.report(e))
    }

    /// Atomic read-modify-write of the document.
    ///
    /// `apply` returns `Ok(true)` to commit, `Ok(false)` to abort without
    /// writing, or an error which aborts and is returned. With a remote it may
    /// run several times against fresher versions; it must not have side
    /// effects outside the document.
    ///
    /// A remote commit returns once the subscription has applied the committed
    /// version (or a bounded wait elapsed). The commit result itself is never
    /// written to the cache, since a newer version may already be there.
    pub async fn update<F>(&self, mut apply: F) -> Result<bool>
    where
        F: FnMut(&mut ElectionDocument) -> Result<bool> + Send,
    {
        match &self.backend {
            Backend::Remote(remote) => {
                let mut failure: Option<Error> = None;
                let outcome = {
                    let mut step = |current: Option<Value>| -> TxnStep {
                        failure = None;
                        let mut doc = match current.map(ElectionDocument::from_value).transpose() {
                            Ok(doc) => doc.unwrap_or_default(),
                            Err(e) => {
                                failure = Some(e);
                                return TxnStep::Abort;
                            }
                        };
                        match apply(&mut doc) {
                            Ok(true) => match doc.to_value() {
                                Ok(value) => TxnStep::Commit(value),
                                Err(e) => {
                                    failure = Some(e);
                                    TxnStep::Abort
                                }
                            },
                            Ok(false) => TxnStep::Abort,
                            Err(e) => {
                                failure = Some(e);
                                TxnStep::Abort
                            }
                        }
                    };
                    remote
                        .transactional_update(&self.shared.config.document_key, &mut step)
                        .await
                };

                let outcome = outcome.map_err(|e| self.shared.report(e))?;
                if let Some(err) = failure {
                    return Err(err);
                }
                if !outcome.committed {
                    return Ok(false);
                }
                let committed = document_digest(outcome.snapshot.as_ref())?;
                let wait = self.shared.config.startup_timeout();
                if !self.shared.wait_applied(&committed, wait).await {
                    tracing::warn!(
                        "Committed version not echoed by the subscription within {:?}",
                        wait
                    );
                }
                Ok(true)
            }
            Backend::Local => {
                let _gate = self.write_gate.lock().await;
                let mut doc = self.get_snapshot();
                if !apply(&mut doc)? {
                    return Ok(false);
                }
                self.shared.replace_and_notify(doc.clone());
                self.persist_local(&doc).await?;
                Ok(true)
            }
        }
    }

    async fn persist_local(&self, doc: &ElectionDocument) -> Result<()> {
        let serialized = doc.to_json()?;
        self.shared
            .local
            .store(&self.shared.config.local_cache_key, &serialized)
            .await
            .inspect_err(|e| tracing::error!("Local persist failed: {}", e))
    }

    pub async fn set_max_excellent_votes(&self, limit: u32) -> Result<()> {
        if limit == 0 {
            return Err(Error::validation("max_excellent_votes"));
        }
        self.update(|doc| {
            doc.config.max_excellent_votes = limit;
            Ok(true)
        })
        .await?;
        tracing::info!("Phase 2 selection limit set to {}", limit);
        Ok(())
    }

    pub async fn set_phase_open(&self, phase: VotingPhase, open: bool) -> Result<()> {
        self.update(|doc| {
            doc.config.set_open(phase, open);
            Ok(true)
        })
        .await?;
        tracing::info!("Phase {} {}", phase.number(), if open { "opened" } else { "closed" });
        Ok(())
    }

    pub async fn set_phase1_display(&self, display: Phase1Display) -> Result<()> {
        self.update(|doc| {
            doc.config.p1_display = display.clone();
            Ok(true)
        })
        .await
        .map(|_| ())
    }

    pub async fn set_phase2_display(&self, display: Phase2Display) -> Result<()> {
        self.update(|doc| {
            doc.config.p2_display = display.clone();
            Ok(true)
        })
        .await
        .map(|_| ())
    }
}

impl Drop for ElectionStore {
    fn drop(&mut self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::MemoryLocalCache;
    use crate::storage::remote::InMemoryRemote;
    use crate::types::{PersonRecord, Voter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn roster(ids: &[&str]) -> ElectionDocument {
        let mut doc = ElectionDocument::default();
        for id in ids {
            doc.voters.push(Voter::new(PersonRecord::new(*id, format!("Voter {id}"))));
        }
        doc
    }

    async fn local_store() -> ElectionStore {
        let config = StoreConfig {
            remote_enabled: false,
            ..StoreConfig::for_testing()
        };
        ElectionStore::init(config, None, Arc::new(MemoryLocalCache::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_mode_loads_persisted_document() {
        let stored = roster(&["1", "2"]).to_json().unwrap();
        let local = MemoryLocalCache::new()
            .with_entry("DANG_VIEN_VOTE_DB_V2_PRO", &stored)
            .await;
        let config = StoreConfig {
            remote_enabled: false,
            ..StoreConfig::for_testing()
        };

        let store = ElectionStore::init(config, None, Arc::new(local)).await.unwrap();
        assert_eq!(store.sync_status(), SyncStatus::Offline);
        assert_eq!(store.get_snapshot().voters.len(), 2);
        assert!(!store.has_remote());
    }

    #[tokio::test]
    async fn test_snapshot_is_independent_copy() {
        let store = local_store().await;
        store.save_snapshot(roster(&["1"])).await.unwrap();

        let mut snapshot = store.get_snapshot();
        snapshot.voters.clear();
        assert_eq!(store.get_snapshot().voters.len(), 1);
    }

    #[tokio::test]
    async fn test_save_notifies_and_persists_locally() {
        let local = Arc::new(MemoryLocalCache::new());
        let config = StoreConfig {
            remote_enabled: false,
            ..StoreConfig::for_testing()
        };
        let store = ElectionStore::init(config, None, local.clone()).await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let hits = hits.clone();
            store.on_change(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        store.save_snapshot(roster(&["1"])).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let persisted = local.load("DANG_VIEN_VOTE_DB_V2_PRO").await.unwrap().unwrap();
        assert_eq!(ElectionDocument::from_json(&persisted).unwrap().voters.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_emission_replaces_cache() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = ElectionStore::init(
            StoreConfig::for_testing(),
            Some(remote.clone()),
            Arc::new(MemoryLocalCache::new()),
        )
        .await
        .unwrap();
        assert_eq!(store.wait_ready().await, SyncStatus::Connected);
        assert!(store.is_remote_connected());

        remote
            .overwrite("app_data", roster(&["7"]).to_value().unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while store.get_snapshot().voters.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(store.get_snapshot().find_voter("7").is_some());
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_back_to_local() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_offline(true);
        let local = MemoryLocalCache::new()
            .with_entry("DANG_VIEN_VOTE_DB_V2_PRO", &roster(&["3"]).to_json().unwrap())
            .await;

        let store = ElectionStore::init(StoreConfig::for_testing(), Some(remote), Arc::new(local))
            .await
            .unwrap();
        assert!(!store.has_remote());
        assert_eq!(store.sync_status(), SyncStatus::Offline);
        assert!(store.get_snapshot().find_voter("3").is_some());
        assert!(store.force_push_to_remote().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_overwrite_keeps_optimistic_value() {
        let remote = Arc::new(InMemoryRemote::new());
        let store = ElectionStore::init(
            StoreConfig::for_testing(),
            Some(remote.clone()),
            Arc::new(MemoryLocalCache::new()),
        )
        .await
        .unwrap();
        store.wait_ready().await;

        remote.set_offline(true);
        let err = store.save_snapshot(roster(&["9"])).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(store.get_snapshot().find_voter("9").is_some());
        assert_eq!(remote.peek("app_data").await, None);
    }

    #[tokio::test]
    async fn test_update_abort_writes_nothing() {
        let store = local_store().await;
        store.save_snapshot(roster(&["1"])).await.unwrap();

        let committed = store
            .update(|doc| {
                doc.voters.clear();
                Ok(false)
            })
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(store.get_snapshot().voters.len(), 1);
    }

    #[tokio::test]
    async fn test_config_helpers() {
        let store = local_store().await;
        tokio_test::assert_ok!(store.set_max_excellent_votes(3).await);
        tokio_test::assert_ok!(store.set_phase_open(VotingPhase::Two, false).await);
        tokio_test::assert_err!(store.set_max_excellent_votes(0).await);

        let config = store.get_snapshot().config;
        assert_eq!(config.max_excellent_votes, 3);
        assert!(config.is_phase1_open);
        assert!(!config.is_phase2_open);
    }
}
