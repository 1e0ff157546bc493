//! Core sync engine that owns the queue and cache and drives replay.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use driftsync_common::{ActionId, ActionKind, Error, Priority, Result, Target};
use driftsync_store::PersistentStore;

use crate::action::{ActionQueue, QueuedAction};
use crate::backoff::BackoffPolicy;
use crate::cache::ExpiringCache;
use crate::connectivity::ConnectivityObserver;
use crate::executor::RemoteExecutor;
use crate::state::{EngineEvent, EngineState};

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry delay policy.
    pub backoff: BackoffPolicy,
    /// Store key for the serialized queue record.
    pub queue_key: String,
    /// Store key for the serialized cache record.
    pub cache_key: String,
    /// Capacity of the subscriber event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            queue_key: "sync.queue".to_string(),
            cache_key: "sync.cache".to_string(),
            event_capacity: 64,
        }
    }
}

/// Offline action queue and synchronization engine.
///
/// Owns the pending-action queue and the expiring cache exclusively; all
/// mutations go through the public operations here, each of which ends with a
/// write-through persistence flush and a state notification. Drains run under
/// a single-flight guarantee and are triggered by `enqueue` while online, by
/// offline-to-online connectivity edges (after [`start`](Self::start)), by
/// scheduled retry timers, and by manual [`sync`](Self::sync) calls.
pub struct SyncEngine {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn PersistentStore>,
    observer: Arc<ConnectivityObserver>,
    queue: RwLock<ActionQueue>,
    cache: RwLock<ExpiringCache>,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    /// Single-flight gate for drain passes. Set before the first await.
    draining: AtomicBool,
    /// Once set by `cleanup`, drains and scheduled triggers become no-ops.
    shutdown: AtomicBool,
    events: broadcast::Sender<EngineEvent>,
    edge_task: Mutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Create a new engine, loading persisted queue and cache records.
    ///
    /// Corrupt or missing records fall back to empty state with a warning;
    /// construction only fails on invalid configuration. Expired cache
    /// entries are evicted at startup.
    pub async fn new(
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn PersistentStore>,
        observer: Arc<ConnectivityObserver>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let queue = Self::load_record(store.as_ref(), &config.queue_key, ActionQueue::from_json)
            .await
            .unwrap_or_default();
        let mut cache = Self::load_record(store.as_ref(), &config.cache_key, ExpiringCache::from_json)
            .await
            .unwrap_or_default();

        let evicted = cache.evict_expired(Utc::now());

        let (events, _) = broadcast::channel(config.event_capacity);

        let engine = Arc::new(Self {
            executor,
            store,
            observer,
            queue: RwLock::new(queue),
            cache: RwLock::new(cache),
            last_sync: RwLock::new(None),
            draining: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            events,
            edge_task: Mutex::new(None),
            config,
        });

        if evicted > 0 {
            debug!("Evicted {} expired cache entries at startup", evicted);
            engine.persist_cache().await;
        }

        Ok(engine)
    }

    async fn load_record<T>(
        store: &dyn PersistentStore,
        key: &str,
        parse: impl Fn(&str) -> Result<T>,
    ) -> Option<T> {
        let bytes = match store.load(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to load record {}: {}", key, e);
                return None;
            }
        };

        match std::str::from_utf8(&bytes)
            .map_err(|e| Error::Serialization(e.to_string()))
            .and_then(|json| parse(json))
        {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Record {} is corrupt, starting empty: {}", key, e);
                None
            }
        }
    }

    /// Begin consuming connectivity edges.
    ///
    /// Spawns a task that triggers a drain on every offline-to-online
    /// transition, hopping platform callbacks into the engine's own
    /// execution context.
    pub fn start(self: &Arc<Self>) {
        let mut edges = self.observer.edges();
        let engine = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(state) = edges.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                info!("Back online ({:?}), draining queue", state.connection);
                engine.sync().await;
            }
        });

        if let Ok(mut slot) = self.edge_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }

    /// Tear the engine down: stop edge consumption, detach connectivity
    /// listeners, and clear in-memory state. Durable records are left
    /// untouched.
    pub async fn cleanup(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Ok(mut slot) = self.edge_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.observer.detach_all();

        *self.queue.write().await = ActionQueue::new();
        self.cache.write().await.clear();
        info!("Engine cleaned up");
    }

    /// Subscribe to engine notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Current derived engine state.
    pub async fn current_state(&self) -> EngineState {
        let connectivity = self.observer.current();
        EngineState {
            is_online: connectivity.is_online,
            connection: connectivity.connection,
            queue_size: self.queue.read().await.len(),
            last_sync_time: *self.last_sync.read().await,
        }
    }

    /// Ordered view of the pending queue (priority, then FIFO).
    pub async fn pending_actions(&self) -> Vec<QueuedAction> {
        self.queue.read().await.snapshot()
    }

    /// Record an intended remote mutation.
    ///
    /// Persists the queue and, when online, triggers a drain. Rejects
    /// `max_retries == 0` synchronously.
    ///
    /// # Errors
    /// - `InvalidInput` if `max_retries` is zero
    pub async fn enqueue(
        self: &Arc<Self>,
        kind: ActionKind,
        target: Target,
        payload: Vec<u8>,
        priority: Priority,
        max_retries: u32,
    ) -> Result<ActionId> {
        if max_retries == 0 {
            return Err(Error::InvalidInput(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let action = QueuedAction::new(kind, target, payload, priority, max_retries);
        let id = action.id.clone();
        debug!("Enqueued action {} ({})", id, action.target);

        self.queue.write().await.push(action)?;
        self.persist_queue().await;
        self.notify_state().await;

        if self.observer.current().is_online {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.sync().await;
            });
        }

        Ok(id)
    }

    /// Remove a pending action before it is attempted. Idempotent; safe at
    /// any time because queue mutation serializes behind the engine's locks.
    pub async fn remove(&self, id: &ActionId) {
        let removed = self.queue.write().await.remove(id);
        if removed {
            debug!("Removed action {}", id);
            self.persist_queue().await;
            self.notify_state().await;
        }
    }

    /// Manual drain trigger. No-op when offline, already draining, or after
    /// `cleanup`. Per-action failures are contained; this never errors.
    pub async fn sync(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        // Single-flight: the gate is taken before any suspension point.
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return;
        }

        self.drain().await;
        self.draining.store(false, Ordering::SeqCst);
    }

    /// One full ordered traversal of the queue. Caller holds the
    /// single-flight gate.
    async fn drain(self: &Arc<Self>) {
        if !self.observer.current().is_online {
            debug!("Offline, skipping drain");
            return;
        }

        let snapshot = self.queue.read().await.snapshot();
        info!("Drain pass started: {} pending", snapshot.len());

        let mut removals: Vec<ActionId> = Vec::new();
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut awaiting_retry = 0usize;

        for action in &snapshot {
            match self.executor.execute(&action.target, &action.payload).await {
                Ok(response) => {
                    debug!(
                        "Action {} succeeded (status {})",
                        action.id, response.status
                    );
                    succeeded += 1;
                    removals.push(action.id.clone());
                    let _ = self.events.send(EngineEvent::ActionSucceeded {
                        id: action.id.clone(),
                    });
                }
                Err(failure) if !failure.retryable => {
                    warn!(
                        "Action {} rejected by remote, dropping: {}",
                        action.id, failure.message
                    );
                    failed += 1;
                    removals.push(action.id.clone());
                    let _ = self.events.send(EngineEvent::ActionFailed {
                        id: action.id.clone(),
                        message: failure.message,
                    });
                }
                Err(failure) => {
                    // Removed mid-pass by the caller: nothing left to track.
                    let Some(retry_count) = self.queue.write().await.bump_retry(&action.id)
                    else {
                        continue;
                    };

                    if retry_count >= action.max_retries {
                        warn!(
                            "Action {} exhausted {} retries: {}",
                            action.id, action.max_retries, failure.message
                        );
                        failed += 1;
                        removals.push(action.id.clone());
                        let _ = self.events.send(EngineEvent::ActionFailed {
                            id: action.id.clone(),
                            message: format!(
                                "retries exhausted after {} attempts: {}",
                                retry_count, failure.message
                            ),
                        });
                    } else {
                        let delay = self.config.backoff.delay_for(retry_count);
                        warn!(
                            "Action {} attempt {} failed: {}. Next drain in {:?}",
                            action.id, retry_count, failure.message, delay
                        );
                        awaiting_retry += 1;
                        self.schedule_drain(delay);
                    }
                }
            }
        }

        self.queue.write().await.remove_all(&removals);
        self.persist_queue().await;
        *self.last_sync.write().await = Some(Utc::now());

        info!(
            "Drain pass complete: {} succeeded, {} failed, {} awaiting retry",
            succeeded, failed, awaiting_retry
        );
        self.notify_state().await;
    }

    /// Schedule a future drain trigger without blocking the current pass.
    fn schedule_drain(self: &Arc<Self>, delay: Duration) {
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.sync().await;
            }
        });
    }

    /// Store a value in the read cache, bumping its version.
    pub async fn cache_put(&self, key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) {
        self.cache.write().await.put(key, value, ttl, Utc::now());
        self.persist_cache().await;
        self.notify_state().await;
    }

    /// Read a value from the cache. Expired entries read as a miss and are
    /// lazily evicted.
    pub async fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        let (value, evicted) = self.cache.write().await.get(key, Utc::now());
        if evicted {
            self.persist_cache().await;
        }
        value
    }

    /// Drop all cached values.
    pub async fn cache_clear(&self) {
        self.cache.write().await.clear();
        self.persist_cache().await;
        self.notify_state().await;
    }

    /// Scan the cache and remove every expired entry. Returns the number
    /// evicted. Intended to run at startup and periodically.
    pub async fn evict_expired(&self) -> usize {
        let evicted = self.cache.write().await.evict_expired(Utc::now());
        if evicted > 0 {
            self.persist_cache().await;
        }
        evicted
    }

    /// Write-through persistence of the queue record. Failures are logged
    /// and surfaced, never fatal: the in-memory queue stays authoritative.
    async fn persist_queue(&self) {
        let json = self.queue.read().await.to_json();
        self.persist_record(&self.config.queue_key, json).await;
    }

    async fn persist_cache(&self) {
        let json = self.cache.read().await.to_json();
        self.persist_record(&self.config.cache_key, json).await;
    }

    async fn persist_record(&self, key: &str, json: Result<String>) {
        let result = match json {
            Ok(json) => self.store.save(key, json.into_bytes()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to persist {}: {}", key, e);
            let _ = self.events.send(EngineEvent::PersistenceFailed {
                message: e.to_string(),
            });
        }
    }

    async fn notify_state(&self) {
        let state = self.current_state().await;
        let _ = self.events.send(EngineEvent::StateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityState;
    use crate::executor::{ExecuteFailure, ExecutorResponse};
    use async_trait::async_trait;
    use driftsync_common::ConnectionType;
    use driftsync_store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    /// Executor that records call order and fails scripted endpoints.
    struct ScriptedExecutor {
        calls: StdMutex<Vec<String>>,
        failures: HashMap<String, ExecuteFailure>,
    }

    impl ScriptedExecutor {
        fn ok() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                failures: HashMap::new(),
            }
        }

        fn failing(endpoint: &str, failure: ExecuteFailure) -> Self {
            let mut executor = Self::ok();
            executor.failures.insert(endpoint.to_string(), failure);
            executor
        }

        fn fail(mut self, endpoint: &str, failure: ExecuteFailure) -> Self {
            self.failures.insert(endpoint.to_string(), failure);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            target: &Target,
            _payload: &[u8],
        ) -> std::result::Result<ExecutorResponse, ExecuteFailure> {
            self.calls.lock().unwrap().push(target.endpoint.clone());
            match self.failures.get(&target.endpoint) {
                Some(failure) => Err(failure.clone()),
                None => Ok(ExecutorResponse::status(200)),
            }
        }
    }

    /// Executor that parks inside `execute` until released.
    struct BlockingExecutor {
        calls: StdMutex<u32>,
        release: Semaphore,
    }

    impl BlockingExecutor {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(0),
                release: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for BlockingExecutor {
        async fn execute(
            &self,
            _target: &Target,
            _payload: &[u8],
        ) -> std::result::Result<ExecutorResponse, ExecuteFailure> {
            *self.calls.lock().unwrap() += 1;
            let _permit = self.release.acquire().await.unwrap();
            Ok(ExecutorResponse::status(200))
        }
    }

    struct Harness {
        engine: Arc<SyncEngine>,
        observer: Arc<ConnectivityObserver>,
        store: MemoryStore,
    }

    async fn build(executor: Arc<dyn RemoteExecutor>, config: EngineConfig) -> Harness {
        let store = MemoryStore::new();
        build_over(executor, store, config).await
    }

    async fn build_over(
        executor: Arc<dyn RemoteExecutor>,
        store: MemoryStore,
        config: EngineConfig,
    ) -> Harness {
        let observer = ConnectivityObserver::new();
        let engine = SyncEngine::new(
            executor,
            Arc::new(store.clone()),
            observer.clone(),
            config,
        )
        .await
        .unwrap();
        Harness {
            engine,
            observer,
            store,
        }
    }

    /// Backoff long enough that scheduled retries never fire mid-test.
    fn slow_backoff() -> EngineConfig {
        EngineConfig {
            backoff: BackoffPolicy::new(Duration::from_secs(60)),
            ..EngineConfig::default()
        }
    }

    fn target(endpoint: &str) -> Target {
        Target::new(endpoint, "POST")
    }

    async fn enqueue(
        harness: &Harness,
        endpoint: &str,
        priority: Priority,
        max_retries: u32,
    ) -> ActionId {
        harness
            .engine
            .enqueue(
                ActionKind::Request,
                target(endpoint),
                b"{}".to_vec(),
                priority,
                max_retries,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_rejects_zero_max_retries() {
        let harness = build(Arc::new(ScriptedExecutor::ok()), slow_backoff()).await;

        let result = harness
            .engine
            .enqueue(
                ActionKind::Request,
                target("/x"),
                vec![],
                Priority::Normal,
                0,
            )
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(harness.engine.current_state().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_offline_sync_is_noop() {
        let executor = Arc::new(ScriptedExecutor::ok());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/a", Priority::Normal, 3).await;
        harness.engine.sync().await;

        let state = harness.engine.current_state().await;
        assert_eq!(state.queue_size, 1);
        assert_eq!(state.last_sync_time, None);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drain_succeeds_and_removes_exactly_once() {
        let executor = Arc::new(ScriptedExecutor::ok());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/a", Priority::Normal, 3).await;
        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));

        harness.engine.sync().await;
        assert_eq!(harness.engine.current_state().await.queue_size, 0);
        assert_eq!(executor.calls().len(), 1);

        // A second pass sees nothing to do
        harness.engine.sync().await;
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_respects_priority_then_fifo() {
        let executor = Arc::new(ScriptedExecutor::ok());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/low", Priority::Low, 3).await;
        enqueue(&harness, "/normal-1", Priority::Normal, 3).await;
        enqueue(&harness, "/urgent", Priority::Urgent, 3).await;
        enqueue(&harness, "/normal-2", Priority::Normal, 3).await;

        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));
        harness.engine.sync().await;

        assert_eq!(
            executor.calls(),
            vec!["/urgent", "/normal-1", "/normal-2", "/low"]
        );
    }

    #[tokio::test]
    async fn test_bounded_retries_attempted_exactly_max_times() {
        let executor = Arc::new(ScriptedExecutor::failing(
            "/flaky",
            ExecuteFailure::transient("503"),
        ));
        let harness = build(executor.clone(), slow_backoff()).await;
        let mut events = harness.engine.subscribe();

        enqueue(&harness, "/flaky", Priority::Normal, 3).await;
        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));

        // Drive drains manually; the 60s backoff keeps timers out of the way
        harness.engine.sync().await;
        assert_eq!(executor.calls().len(), 1);
        assert_eq!(harness.engine.current_state().await.queue_size, 1);

        harness.engine.sync().await;
        assert_eq!(executor.calls().len(), 2);

        harness.engine.sync().await;
        assert_eq!(executor.calls().len(), 3);
        assert_eq!(harness.engine.current_state().await.queue_size, 0);

        // Never attempted a fourth time
        harness.engine.sync().await;
        assert_eq!(executor.calls().len(), 3);

        let mut saw_terminal_failure = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::ActionFailed { message, .. } = event {
                assert!(message.contains("retries exhausted"));
                saw_terminal_failure = true;
            }
        }
        assert!(saw_terminal_failure);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_drops_immediately() {
        let executor = Arc::new(ScriptedExecutor::failing(
            "/bad",
            ExecuteFailure::client("400 bad request"),
        ));
        let harness = build(executor.clone(), slow_backoff()).await;
        let mut events = harness.engine.subscribe();

        enqueue(&harness, "/bad", Priority::Normal, 5).await;
        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));
        harness.engine.sync().await;

        assert_eq!(executor.calls().len(), 1);
        assert_eq!(harness.engine.current_state().await.queue_size, 0);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::ActionFailed { message, .. } = event {
                assert_eq!(message, "400 bad request");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_scheduled_retry_drains_again() {
        let executor = Arc::new(ScriptedExecutor::failing(
            "/flaky",
            ExecuteFailure::transient("timeout"),
        ));
        let config = EngineConfig {
            backoff: BackoffPolicy::new(Duration::from_millis(5)),
            ..EngineConfig::default()
        };
        let harness = build(executor.clone(), config).await;
        let mut events = harness.engine.subscribe();

        enqueue(&harness, "/flaky", Priority::Normal, 2).await;
        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));
        harness.engine.sync().await;

        // First attempt failed; the retry timer drives the second attempt,
        // which exhausts the budget and reports terminal failure.
        let deadline = Duration::from_secs(5);
        let failed = timeout(deadline, async {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::ActionFailed { .. }) => break true,
                    Ok(_) => continue,
                    Err(_) => break false,
                }
            }
        })
        .await
        .unwrap();

        assert!(failed);
        assert_eq!(executor.calls().len(), 2);
        assert_eq!(harness.engine.current_state().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let executor = Arc::new(BlockingExecutor::new());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/slow", Priority::Normal, 3).await;
        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));

        let engine = harness.engine.clone();
        let first = tokio::spawn(async move { engine.sync().await });

        // Wait until the first pass is parked inside the executor
        timeout(Duration::from_secs(5), async {
            loop {
                if *executor.calls.lock().unwrap() == 1 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // Second call is a no-op while the first is in flight
        harness.engine.sync().await;
        assert_eq!(*executor.calls.lock().unwrap(), 1);

        executor.release.add_permits(1);
        first.await.unwrap();

        assert_eq!(*executor.calls.lock().unwrap(), 1);
        assert_eq!(harness.engine.current_state().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_edge_triggered_drain() {
        let executor = Arc::new(ScriptedExecutor::ok());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/queued-offline", Priority::Normal, 3).await;
        harness.engine.start();
        let mut events = harness.engine.subscribe();

        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Cellular));

        let drained = timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::ActionSucceeded { .. }) => break true,
                    Ok(_) => continue,
                    Err(_) => break false,
                }
            }
        })
        .await
        .unwrap();

        assert!(drained);
        assert_eq!(harness.engine.current_state().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_restart_durability() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ScriptedExecutor::ok());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/first", Priority::Normal, 3).await;
        enqueue(&harness, "/second", Priority::Urgent, 3).await;
        enqueue(&harness, "/third", Priority::Normal, 3).await;
        let before: Vec<ActionId> = harness
            .engine
            .pending_actions()
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();

        // Fresh engine instance over the same store
        let restarted = build_over(executor, harness.store.clone(), slow_backoff()).await;
        let after: Vec<ActionId> = restarted
            .engine
            .pending_actions()
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();

        assert_eq!(before.len(), 3);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_corrupt_queue_record_starts_empty() {
        let store = MemoryStore::new();
        store
            .save("sync.queue", b"{not json".to_vec())
            .await
            .unwrap();

        let harness = build_over(
            Arc::new(ScriptedExecutor::ok()),
            store,
            slow_backoff(),
        )
        .await;

        assert_eq!(harness.engine.current_state().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_persists() {
        let harness = build(Arc::new(ScriptedExecutor::ok()), slow_backoff()).await;

        let id = enqueue(&harness, "/a", Priority::Normal, 3).await;
        harness.engine.remove(&id).await;
        harness.engine.remove(&id).await;

        assert_eq!(harness.engine.current_state().await.queue_size, 0);

        let restarted = build_over(
            Arc::new(ScriptedExecutor::ok()),
            harness.store.clone(),
            slow_backoff(),
        )
        .await;
        assert_eq!(restarted.engine.current_state().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_expiry_eviction_persists() {
        let harness = build(Arc::new(ScriptedExecutor::ok()), slow_backoff()).await;

        harness
            .engine
            .cache_put("session", b"token".to_vec(), None)
            .await;
        assert_eq!(
            harness.engine.cache_get("session").await,
            Some(b"token".to_vec())
        );

        // Already-expired entry reads as a miss
        harness
            .engine
            .cache_put("stale", b"old".to_vec(), Some(Duration::ZERO))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(harness.engine.cache_get("stale").await, None);

        // The eviction reached the durable record
        let restarted = build_over(
            Arc::new(ScriptedExecutor::ok()),
            harness.store.clone(),
            slow_backoff(),
        )
        .await;
        assert_eq!(restarted.engine.cache_get("stale").await, None);
        assert_eq!(
            restarted.engine.cache_get("session").await,
            Some(b"token".to_vec())
        );
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let harness = build(Arc::new(ScriptedExecutor::ok()), slow_backoff()).await;

        harness.engine.cache_put("a", vec![1], None).await;
        harness.engine.cache_put("b", vec![2], None).await;
        harness.engine.cache_clear().await;

        assert_eq!(harness.engine.cache_get("a").await, None);
        assert_eq!(harness.engine.cache_get("b").await, None);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        // Low-priority action is rejected outright, urgent one succeeds:
        // queue ends empty with one failure and one success notification.
        let executor = Arc::new(
            ScriptedExecutor::ok().fail("/low", ExecuteFailure::client("422 rejected")),
        );
        let harness = build(executor.clone(), slow_backoff()).await;
        let mut events = harness.engine.subscribe();

        let low_id = enqueue(&harness, "/low", Priority::Low, 1).await;
        let urgent_id = enqueue(&harness, "/urgent", Priority::Urgent, 3).await;

        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));
        harness.engine.sync().await;

        // Urgent attempted first
        assert_eq!(executor.calls(), vec!["/urgent", "/low"]);

        let state = harness.engine.current_state().await;
        assert_eq!(state.queue_size, 0);
        assert!(state.last_sync_time.is_some());

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                EngineEvent::ActionSucceeded { id } => successes.push(id),
                EngineEvent::ActionFailed { id, .. } => failures.push(id),
                _ => {}
            }
        }
        assert_eq!(successes, vec![urgent_id]);
        assert_eq!(failures, vec![low_id]);
    }

    #[tokio::test]
    async fn test_cleanup_quiesces_engine_but_keeps_durable_state() {
        let executor = Arc::new(ScriptedExecutor::ok());
        let harness = build(executor.clone(), slow_backoff()).await;

        enqueue(&harness, "/a", Priority::Normal, 3).await;
        harness.engine.start();
        harness.engine.cleanup().await;

        assert_eq!(harness.engine.current_state().await.queue_size, 0);

        // Post-cleanup triggers are no-ops
        harness
            .observer
            .report(ConnectivityState::online(ConnectionType::Wifi));
        harness.engine.sync().await;
        assert!(executor.calls().is_empty());

        // The durable record still holds the action
        let restarted = build_over(
            Arc::new(ScriptedExecutor::ok()),
            harness.store.clone(),
            slow_backoff(),
        )
        .await;
        assert_eq!(restarted.engine.current_state().await.queue_size, 1);
    }
}
