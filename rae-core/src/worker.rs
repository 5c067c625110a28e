//! # Background Worker Loop
//!
//! One cooperative scheduler drives three periodic tasks per tenant:
//! importance decay, hierarchical reflection, and episodic retention
//! pruning. Every task is idempotent, holds an advisory (tenant, task)
//! lock, and emits structured progress events. An overrunning task logs
//! a warning but is never preempted; a second concurrent run of the
//! same (tenant, task) is refused.

use crate::clock::SharedClock;
use crate::config::WorkerConfig;
use crate::decay::{DecayReport, DecayService};
use crate::graph::GraphService;
use crate::reflection::{HierarchicalReflector, HierarchicalReport};
use crate::storage::{ArtifactFilter, MemoryStorage, VectorIndex};
use crate::types::{MemoryLayer, Scope};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// The periodic task classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerTask {
    /// Daily importance decay (plus PageRank refresh).
    Decay,
    /// Hierarchical reflection.
    Reflection,
    /// Episodic retention pruning.
    Prune,
}

impl std::fmt::Display for WorkerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerTask::Decay => write!(f, "decay"),
            WorkerTask::Reflection => write!(f, "reflection"),
            WorkerTask::Prune => write!(f, "prune"),
        }
    }
}

struct TaskLock<'a> {
    locks: &'a Mutex<HashSet<(String, WorkerTask)>>,
    key: (String, WorkerTask),
}

impl Drop for TaskLock<'_> {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.key);
    }
}

/// The scheduler. Tenants are registered explicitly; each spawned loop
/// walks every registered tenant per tick.
pub struct BackgroundWorker {
    storage: Arc<dyn MemoryStorage>,
    vectors: Arc<dyn VectorIndex>,
    graph: GraphService,
    decay: DecayService,
    hierarchical: Arc<HierarchicalReflector>,
    config: WorkerConfig,
    clock: SharedClock,
    tenants: Mutex<Vec<String>>,
    locks: Mutex<HashSet<(String, WorkerTask)>>,
    cancel: CancellationToken,
}

impl BackgroundWorker {
    /// Assemble a worker.
    #[must_use]
    pub fn new(
        storage: Arc<dyn MemoryStorage>,
        vectors: Arc<dyn VectorIndex>,
        graph: GraphService,
        decay: DecayService,
        hierarchical: Arc<HierarchicalReflector>,
        config: WorkerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            storage,
            vectors,
            graph,
            decay,
            hierarchical,
            config,
            clock,
            tenants: Mutex::new(Vec::new()),
            locks: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a tenant for periodic maintenance.
    pub fn register_tenant(&self, tenant: impl Into<String>) {
        let tenant = tenant.into();
        let mut tenants = self.tenants.lock();
        if !tenants.contains(&tenant) {
            tenants.push(tenant);
        }
    }

    fn try_lock(&self, tenant: &str, task: WorkerTask) -> Option<TaskLock<'_>> {
        let key = (tenant.to_string(), task);
        let mut locks = self.locks.lock();
        if locks.contains(&key) {
            return None;
        }
        locks.insert(key.clone());
        Some(TaskLock {
            locks: &self.locks,
            key,
        })
    }

    /// One decay pass over every project of a tenant, followed by a
    /// PageRank refresh. Returns `None` when the (tenant, decay) lock
    /// is already held.
    #[instrument(skip(self))]
    pub async fn run_decay_once(&self, tenant: &str) -> Result<Option<DecayReport>> {
        let Some(_lock) = self.try_lock(tenant, WorkerTask::Decay) else {
            warn!(tenant, "decay already running, refusing concurrent run");
            return Ok(None);
        };

        let mut aggregate = DecayReport::default();
        for project in self.storage.list_projects(tenant).await? {
            let scope = Scope::new(tenant, project)?;
            let report = self.decay.run_tick(self.storage.as_ref(), &scope).await?;
            aggregate.scanned += report.scanned;
            aggregate.decayed += report.decayed;
            aggregate.floored += report.floored;
        }
        let entities = self.graph.recompute_pagerank(tenant).await?;
        info!(
            tenant,
            scanned = aggregate.scanned,
            decayed = aggregate.decayed,
            pagerank_entities = entities,
            "decay task complete"
        );
        Ok(Some(aggregate))
    }

    /// One hierarchical-reflection pass over every project of a tenant.
    #[instrument(skip(self))]
    pub async fn run_reflection_once(
        &self,
        tenant: &str,
    ) -> Result<Option<Vec<HierarchicalReport>>> {
        let Some(_lock) = self.try_lock(tenant, WorkerTask::Reflection) else {
            warn!(tenant, "reflection already running, refusing concurrent run");
            return Ok(None);
        };

        let mut reports = Vec::new();
        for project in self.storage.list_projects(tenant).await? {
            let scope = Scope::new(tenant, project)?;
            let report = self
                .hierarchical
                .run(self.storage.as_ref(), &scope)
                .await?;
            if self.cancel.is_cancelled() {
                break;
            }
            reports.push(report);
        }
        info!(tenant, projects = reports.len(), "reflection task complete");
        Ok(Some(reports))
    }

    /// Prune episodic artifacts beyond retention, cascading into the
    /// vector index and the graph. Returns the number pruned, or `None`
    /// when the lock is held. Retention 0 disables pruning.
    #[instrument(skip(self))]
    pub async fn run_prune_once(&self, tenant: &str) -> Result<Option<usize>> {
        if self.config.episodic_retention_days == 0 {
            return Ok(Some(0));
        }
        let Some(_lock) = self.try_lock(tenant, WorkerTask::Prune) else {
            warn!(tenant, "prune already running, refusing concurrent run");
            return Ok(None);
        };

        let cutoff = self.clock.now()
            - chrono::Duration::days(i64::from(self.config.episodic_retention_days));
        let filter = ArtifactFilter {
            layers: vec![MemoryLayer::Episodic],
            created_before: Some(cutoff),
            ..ArtifactFilter::default()
        };

        let mut pruned = 0usize;
        for project in self.storage.list_projects(tenant).await? {
            let scope = Scope::new(tenant, project)?;
            for artifact in self.storage.list(&scope, &filter).await? {
                if self.storage.delete(&scope, artifact.id).await? {
                    self.vectors.remove(&scope, artifact.id, None).await?;
                    self.graph
                        .store()
                        .delete_for_artifact(tenant, artifact.id)
                        .await?;
                    pruned += 1;
                }
            }
        }
        info!(tenant, pruned, "prune task complete");
        Ok(Some(pruned))
    }

    /// Spawn the three periodic loops. Tasks run at lower priority only
    /// in the sense that they are ordinary tokio tasks yielding at
    /// every I/O boundary; request work is never blocked on them.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_loop(WorkerTask::Decay, self.config.decay_interval_secs),
            self.spawn_loop(WorkerTask::Reflection, self.config.reflection_interval_secs),
            self.spawn_loop(WorkerTask::Prune, self.config.prune_interval_secs),
        ]
    }

    fn spawn_loop(self: &Arc<Self>, task: WorkerTask, interval_secs: u64) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_secs(interval_secs.max(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a freshly
            // started worker does not race engine setup.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = worker.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let started = std::time::Instant::now();
                let tenants: Vec<String> = worker.tenants.lock().clone();
                for tenant in tenants {
                    if worker.cancel.is_cancelled() {
                        return;
                    }
                    let outcome = match task {
                        WorkerTask::Decay => worker
                            .run_decay_once(&tenant)
                            .await
                            .map(|_| ()),
                        WorkerTask::Reflection => worker
                            .run_reflection_once(&tenant)
                            .await
                            .map(|_| ()),
                        WorkerTask::Prune => worker.run_prune_once(&tenant).await.map(|_| ()),
                    };
                    if let Err(error) = outcome {
                        warn!(%task, tenant, %error, "worker task failed, continuing");
                    }
                }
                if started.elapsed() > period {
                    warn!(%task, elapsed = ?started.elapsed(), "task overran its window");
                }
            }
        })
    }

    /// Request cooperative shutdown of all loops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecayConfig, ReflectionConfig};
    use crate::providers::{HookSet, MockEmbeddingProvider, MockLlmProvider};
    use crate::storage::memory::{InMemoryGraphStore, InMemoryStorage, InMemoryVectorIndex};
    use crate::types::MemoryArtifact;
    use chrono::{DateTime, Utc};

    struct FixedClock(DateTime<Utc>);
    impl crate::clock::Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn worker(now: DateTime<Utc>, retention_days: u32) -> (Arc<BackgroundWorker>, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let graph = GraphService::new(Arc::new(InMemoryGraphStore::new()));
        let clock: SharedClock = Arc::new(FixedClock(now));
        let decay = DecayService::new(clock.clone(), DecayConfig::default());
        let hierarchical = Arc::new(HierarchicalReflector::new(
            Arc::new(MockLlmProvider::constant("summary")),
            Arc::new(MockEmbeddingProvider::new(&[("mini", 32)])),
            HookSet::new(),
            ReflectionConfig::default(),
            "mini",
        ));
        let worker = Arc::new(BackgroundWorker::new(
            storage.clone(),
            vectors,
            graph,
            decay,
            hierarchical,
            WorkerConfig {
                episodic_retention_days: retention_days,
                ..WorkerConfig::default()
            },
            clock,
        ));
        worker.register_tenant("t");
        (worker, storage)
    }

    fn scope() -> Scope {
        Scope::new("t", "p").unwrap()
    }

    #[tokio::test]
    async fn test_prune_removes_only_expired_episodic() {
        let now = Utc::now();
        let (worker, storage) = worker(now, 30);

        let mut old_episode =
            MemoryArtifact::new(scope(), MemoryLayer::Episodic, "stale".into());
        old_episode.created_at = now - chrono::Duration::days(45);
        storage.insert(&old_episode).await.unwrap();

        let fresh_episode = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "fresh".into());
        storage.insert(&fresh_episode).await.unwrap();

        let mut old_fact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "keep".into());
        old_fact.created_at = now - chrono::Duration::days(400);
        storage.insert(&old_fact).await.unwrap();

        let pruned = worker.run_prune_once("t").await.unwrap().unwrap();
        assert_eq!(pruned, 1);
        assert!(storage.get(&scope(), old_episode.id).await.unwrap().is_none());
        assert!(storage.get(&scope(), fresh_episode.id).await.unwrap().is_some());
        assert!(storage.get(&scope(), old_fact.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retention_zero_disables_pruning() {
        let now = Utc::now();
        let (worker, storage) = worker(now, 0);
        let mut ancient = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "old".into());
        ancient.created_at = now - chrono::Duration::days(1000);
        storage.insert(&ancient).await.unwrap();

        assert_eq!(worker.run_prune_once("t").await.unwrap(), Some(0));
        assert!(storage.get(&scope(), ancient.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_decay_walks_all_projects() {
        let now = Utc::now();
        let (worker, storage) = worker(now, 30);
        for project in ["p1", "p2"] {
            let scope = Scope::new("t", project).unwrap();
            let mut artifact = MemoryArtifact::new(scope, MemoryLayer::Episodic, "x".into());
            artifact.last_accessed_at = now - chrono::Duration::days(10);
            storage.insert(&artifact).await.unwrap();
        }
        let report = worker.run_decay_once("t").await.unwrap().unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.decayed, 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_task_refused() {
        let now = Utc::now();
        let (worker, _) = worker(now, 30);
        let _held = worker.try_lock("t", WorkerTask::Decay).unwrap();
        assert!(worker.run_decay_once("t").await.unwrap().is_none());
        // A different task for the same tenant is fine.
        assert!(worker.run_prune_once("t").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_released_after_run() {
        let now = Utc::now();
        let (worker, _) = worker(now, 30);
        assert!(worker.run_decay_once("t").await.unwrap().is_some());
        assert!(worker.run_decay_once("t").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let now = Utc::now();
        let (worker, _) = worker(now, 30);
        let handles = worker.spawn();
        worker.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
