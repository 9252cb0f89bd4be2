//! Mapping engine.
//!
//! `map_batch` normalizes and validates the submitted points, partitions the
//! valid ones by device, slices them into sub-batches and returns a
//! [`BatchHandle`] right away. A background task then
//!
//! 1. creates missing device groups and device instances,
//! 2. drains the sub-batches through a bounded worker pool, each worker
//!    calling the oracle adapter once and committing the accepted candidates
//!    under the per-device lock,
//! 3. moves the batch to `completed` or `failed`.
//!
//! The whole run sits under the batch timeout. Records already committed
//! when a batch fails are kept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::MapperConfig;
use crate::error::{MapperError, Result};
use crate::model::{DeviceGroup, DeviceInstance, MappingRecord, RawPoint, ResolvedPoint, SourceId};
use crate::normalizer::{normalize_points, NormalizedPoint};
use crate::oracle::{Candidate, MappingOracle, OracleAdapter, OraclePoint};
use crate::progress::{BatchStatus, BatchTracker, ProgressRegistry, TaskStatusReport};
use crate::store::MappingStore;
use crate::validator::Validator;

type DeviceLocks = DashMap<String, Arc<Mutex<()>>>;

/// Held per-device lock. Dropping it removes the map entry once no other
/// task holds or waits on the same key.
struct DeviceLockGuard<'a> {
    locks: &'a DeviceLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Orchestrates mapping batches.
pub struct MappingEngine {
    config: RwLock<MapperConfig>,
    adapter: OracleAdapter,
    store: Arc<dyn MappingStore>,
    registry: Arc<ProgressRegistry>,
    device_locks: Arc<DeviceLocks>,
}

impl MappingEngine {
    /// Create an engine. Fails on an invalid configuration.
    pub fn new(
        config: MapperConfig,
        oracle: Arc<dyn MappingOracle>,
        store: Arc<dyn MappingStore>,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            oracle = oracle.name(),
            max_points_per_batch = config.max_points_per_batch,
            oracle_concurrency = config.oracle_concurrency,
            threshold = config.acceptance_confidence_threshold,
            "Mapping engine ready"
        );
        Ok(Self {
            adapter: OracleAdapter::new(oracle, &config),
            config: RwLock::new(config),
            store,
            registry: Arc::new(ProgressRegistry::new()),
            device_locks: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> MapperConfig {
        self.config.read().clone()
    }

    pub fn acceptance_threshold(&self) -> f32 {
        self.config.read().acceptance_confidence_threshold
    }

    /// Tune the acceptance threshold for batches submitted from now on.
    pub fn set_acceptance_threshold(&self, threshold: f32) -> Result<()> {
        let updated = self.config().with_acceptance_threshold(threshold);
        updated.validate()?;
        *self.config.write() = updated;
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    /// Submit a batch.
    ///
    /// `batch_size_limit` caps the sub-batch size below `maxPointsPerBatch`.
    /// Configuration problems fail here, before anything is scheduled.
    /// Malformed points are counted as errors right away.
    pub fn map_batch(
        &self,
        points: Vec<RawPoint>,
        batch_size_limit: Option<usize>,
    ) -> Result<BatchHandle> {
        let config = self.config();
        config.validate()?;
        let sub_batch_size = match batch_size_limit {
            Some(0) => {
                return Err(MapperError::Config(
                    "batch size limit must be greater than 0".into(),
                ))
            }
            Some(limit) => limit.min(config.max_points_per_batch),
            None => config.max_points_per_batch,
        };

        let validator = Validator::from_config(&config);
        let mut rejected = 0;
        let mut valid = Vec::with_capacity(points.len());
        for outcome in normalize_points(&points) {
            match outcome {
                Ok(point) => match validator.check_point_name(&point.point) {
                    Ok(()) => valid.push(point),
                    Err(issue) => {
                        tracing::debug!(point = %point.raw, issue = %issue, "Rejected point name");
                        rejected += 1;
                    }
                },
                Err(rejection) => {
                    tracing::debug!(point = %rejection.raw, reason = %rejection.reason, "Rejected point");
                    rejected += 1;
                }
            }
        }

        let plan = BatchPlan::new(valid, sub_batch_size);
        let task_id = uuid::Uuid::new_v4().to_string();
        let tracker = Arc::new(BatchTracker::new(
            task_id.clone(),
            points.len(),
            plan.sub_batches.len(),
        ));
        if rejected > 0 {
            tracker.record_rejected(rejected);
        }
        self.registry.register(tracker.clone());

        tracing::info!(
            task_id = %task_id,
            points = points.len(),
            rejected,
            devices = plan.devices.len(),
            sub_batches = plan.sub_batches.len(),
            "Mapping batch submitted"
        );

        let run = Arc::new(BatchRun {
            task_id: task_id.clone(),
            tracker: tracker.clone(),
            adapter: self.adapter.clone(),
            store: self.store.clone(),
            device_locks: self.device_locks.clone(),
            threshold: config.acceptance_confidence_threshold,
            concurrency: config.oracle_concurrency,
            batch_timeout: config.batch_timeout(),
            groups: RwLock::new(HashMap::new()),
        });
        let join = tokio::spawn(run.run(plan));

        Ok(BatchHandle {
            task_id,
            tracker,
            join,
        })
    }

    /// Submit a batch and wait for its terminal report.
    pub async fn run_batch(
        &self,
        points: Vec<RawPoint>,
        batch_size_limit: Option<usize>,
    ) -> Result<TaskStatusReport> {
        self.map_batch(points, batch_size_limit)?.wait().await
    }

    /// Current report of a task not yet acknowledged.
    pub fn progress(&self, task_id: &str) -> Option<TaskStatusReport> {
        self.registry.status(task_id)
    }

    /// Request cooperative cancellation of a task.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let tracker = self
            .registry
            .get(task_id)
            .ok_or_else(|| MapperError::NotFound(format!("task {}", task_id)))?;
        tracker.request_cancel();
        Ok(())
    }

    /// Forget a finished task, returning its final report.
    pub fn acknowledge(&self, task_id: &str) -> Result<TaskStatusReport> {
        self.registry.acknowledge(task_id)
    }
}

/// Caller's side of a submitted batch.
pub struct BatchHandle {
    task_id: String,
    tracker: Arc<BatchTracker>,
    join: JoinHandle<()>,
}

impl BatchHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> TaskStatusReport {
        self.tracker.snapshot()
    }

    pub fn tracker(&self) -> Arc<BatchTracker> {
        self.tracker.clone()
    }

    /// Stop scheduling further sub-batches; in-flight ones still commit.
    pub fn cancel(&self) {
        tracing::info!(task_id = %self.task_id, "Cancellation requested");
        self.tracker.request_cancel();
    }

    /// Wait for the terminal state.
    pub async fn wait(self) -> Result<TaskStatusReport> {
        if let Err(e) = self.join.await {
            tracing::error!(task_id = %self.task_id, error = %e, "Batch task ended abnormally");
            self.tracker
                .finish(BatchStatus::Failed, Some(format!("batch task ended abnormally: {}", e)));
            return Err(e.into());
        }
        Ok(self.tracker.snapshot())
    }
}

/// Device partition and sub-batch slicing of the valid points.
struct BatchPlan {
    /// Device id -> device type, in first-seen order
    devices: Vec<(String, String)>,
    /// Device type -> cleaned points seen for it, in first-seen order
    templates: Vec<(String, Vec<String>)>,
    sub_batches: Vec<Vec<NormalizedPoint>>,
}

impl BatchPlan {
    fn new(points: Vec<NormalizedPoint>, sub_batch_size: usize) -> Self {
        let mut devices: Vec<(String, String)> = Vec::new();
        let mut by_device: Vec<Vec<NormalizedPoint>> = Vec::new();
        let mut device_index: HashMap<String, usize> = HashMap::new();
        let mut templates: Vec<(String, Vec<String>)> = Vec::new();
        let mut template_index: HashMap<String, usize> = HashMap::new();

        for point in points {
            let t = *template_index
                .entry(point.device_type.clone())
                .or_insert_with(|| {
                    templates.push((point.device_type.clone(), Vec::new()));
                    templates.len() - 1
                });
            if !templates[t].1.contains(&point.point) {
                templates[t].1.push(point.point.clone());
            }

            let d = *device_index.entry(point.device_id.clone()).or_insert_with(|| {
                devices.push((point.device_id.clone(), point.device_type.clone()));
                by_device.push(Vec::new());
                by_device.len() - 1
            });
            by_device[d].push(point);
        }

        let ordered: Vec<NormalizedPoint> = by_device.into_iter().flatten().collect();
        let sub_batches = ordered
            .chunks(sub_batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        Self {
            devices,
            templates,
            sub_batches,
        }
    }
}

/// How a sub-batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubBatchOutcome {
    Committed,
    OracleFailed,
    StoreFailed,
}

/// One accepted candidate waiting for commit.
struct Accepted {
    point: String,
    path: String,
    confidence: f32,
    justification: String,
}

/// State shared by the workers of one batch.
struct BatchRun {
    task_id: String,
    tracker: Arc<BatchTracker>,
    adapter: OracleAdapter,
    store: Arc<dyn MappingStore>,
    device_locks: Arc<DeviceLocks>,
    threshold: f32,
    concurrency: usize,
    batch_timeout: Duration,
    /// Group templates by device type, loaded during preparation
    groups: RwLock<HashMap<String, DeviceGroup>>,
}

impl BatchRun {
    async fn run(self: Arc<Self>, plan: BatchPlan) {
        self.tracker.start();

        let outcome = tokio::time::timeout(self.batch_timeout, self.clone().process(plan)).await;
        let (status, error) = match outcome {
            Ok(Ok(outcomes)) => {
                let store_failures = outcomes
                    .iter()
                    .filter(|o| **o == SubBatchOutcome::StoreFailed)
                    .count();
                if !outcomes.is_empty() && store_failures == outcomes.len() {
                    (
                        BatchStatus::Failed,
                        Some("persistence store unreachable for every sub-batch".to_string()),
                    )
                } else {
                    (BatchStatus::Completed, None)
                }
            }
            Ok(Err(e)) => {
                tracing::error!(task_id = %self.task_id, error = %e, "Mapping batch failed");
                (BatchStatus::Failed, Some(e.to_string()))
            }
            Err(_) => {
                let err = MapperError::Timeout(self.batch_timeout.as_secs());
                tracing::error!(task_id = %self.task_id, error = %err, "Mapping batch timed out");
                (BatchStatus::Failed, Some(err.to_string()))
            }
        };

        self.tracker.finish(status, error);
        let stats = self.tracker.stats();
        tracing::info!(
            task_id = %self.task_id,
            status = %status,
            completed_batches = self.tracker.completed_batches(),
            total_batches = self.tracker.total_batches(),
            mapped = stats.mapped,
            errors = stats.errors,
            skipped = stats.skipped,
            "Mapping batch finished"
        );
    }

    async fn process(self: Arc<Self>, plan: BatchPlan) -> Result<Vec<SubBatchOutcome>> {
        if plan.sub_batches.is_empty() {
            return Ok(Vec::new());
        }
        self.prepare(&plan).await?;
        self.drain(plan.sub_batches).await
    }

    async fn lock_device(&self, key: &str) -> DeviceLockGuard<'_> {
        let lock = self
            .device_locks
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        DeviceLockGuard {
            locks: &self.device_locks,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Create device groups and instances seen for the first time.
    async fn prepare(&self, plan: &BatchPlan) -> Result<()> {
        let mut groups: HashMap<String, DeviceGroup> = HashMap::new();
        for (device_type, points) in &plan.templates {
            let group = self.ensure_group(device_type, points).await?;
            groups.insert(device_type.clone(), group);
        }

        for (device_id, device_type) in &plan.devices {
            let _guard = self.lock_device(device_id).await;
            let instance = match self.store.load_instance(device_id).await? {
                Some(instance) => instance,
                None => {
                    let instance = DeviceInstance::new(device_id.clone(), device_type.clone());
                    self.store.save_instance(&instance).await?;
                    tracing::debug!(task_id = %self.task_id, device_id = %device_id, "Created device instance");
                    instance
                }
            };
            if !groups.contains_key(&instance.device_type) {
                let group = self.ensure_group(&instance.device_type, &[]).await?;
                groups.insert(instance.device_type.clone(), group);
            }
        }

        *self.groups.write() = groups;
        Ok(())
    }

    async fn ensure_group(&self, device_type: &str, points: &[String]) -> Result<DeviceGroup> {
        let _guard = self.lock_device(&format!("group:{}", device_type)).await;
        if let Some(group) = self.store.load_group(device_type).await? {
            return Ok(group);
        }
        let group = DeviceGroup::new(device_type, points.to_vec());
        self.store.save_group(&group).await?;
        tracing::info!(
            task_id = %self.task_id,
            device_type = %device_type,
            points = group.raw_points.len(),
            "Created device group"
        );
        Ok(group)
    }

    /// Run sub-batches through the worker pool until done or cancelled.
    async fn drain(
        self: Arc<Self>,
        sub_batches: Vec<Vec<NormalizedPoint>>,
    ) -> Result<Vec<SubBatchOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut queue = sub_batches.into_iter().enumerate();

        while let Some((index, points)) = queue.next() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| MapperError::Task(e.to_string()))?;

            if self.tracker.is_cancel_requested() {
                let unscheduled = points.len() + queue.by_ref().map(|(_, p)| p.len()).sum::<usize>();
                tracing::info!(
                    task_id = %self.task_id,
                    sub_batch = index,
                    points = unscheduled,
                    "Batch cancelled, not scheduling remaining sub-batches"
                );
                break;
            }

            let run = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                run.run_sub_batch(index, points).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = workers.join_next().await {
            outcomes.push(joined?);
        }
        Ok(outcomes)
    }

    async fn run_sub_batch(
        self: Arc<Self>,
        index: usize,
        points: Vec<NormalizedPoint>,
    ) -> SubBatchOutcome {
        tracing::debug!(
            task_id = %self.task_id,
            sub_batch = index,
            points = points.len(),
            "Sub-batch started"
        );

        let request = points
            .iter()
            .map(|p| OraclePoint::new(p.point.clone(), p.device_type.clone()))
            .collect();
        let candidates = match self.adapter.resolve(request).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    sub_batch = index,
                    points = points.len(),
                    oracle = self.adapter.oracle_name(),
                    error = %e,
                    "Oracle call failed, sub-batch unresolved"
                );
                self.tracker.record_sub_batch(0, points.len(), Vec::new());
                return SubBatchOutcome::OracleFailed;
            }
        };

        let mut errors = 0;
        let mut accepted: Vec<(String, Vec<Accepted>)> = Vec::new();
        for (point, candidate) in points.into_iter().zip(candidates) {
            match self.accept(candidate) {
                Some((path, confidence, justification)) => {
                    let entry = Accepted {
                        point: point.point,
                        path,
                        confidence,
                        justification,
                    };
                    match accepted.last_mut() {
                        Some((device_id, batch)) if *device_id == point.device_id => batch.push(entry),
                        _ => accepted.push((point.device_id, vec![entry])),
                    }
                }
                None => errors += 1,
            }
        }

        // The commit runs detached: aborting this worker on batch timeout
        // must not leave records that never reached their device instance.
        let run = self.clone();
        let commit =
            tokio::spawn(async move { run.commit_sub_batch(index, accepted, errors).await });
        match commit.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    task_id = %self.task_id,
                    sub_batch = index,
                    error = %e,
                    "Commit task ended abnormally"
                );
                SubBatchOutcome::StoreFailed
            }
        }
    }

    async fn commit_sub_batch(
        &self,
        index: usize,
        accepted: Vec<(String, Vec<Accepted>)>,
        mut errors: usize,
    ) -> SubBatchOutcome {
        let mut mapped = 0;
        let mut committed = Vec::new();
        let mut store_failed = false;
        for (device_id, entries) in accepted {
            let count = entries.len();
            let (records, failure) = self.commit_device(&device_id, entries).await;
            let written = records.len();
            mapped += written;
            committed.extend(records);
            if let Some(e) = failure {
                tracing::error!(
                    task_id = %self.task_id,
                    sub_batch = index,
                    device_id = %device_id,
                    points = count - written,
                    error = %e,
                    "Failed to commit mappings"
                );
                errors += count - written;
                store_failed = true;
            }
        }

        self.tracker.record_sub_batch(mapped, errors, committed);
        tracing::info!(
            task_id = %self.task_id,
            sub_batch = index,
            mapped,
            errors,
            "Sub-batch committed"
        );

        if store_failed && mapped == 0 {
            SubBatchOutcome::StoreFailed
        } else {
            SubBatchOutcome::Committed
        }
    }

    /// Confidence gate. A zero-confidence candidate is never accepted, which
    /// is what the validator's forced 0 relies on.
    fn accept(&self, candidate: Candidate) -> Option<(String, f32, String)> {
        match candidate {
            Candidate::Resolved {
                path,
                confidence,
                justification,
            } if confidence > 0.0 && confidence >= self.threshold => {
                Some((path, confidence, justification))
            }
            _ => None,
        }
    }

    /// Upsert records and merge them into the device instance.
    ///
    /// Stops at the first failed upsert. The instance is still saved with
    /// every record written before it, and those records are returned
    /// alongside the error.
    async fn commit_device(
        &self,
        device_id: &str,
        entries: Vec<Accepted>,
    ) -> (Vec<MappingRecord>, Option<MapperError>) {
        let _guard = self.lock_device(device_id).await;

        let mut instance = match self.store.load_instance(device_id).await {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                let err = MapperError::NotFound(format!("device instance {}", device_id));
                return (Vec::new(), Some(err));
            }
            Err(e) => return (Vec::new(), Some(e)),
        };

        let mut records = Vec::with_capacity(entries.len());
        let mut failure = None;
        for entry in entries {
            let record = MappingRecord::new(
                SourceId::new(device_id, entry.point.clone()),
                entry.path.clone(),
                entry.confidence,
                entry.justification,
            );
            if let Err(e) = self.store.upsert_record(&record).await {
                failure = Some(e);
                break;
            }
            instance.merge(
                entry.point,
                ResolvedPoint {
                    enos_path: entry.path,
                    confidence: entry.confidence,
                },
            );
            records.push(record);
        }
        if records.is_empty() {
            return (records, failure);
        }

        let group = self.groups.read().get(&instance.device_type).cloned();
        if let Some(group) = group {
            let before = instance.status;
            let after = instance.refresh_status(&group, self.threshold);
            if before != after {
                tracing::debug!(
                    task_id = %self.task_id,
                    device_id = %device_id,
                    from = %before,
                    to = %after,
                    "Device status changed"
                );
            }
        }
        match self.store.save_instance(&instance).await {
            Ok(()) => (records, failure),
            Err(e) => (Vec::new(), Some(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceStatus;
    use crate::oracle::StaticOracle;
    use crate::store::MemoryStore;

    fn point(name: &str, device: &str) -> NormalizedPoint {
        NormalizedPoint {
            device_id: device.to_string(),
            device_type: "AHU".to_string(),
            point: name.to_string(),
            raw: name.to_string(),
        }
    }

    #[test]
    fn test_plan_groups_points_by_device() {
        let plan = BatchPlan::new(
            vec![
                point("SATEMP", "AHU-1"),
                point("SATEMP", "AHU-2"),
                point("RATEMP", "AHU-1"),
            ],
            2,
        );
        assert_eq!(plan.devices.len(), 2);
        assert_eq!(
            plan.templates,
            vec![(
                "AHU".to_string(),
                vec!["SATEMP".to_string(), "RATEMP".to_string()]
            )]
        );
        assert_eq!(plan.sub_batches.len(), 2);
        assert_eq!(plan.sub_batches[0][0].device_id, "AHU-1");
        assert_eq!(plan.sub_batches[0][1].device_id, "AHU-1");
        assert_eq!(plan.sub_batches[1][0].device_id, "AHU-2");
    }

    #[tokio::test]
    async fn test_rejects_zero_batch_size_limit() {
        let engine = MappingEngine::new(
            MapperConfig::default(),
            Arc::new(StaticOracle::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let result = engine.map_batch(vec![RawPoint::new("AHU-1_SaTemp")], Some(0));
        assert!(matches!(result, Err(MapperError::Config(_))));
    }

    #[tokio::test]
    async fn test_malformed_points_counted_as_errors() {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(StaticOracle::new().with_fallback_confidence(0.9));
        let engine = MappingEngine::new(MapperConfig::default(), oracle, store).unwrap();

        let report = engine
            .run_batch(
                vec![
                    RawPoint::new("AHU-1_SaTemp"),
                    RawPoint::new("Sa%Temp").with_device("AHU-1"),
                    RawPoint::new("   "),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.stats.total, 3);
        assert_eq!(report.stats.mapped, 1);
        assert_eq!(report.stats.errors, 2);
        assert_eq!(report.total_batches, 1);
    }

    #[tokio::test]
    async fn test_all_invalid_batch_completes_immediately() {
        let oracle = Arc::new(StaticOracle::new());
        let engine = MappingEngine::new(
            MapperConfig::default(),
            oracle.clone(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let report = engine.run_batch(vec![RawPoint::new("CHWRT")], None).await.unwrap();
        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.total_batches, 0);
        assert_eq!(report.progress, 1.0);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_keeps_existing_mapping() {
        let store = Arc::new(MemoryStore::new());
        let first = Arc::new(StaticOracle::new().with_mapping("SATEMP", "AHU/points/SA_Temp", 0.9));
        let engine = MappingEngine::new(MapperConfig::default(), first, store.clone()).unwrap();
        engine
            .run_batch(vec![RawPoint::new("AHU-1_SaTemp")], None)
            .await
            .unwrap();

        let second = Arc::new(StaticOracle::new().with_mapping("SATEMP", "AHU/points/Other", 0.3));
        let engine = MappingEngine::new(MapperConfig::default(), second, store.clone()).unwrap();
        let report = engine
            .run_batch(vec![RawPoint::new("AHU-1_SaTemp")], None)
            .await
            .unwrap();
        assert_eq!(report.stats.errors, 1);

        let record = store
            .load_record(&SourceId::new("AHU-1", "SATEMP"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.enos_path, "AHU/points/SA_Temp");
        let instance = store.load_instance("AHU-1").await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Complete);
    }

    #[tokio::test]
    async fn test_threshold_is_read_per_batch() {
        let oracle = Arc::new(StaticOracle::new().with_mapping("SATEMP", "AHU/points/SA_Temp", 0.6));
        let engine =
            MappingEngine::new(MapperConfig::default(), oracle, Arc::new(MemoryStore::new())).unwrap();

        let report = engine
            .run_batch(vec![RawPoint::new("AHU-1_SaTemp")], None)
            .await
            .unwrap();
        assert_eq!(report.stats.mapped, 0);

        engine.set_acceptance_threshold(0.5).unwrap();
        assert!(engine.set_acceptance_threshold(1.2).is_err());
        assert_eq!(engine.acceptance_threshold(), 0.5);

        let report = engine
            .run_batch(vec![RawPoint::new("AHU-1_SaTemp")], None)
            .await
            .unwrap();
        assert_eq!(report.stats.mapped, 1);
        assert_eq!(report.mappings.len(), 1);
    }

    #[tokio::test]
    async fn test_device_locks_released_after_batch() {
        let oracle = Arc::new(StaticOracle::new().with_fallback_confidence(0.9));
        let engine =
            MappingEngine::new(MapperConfig::default(), oracle, Arc::new(MemoryStore::new())).unwrap();

        let points = (1..=5)
            .map(|i| RawPoint::new(format!("AHU-{}_SaTemp", i)))
            .collect();
        let report = engine.run_batch(points, Some(2)).await.unwrap();
        assert_eq!(report.stats.mapped, 5);
        assert!(engine.device_locks.is_empty());
    }
}
