//! Batch progress tracking.
//!
//! A [`BatchTracker`] is shared between the workers of one batch and any
//! number of pollers. Counters are atomics bumped once per sub-batch commit;
//! `completedBatches` is bumped last so a poller never sees a completed
//! sub-batch without its stats.
//!
//! State machine: `queued -> running -> completed | failed`.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{MapperError, Result};
use crate::model::MappingRecord;

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BatchStatus::Queued => 0,
            BatchStatus::Running => 1,
            BatchStatus::Completed => 2,
            BatchStatus::Failed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => BatchStatus::Queued,
            1 => BatchStatus::Running,
            2 => BatchStatus::Completed,
            _ => BatchStatus::Failed,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate point counters of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub mapped: usize,
    pub errors: usize,
    /// Points never processed (cancellation, batch timeout, fatal error)
    pub skipped: usize,
}

/// Snapshot served to a caller polling a task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub success: bool,
    pub status: BatchStatus,
    pub task_id: String,
    pub batch_mode: bool,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub progress: f64,
    pub total_points: usize,
    /// Records accepted by this batch so far
    pub mappings: Vec<MappingRecord>,
    pub stats: BatchStats,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Shared progress state of one batch.
#[derive(Debug)]
pub struct BatchTracker {
    task_id: String,
    total_batches: usize,
    total_points: usize,
    state: AtomicU8,
    completed_batches: AtomicUsize,
    mapped: AtomicUsize,
    errors: AtomicUsize,
    skipped: AtomicUsize,
    cancel_requested: AtomicBool,
    error: Mutex<Option<String>>,
    mappings: Mutex<Vec<MappingRecord>>,
    submitted_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl BatchTracker {
    pub fn new(task_id: impl Into<String>, total_points: usize, total_batches: usize) -> Self {
        Self {
            task_id: task_id.into(),
            total_batches,
            total_points,
            state: AtomicU8::new(BatchStatus::Queued.as_u8()),
            completed_batches: AtomicUsize::new(0),
            mapped: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            cancel_requested: AtomicBool::new(false),
            error: Mutex::new(None),
            mappings: Mutex::new(Vec::new()),
            submitted_at: Utc::now(),
            finished_at: Mutex::new(None),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    pub fn status(&self) -> BatchStatus {
        BatchStatus::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn completed_batches(&self) -> usize {
        self.completed_batches.load(Ordering::Acquire)
    }

    /// `completedBatches / totalBatches`; an empty batch counts as done.
    pub fn progress(&self) -> f64 {
        progress_of(self.completed_batches(), self.total_batches)
    }

    /// `queued -> running`. Returns false if the batch already left `queued`.
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(
                BatchStatus::Queued.as_u8(),
                BatchStatus::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Points excluded before scheduling (malformed names).
    pub fn record_rejected(&self, points: usize) {
        let _publish = self.mappings.lock();
        self.errors.fetch_add(points, Ordering::AcqRel);
    }

    /// Publish one finished sub-batch.
    ///
    /// Ignored once the batch is terminal: a worker aborted by the batch
    /// timeout may still be unwinding. Returns whether it was counted.
    pub fn record_sub_batch(&self, mapped: usize, errors: usize, records: Vec<MappingRecord>) -> bool {
        let mut mappings = self.mappings.lock();
        if self.status().is_terminal() {
            return false;
        }
        mappings.extend(records);
        self.mapped.fetch_add(mapped, Ordering::AcqRel);
        self.errors.fetch_add(errors, Ordering::AcqRel);
        let done = self.completed_batches.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(done <= self.total_batches);
        true
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Move to a terminal state.
    ///
    /// Points neither mapped nor counted as errors are booked as skipped, so
    /// `mapped + errors + skipped == total` from here on. A batch finishes
    /// once; later calls are ignored and return false.
    pub fn finish(&self, status: BatchStatus, error: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        let _publish = self.mappings.lock();
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if BatchStatus::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                status.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let accounted = self.mapped.load(Ordering::Acquire) + self.errors.load(Ordering::Acquire);
        self.skipped.store(
            self.total_points.saturating_sub(accounted),
            Ordering::Release,
        );
        if error.is_some() {
            *self.error.lock() = error;
        }
        *self.finished_at.lock() = Some(Utc::now());
        true
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            total: self.total_points,
            mapped: self.mapped.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
        }
    }

    pub fn snapshot(&self) -> TaskStatusReport {
        let mappings = self.mappings.lock();
        let status = self.status();
        let completed_batches = self.completed_batches();
        TaskStatusReport {
            success: status != BatchStatus::Failed,
            status,
            task_id: self.task_id.clone(),
            batch_mode: true,
            total_batches: self.total_batches,
            completed_batches,
            progress: progress_of(completed_batches, self.total_batches),
            total_points: self.total_points,
            mappings: mappings.clone(),
            stats: self.stats(),
            cancelled: self.is_cancel_requested(),
            error: self.error.lock().clone(),
            submitted_at: self.submitted_at,
            finished_at: *self.finished_at.lock(),
        }
    }
}

fn progress_of(completed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    }
}

/// Trackers of every batch not yet acknowledged, by task id.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    trackers: DashMap<String, Arc<BatchTracker>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tracker: Arc<BatchTracker>) {
        self.trackers.insert(tracker.task_id().to_string(), tracker);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<BatchTracker>> {
        self.trackers.get(task_id).map(|entry| entry.value().clone())
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatusReport> {
        self.get(task_id).map(|tracker| tracker.snapshot())
    }

    /// Drop a finished batch, returning its final report.
    pub fn acknowledge(&self, task_id: &str) -> Result<TaskStatusReport> {
        let tracker = self
            .get(task_id)
            .ok_or_else(|| MapperError::NotFound(format!("task {}", task_id)))?;
        if !tracker.status().is_terminal() {
            return Err(MapperError::InvalidInput(format!(
                "task {} is still {}",
                task_id,
                tracker.status()
            )));
        }
        self.trackers.remove(task_id);
        Ok(tracker.snapshot())
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.trackers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
