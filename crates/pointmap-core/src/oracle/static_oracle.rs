//! Deterministic table-backed oracle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Candidate, MappingOracle, OracleError, OracleRequest, OracleResponse};
use crate::normalizer::clean_point_name;

/// Answers from a fixed table keyed by cleaned point name.
///
/// Can be scripted to fail selected calls, which is how partial-failure
/// handling is exercised without a real inference service.
#[derive(Default)]
pub struct StaticOracle {
    table: HashMap<String, Candidate>,
    /// Confidence for points missing from the table; `None` leaves them unresolved
    fallback_confidence: Option<f32>,
    failing_calls: HashSet<usize>,
    failing_points: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    request_sizes: Mutex<Vec<usize>>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a point to `path` with a generic justification.
    pub fn with_mapping(self, point: &str, path: impl Into<String>, confidence: f32) -> Self {
        let justification = format!("static table entry for {}", point.trim());
        self.with_candidate(point, Candidate::resolved(path, confidence, justification))
    }

    /// Answer `point` with an arbitrary candidate, valid or not.
    pub fn with_candidate(mut self, point: &str, candidate: Candidate) -> Self {
        self.table.insert(clean_point_name(point), candidate);
        self
    }

    /// Resolve points missing from the table to `{device_type}/points/{point}`.
    pub fn with_fallback_confidence(mut self, confidence: f32) -> Self {
        self.fallback_confidence = Some(confidence);
        self
    }

    /// Fail the `index`-th call (0-based) with a transport error.
    pub fn fail_call(mut self, index: usize) -> Self {
        self.failing_calls.insert(index);
        self
    }

    /// Fail every call whose request contains `point`.
    pub fn fail_on_point(mut self, point: &str) -> Self {
        self.failing_points.insert(clean_point_name(point));
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Size of every request received, in arrival order.
    pub fn request_sizes(&self) -> Vec<usize> {
        self.request_sizes.lock().clone()
    }

    fn answer(&self, name: &str, device_type: &str) -> Candidate {
        if let Some(candidate) = self.table.get(name) {
            return candidate.clone();
        }
        match self.fallback_confidence {
            Some(confidence) => Candidate::resolved(
                format!("{}/points/{}", device_type, name),
                confidence,
                "static fallback",
            ),
            None => Candidate::Unresolved,
        }
    }
}

#[async_trait]
impl MappingOracle for StaticOracle {
    fn name(&self) -> &str {
        "static"
    }

    async fn propose(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.request_sizes.lock().push(request.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_calls.contains(&call)
            || request
                .points
                .iter()
                .any(|p| self.failing_points.contains(&p.name))
        {
            return Err(OracleError::Transport(format!("scripted failure on call {}", call)));
        }

        Ok(OracleResponse::new(
            request
                .points
                .iter()
                .map(|p| self.answer(&p.name, &p.device_type))
                .collect(),
        ))
    }
}
