//! Bounded, validated oracle calls.

use std::sync::Arc;
use std::time::Duration;

use super::{Candidate, MappingOracle, OracleError, OraclePoint, OracleRequest};
use crate::config::MapperConfig;
use crate::validator::Validator;

/// Wraps a [`MappingOracle`] with the call policy the engine relies on.
#[derive(Clone)]
pub struct OracleAdapter {
    oracle: Arc<dyn MappingOracle>,
    validator: Validator,
    max_points: usize,
    max_candidates: usize,
    call_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl OracleAdapter {
    pub fn new(oracle: Arc<dyn MappingOracle>, config: &MapperConfig) -> Self {
        Self {
            oracle,
            validator: Validator::from_config(config),
            max_points: config.max_points_per_batch,
            max_candidates: config.max_candidates_per_point,
            call_timeout: config.oracle_timeout(),
            max_retries: config.oracle_max_retries,
            retry_backoff: config.oracle_retry_backoff(),
        }
    }

    /// Override the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Resolve one sub-batch.
    ///
    /// The returned vector has exactly one validated candidate per input
    /// point, in input order; entries the oracle left out are
    /// [`Candidate::Unresolved`]. Retryable failures are retried at most
    /// `oracleMaxRetries` times with a fixed backoff.
    pub async fn resolve(&self, points: Vec<OraclePoint>) -> Result<Vec<Candidate>, OracleError> {
        if points.len() > self.max_points {
            return Err(OracleError::RequestTooLarge {
                size: points.len(),
                max: self.max_points,
            });
        }
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let expected = points.len();
        let request = OracleRequest::new(points, self.max_candidates);

        let mut attempt: u32 = 0;
        let response = loop {
            match self.call_once(&request).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        oracle = self.oracle.name(),
                        points = expected,
                        attempt,
                        error = %e,
                        "Oracle call failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        };

        if response.len() < expected {
            tracing::debug!(
                oracle = self.oracle.name(),
                expected,
                received = response.len(),
                "Partial oracle response, padding with unresolved"
            );
        }

        let mut candidates = response.candidates;
        candidates.truncate(expected);
        candidates.resize(expected, Candidate::Unresolved);

        Ok(candidates
            .into_iter()
            .map(|candidate| self.validator.check_candidate(candidate))
            .collect())
    }

    async fn call_once(
        &self,
        request: &OracleRequest,
    ) -> Result<super::OracleResponse, OracleError> {
        match tokio::time::timeout(self.call_timeout, self.oracle.propose(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    oracle = self.oracle.name(),
                    "Oracle call timed out after {}s",
                    self.call_timeout.as_secs()
                );
                Err(OracleError::Timeout(self.call_timeout.as_secs()))
            }
        }
    }
}
