//! Rules first, inference for the rest.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Candidate, MappingOracle, OracleError, OracleRequest, OracleResponse};

/// Consults `primary` for every point and `fallback` only for the points the
/// primary left unresolved.
pub struct ChainedOracle {
    primary: Arc<dyn MappingOracle>,
    fallback: Arc<dyn MappingOracle>,
    name: String,
}

impl ChainedOracle {
    pub fn new(primary: Arc<dyn MappingOracle>, fallback: Arc<dyn MappingOracle>) -> Self {
        let name = format!("{}+{}", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            name,
        }
    }
}

#[async_trait]
impl MappingOracle for ChainedOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn propose(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let mut candidates = self.primary.propose(request).await?.candidates;
        candidates.resize(request.len(), Candidate::Unresolved);

        let pending: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_resolved())
            .map(|(idx, _)| idx)
            .collect();
        if pending.is_empty() {
            return Ok(OracleResponse::new(candidates));
        }

        let forwarded = OracleRequest::new(
            pending.iter().map(|&idx| request.points[idx].clone()).collect(),
            request.max_candidates,
        );
        match self.fallback.propose(&forwarded).await {
            Ok(response) => {
                for (idx, candidate) in pending.iter().zip(response.candidates) {
                    candidates[*idx] = candidate;
                }
                Ok(OracleResponse::new(candidates))
            }
            Err(e) if pending.len() < request.len() => {
                tracing::warn!(
                    oracle = self.fallback.name(),
                    points = pending.len(),
                    error = %e,
                    "Fallback oracle failed, keeping primary results"
                );
                Ok(OracleResponse::new(candidates))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MappingRule, OraclePoint, RuleOracle, StaticOracle};

    fn rules() -> Arc<dyn MappingOracle> {
        Arc::new(
            RuleOracle::new(vec![MappingRule::new("CHWRT", "CHPL/points/CHW_RetTemp")]).unwrap(),
        )
    }

    fn request() -> OracleRequest {
        OracleRequest::new(
            vec![OraclePoint::new("CHWRT", "CHPL"), OraclePoint::new("CHW_FLOW", "CHPL")],
            1,
        )
    }

    #[tokio::test]
    async fn test_fallback_only_sees_unresolved_points() {
        let fallback = Arc::new(StaticOracle::new().with_mapping("CHW_FLOW", "CHPL/points/CHW_Flow", 0.8));
        let oracle = ChainedOracle::new(rules(), fallback.clone());
        assert_eq!(oracle.name(), "rules+static");

        let response = oracle.propose(&request()).await.unwrap();
        assert_eq!(response.candidates[0].path(), Some("CHPL/points/CHW_RetTemp"));
        assert_eq!(response.candidates[1].path(), Some("CHPL/points/CHW_Flow"));
        assert_eq!(fallback.request_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_fallback_failure_keeps_primary_results() {
        let fallback = Arc::new(StaticOracle::new().fail_call(0));
        let oracle = ChainedOracle::new(rules(), fallback);
        let response = oracle.propose(&request()).await.unwrap();
        assert!(response.candidates[0].is_resolved());
        assert_eq!(response.candidates[1], Candidate::Unresolved);
    }

    #[tokio::test]
    async fn test_fallback_failure_propagates_when_nothing_resolved() {
        let fallback = Arc::new(StaticOracle::new().fail_call(0));
        let oracle = ChainedOracle::new(rules(), fallback);
        let request = OracleRequest::new(vec![OraclePoint::new("CHW_FLOW", "CHPL")], 1);
        assert!(matches!(
            oracle.propose(&request).await,
            Err(OracleError::Transport(_))
        ));
    }
}
