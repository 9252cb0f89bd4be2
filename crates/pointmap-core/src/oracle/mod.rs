//! Mapping oracle boundary.
//!
//! An oracle proposes EnOS path candidates for cleaned point names. The
//! engine never talks to an oracle directly: every call goes through the
//! [`OracleAdapter`], which bounds request size, applies the call timeout and
//! retry policy, pads partial responses and runs each candidate through the
//! [`Validator`](crate::validator::Validator).
//!
//! Implementations:
//! - [`RuleOracle`]: human-authored pattern rules
//! - [`ChainedOracle`]: rules first, inference fallback for the leftovers
//! - [`StaticOracle`]: deterministic table, for tests and dry runs
//! - `HttpOracle` (feature `http`): remote inference service

mod adapter;
mod chained;
#[cfg(feature = "http")]
mod http;
mod rules;
mod static_oracle;

pub use adapter::OracleAdapter;
pub use chained::ChainedOracle;
#[cfg(feature = "http")]
pub use http::{HttpOracle, HttpOracleConfig};
pub use rules::{MappingRule, RuleOracle};
pub use static_oracle::StaticOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Oracle call failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// No answer within the call timeout
    #[error("Oracle call timed out after {0}s")]
    Timeout(u64),

    /// Connection or remote-side failure
    #[error("Oracle transport error: {0}")]
    Transport(String),

    /// Sub-batch larger than the per-call limit
    #[error("Oracle request of {size} points exceeds the limit of {max}")]
    RequestTooLarge { size: usize, max: usize },

    /// Answer that does not follow the response contract
    #[error("Oracle protocol error: {0}")]
    Protocol(String),
}

impl OracleError {
    /// Transport and timeout failures may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::Timeout(_) | OracleError::Transport(_))
    }
}

/// One normalized point sent to an oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OraclePoint {
    /// Cleaned point name
    pub name: String,
    /// Device type of the point's device
    pub device_type: String,
}

impl OraclePoint {
    pub fn new(name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
        }
    }
}

/// A sub-batch worth of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleRequest {
    pub points: Vec<OraclePoint>,
    /// Set when every point shares one device type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type_hint: Option<String>,
    pub max_candidates: usize,
}

impl OracleRequest {
    pub fn new(points: Vec<OraclePoint>, max_candidates: usize) -> Self {
        let device_type_hint = match points.split_first() {
            Some((first, rest)) if rest.iter().all(|p| p.device_type == first.device_type) => {
                Some(first.device_type.clone())
            }
            _ => None,
        };
        Self {
            points,
            device_type_hint,
            max_candidates,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// What an oracle proposes for one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Candidate {
    Resolved {
        path: String,
        confidence: f32,
        justification: String,
    },
    Unresolved,
}

impl Candidate {
    pub fn resolved(
        path: impl Into<String>,
        confidence: f32,
        justification: impl Into<String>,
    ) -> Self {
        Candidate::Resolved {
            path: path.into(),
            confidence,
            justification: justification.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Candidate::Resolved { .. })
    }

    /// Confidence of the candidate, 0 when unresolved.
    pub fn confidence(&self) -> f32 {
        match self {
            Candidate::Resolved { confidence, .. } => *confidence,
            Candidate::Unresolved => 0.0,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Candidate::Resolved { path, .. } => Some(path),
            Candidate::Unresolved => None,
        }
    }
}

/// Candidates in request order. May be shorter than the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub candidates: Vec<Candidate>,
}

impl OracleResponse {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// A response marking `len` points unresolved.
    pub fn unresolved(len: usize) -> Self {
        Self {
            candidates: vec![Candidate::Unresolved; len],
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// A source of mapping candidates.
#[async_trait]
pub trait MappingOracle: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Propose one candidate per requested point, in request order.
    async fn propose(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_hint_for_homogeneous_points() {
        let request = OracleRequest::new(
            vec![OraclePoint::new("CHWRT", "CHPL"), OraclePoint::new("CHW_FLOW", "CHPL")],
            1,
        );
        assert_eq!(request.device_type_hint.as_deref(), Some("CHPL"));

        let mixed = OracleRequest::new(
            vec![OraclePoint::new("CHWRT", "CHPL"), OraclePoint::new("SATEMP", "AHU")],
            1,
        );
        assert!(mixed.device_type_hint.is_none());
        assert!(OracleRequest::new(Vec::new(), 1).device_type_hint.is_none());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(OracleError::Timeout(5).is_retryable());
        assert!(OracleError::Transport("reset".into()).is_retryable());
        assert!(!OracleError::Protocol("bad json".into()).is_retryable());
        assert!(!OracleError::RequestTooLarge { size: 2, max: 1 }.is_retryable());
    }

    #[test]
    fn test_candidate_serde_tag() {
        let json = serde_json::to_value(Candidate::resolved("AHU/points/SA_TEMP", 0.8, "supply air"))
            .unwrap();
        assert_eq!(json["kind"], "resolved");
        let back: Candidate = serde_json::from_str(r#"{"kind":"unresolved"}"#).unwrap();
        assert_eq!(back, Candidate::Unresolved);
    }
}
