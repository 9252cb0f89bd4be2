//! Structural checks on point names and oracle candidates.

use thiserror::Error;

use crate::config::MapperConfig;
use crate::oracle::Candidate;

/// Why a point name or a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("point name is empty")]
    EmptyName,

    #[error("point name contains '{0}' (allowed: A-Z, 0-9, _)")]
    InvalidCharacter(char),

    #[error("point name is {len} characters long (max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("candidate has no justification")]
    MissingJustification,

    #[error("candidate confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(String),

    #[error("candidate path '{0}' is malformed")]
    MalformedPath(String),
}

/// Point-name and reasoning validity checks.
#[derive(Debug, Clone)]
pub struct Validator {
    max_point_name_length: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::from_config(&MapperConfig::default())
    }
}

impl Validator {
    pub fn new(max_point_name_length: usize) -> Self {
        Self {
            max_point_name_length,
        }
    }

    pub fn from_config(config: &MapperConfig) -> Self {
        Self::new(config.max_point_name_length)
    }

    /// A cleaned point name is valid iff it is non-empty, uses only
    /// `[A-Z0-9_]` and fits the configured length.
    pub fn check_point_name(&self, name: &str) -> Result<(), ValidationIssue> {
        if name.is_empty() {
            return Err(ValidationIssue::EmptyName);
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(ValidationIssue::InvalidCharacter(bad));
        }
        let len = name.chars().count();
        if len > self.max_point_name_length {
            return Err(ValidationIssue::NameTooLong {
                len,
                max: self.max_point_name_length,
            });
        }
        Ok(())
    }

    /// First reasoning problem of a candidate, if any.
    ///
    /// Unresolved candidates have nothing to check.
    pub fn reasoning_issue(&self, candidate: &Candidate) -> Option<ValidationIssue> {
        let Candidate::Resolved {
            path,
            confidence,
            justification,
        } = candidate
        else {
            return None;
        };

        if !(0.0..=1.0).contains(confidence) {
            return Some(ValidationIssue::ConfidenceOutOfRange(confidence.to_string()));
        }
        if justification.trim().is_empty() {
            return Some(ValidationIssue::MissingJustification);
        }
        let well_formed = !path.is_empty()
            && !path.chars().any(char::is_whitespace)
            && path.split('/').all(|segment| !segment.is_empty());
        if !well_formed {
            return Some(ValidationIssue::MalformedPath(path.clone()));
        }
        None
    }

    /// Gate a candidate before acceptance.
    ///
    /// A candidate failing the reasoning check keeps its path and
    /// justification but its confidence is forced to 0, so it can never be
    /// accepted and never carries an out-of-range value further.
    pub fn check_candidate(&self, candidate: Candidate) -> Candidate {
        match self.reasoning_issue(&candidate) {
            None => candidate,
            Some(issue) => {
                tracing::debug!(issue = %issue, "Candidate failed reasoning check");
                match candidate {
                    Candidate::Resolved {
                        path,
                        justification,
                        ..
                    } => Candidate::Resolved {
                        path,
                        confidence: 0.0,
                        justification,
                    },
                    Candidate::Unresolved => Candidate::Unresolved,
                }
            }
        }
    }
}
