//! Human-authored mapping rules.
//!
//! Rules are consulted in file order; the first match wins.
//!
//! ```toml
//! [[rule]]
//! device_type = "CHPL"
//! pattern = "CHWRT"
//! path = "{device_type}/points/CHW_RetTemp"
//! confidence = 0.95
//! justification = "chilled water return temperature"
//!
//! [[rule]]
//! pattern = "*_STATUS"
//! path = "{device_type}/points/{device_type}_raw_status"
//! confidence = 0.8
//! ```

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Candidate, MappingOracle, OracleError, OraclePoint, OracleRequest, OracleResponse};
use crate::error::{MapperError, Result};

fn default_rule_confidence() -> f32 {
    0.9
}

/// One pattern rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    /// Restrict the rule to one device type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Cleaned point name, `*` matches any run of characters
    pub pattern: String,
    /// Target path, may use `{device_type}` and `{point}`
    pub path: String,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

impl MappingRule {
    pub fn new(pattern: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            device_type: None,
            pattern: pattern.into(),
            path: path.into(),
            confidence: default_rule_confidence(),
            justification: None,
        }
    }

    pub fn for_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    fn render_path(&self, point: &OraclePoint) -> String {
        self.path
            .replace("{device_type}", &point.device_type)
            .replace("{point}", &point.name)
    }
}

struct CompiledRule {
    rule: MappingRule,
    matcher: Regex,
}

impl CompiledRule {
    fn compile(rule: MappingRule) -> Result<Self> {
        let pattern = rule.pattern.trim().to_uppercase();
        if pattern.is_empty() {
            return Err(MapperError::Config("rule pattern must not be empty".into()));
        }
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let matcher = Regex::new(&format!("^{}$", body))
            .map_err(|e| MapperError::Config(format!("rule pattern '{}': {}", rule.pattern, e)))?;
        Ok(Self { rule, matcher })
    }

    fn matches(&self, point: &OraclePoint) -> bool {
        let type_ok = self
            .rule
            .device_type
            .as_deref()
            .map_or(true, |t| t.eq_ignore_ascii_case(&point.device_type));
        type_ok && self.matcher.is_match(&point.name)
    }

    fn candidate(&self, point: &OraclePoint) -> Candidate {
        let justification = self
            .rule
            .justification
            .clone()
            .unwrap_or_else(|| format!("matched rule '{}'", self.rule.pattern));
        Candidate::resolved(self.rule.render_path(point), self.rule.confidence, justification)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<MappingRule>,
}

/// Oracle backed by an ordered rule list.
pub struct RuleOracle {
    rules: Vec<CompiledRule>,
}

impl RuleOracle {
    pub fn new(rules: Vec<MappingRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Parse `[[rule]]` tables.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(content)?;
        Self::new(file.rule)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MapperError::Config(format!("cannot read rules {}: {}", path.display(), e))
        })?;
        let oracle = Self::from_toml_str(&content)?;
        tracing::info!(
            category = "config",
            path = %path.display(),
            rules = oracle.len(),
            "Loaded mapping rules"
        );
        Ok(oracle)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule's candidate, or unresolved.
    pub fn lookup(&self, point: &OraclePoint) -> Candidate {
        self.rules
            .iter()
            .find(|rule| rule.matches(point))
            .map(|rule| rule.candidate(point))
            .unwrap_or(Candidate::Unresolved)
    }
}

#[async_trait]
impl MappingOracle for RuleOracle {
    fn name(&self) -> &str {
        "rules"
    }

    async fn propose(&self, request: &OracleRequest) -> std::result::Result<OracleResponse, OracleError> {
        Ok(OracleResponse::new(
            request.points.iter().map(|p| self.lookup(p)).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
        [[rule]]
        device_type = "CHPL"
        pattern = "CHWRT"
        path = "{device_type}/points/CHW_RetTemp"
        confidence = 0.95
        justification = "chilled water return temperature"

        [[rule]]
        pattern = "*_status"
        path = "{device_type}/points/{device_type}_raw_status"
    "#;

    #[test]
    fn test_load_from_toml() {
        let oracle = RuleOracle::from_toml_str(RULES).unwrap();
        assert_eq!(oracle.len(), 2);
        assert!(RuleOracle::from_toml_str("").unwrap().is_empty());
    }

    #[test]
    fn test_exact_rule_respects_device_type() {
        let oracle = RuleOracle::from_toml_str(RULES).unwrap();
        let hit = oracle.lookup(&OraclePoint::new("CHWRT", "CHPL"));
        assert_eq!(hit.path(), Some("CHPL/points/CHW_RetTemp"));
        assert_eq!(hit.confidence(), 0.95);

        let miss = oracle.lookup(&OraclePoint::new("CHWRT", "AHU"));
        assert_eq!(miss, Candidate::Unresolved);
    }

    #[test]
    fn test_wildcard_rule_renders_template() {
        let oracle = RuleOracle::from_toml_str(RULES).unwrap();
        let hit = oracle.lookup(&OraclePoint::new("SF_STATUS", "AHU"));
        assert_eq!(hit.path(), Some("AHU/points/AHU_raw_status"));
        match hit {
            Candidate::Resolved { justification, .. } => assert!(justification.contains("*_status")),
            Candidate::Unresolved => panic!("expected a match"),
        }
    }

    #[test]
    fn test_rejects_empty_pattern() {
        let err = RuleOracle::new(vec![MappingRule::new(" ", "A/B")]).err().unwrap();
        assert!(matches!(err, MapperError::Config(_)));
    }

    #[tokio::test]
    async fn test_propose_keeps_request_order() {
        let oracle = RuleOracle::new(vec![
            MappingRule::new("SATEMP", "AHU/points/SA_Temp").with_confidence(0.85),
        ])
        .unwrap();
        let request = OracleRequest::new(
            vec![OraclePoint::new("RATEMP", "AHU"), OraclePoint::new("SATEMP", "AHU")],
            1,
        );
        let response = oracle.propose(&request).await.unwrap();
        assert_eq!(response.candidates[0], Candidate::Unresolved);
        assert_eq!(response.candidates[1].path(), Some("AHU/points/SA_Temp"));
    }
}
