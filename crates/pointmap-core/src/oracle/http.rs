//! Remote inference oracle over HTTP.
//!
//! The request body is the JSON form of [`OracleRequest`]. The service
//! answers with
//!
//! ```json
//! { "results": [ { "point": "CHWRT", "path": "CHPL/points/CHW_RetTemp",
//!                  "confidence": 0.9, "justification": "..." } ] }
//! ```
//!
//! `path: null` marks a point unresolved. Entries are matched by `point`
//! when every entry names one, otherwise by position.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Candidate, MappingOracle, OracleError, OracleRequest, OracleResponse};

/// HTTP oracle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpOracleConfig {
    /// Full URL of the mapping endpoint
    pub endpoint: String,

    /// Optional bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Transport-level timeout in seconds (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl HttpOracleConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<WireEntry>,
}

#[derive(Debug, Deserialize)]
struct WireEntry {
    #[serde(default)]
    point: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    confidence: f32,
    #[serde(default, alias = "reasoning")]
    justification: String,
}

impl WireEntry {
    fn into_candidate(self) -> Candidate {
        match self.path {
            Some(path) => Candidate::Resolved {
                path,
                confidence: self.confidence,
                justification: self.justification,
            },
            None => Candidate::Unresolved,
        }
    }
}

/// Oracle calling a remote inference service.
pub struct HttpOracle {
    config: HttpOracleConfig,
    client: Client,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        tracing::debug!("Creating HTTP oracle with endpoint: {}", config.endpoint);

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Align wire entries with the request points.
    fn align(request: &OracleRequest, entries: Vec<WireEntry>) -> OracleResponse {
        let named = !entries.is_empty() && entries.iter().all(|e| e.point.is_some());
        if !named {
            return OracleResponse::new(entries.into_iter().map(WireEntry::into_candidate).collect());
        }

        // A name repeats once per device carrying it. Answers for a name are
        // consumed in order; the last one also serves any further repeats.
        let mut by_point: HashMap<String, VecDeque<Candidate>> = HashMap::new();
        for mut entry in entries {
            if let Some(point) = entry.point.take() {
                by_point
                    .entry(point.trim().to_uppercase())
                    .or_default()
                    .push_back(entry.into_candidate());
            }
        }
        OracleResponse::new(
            request
                .points
                .iter()
                .map(|p| match by_point.get_mut(&p.name) {
                    Some(queue) if queue.len() > 1 => {
                        queue.pop_front().unwrap_or(Candidate::Unresolved)
                    }
                    Some(queue) => queue.front().cloned().unwrap_or(Candidate::Unresolved),
                    None => Candidate::Unresolved,
                })
                .collect(),
        )
    }
}

#[async_trait]
impl MappingOracle for HttpOracle {
    fn name(&self) -> &str {
        "http"
    }

    async fn propose(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let mut builder = self.client.post(&self.config.endpoint).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.config.timeout_secs)
            } else {
                OracleError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        let parsed: WireResponse = serde_json::from_str(&body)
            .map_err(|e| OracleError::Protocol(format!("undecodable response: {}", e)))?;

        Ok(Self::align(request, parsed.results))
    }
}
