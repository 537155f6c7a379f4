//! Language-model gateway
//!
//! One call, `generate(prompt, system, options)`, against a local Ollama
//! endpoint, plus a short-lived cached availability probe. The cache is an
//! explicit value owned by the gateway and driven by an injected [`Clock`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};

/// Per-call structured-phase timeout
pub const STRUCTURED_TIMEOUT: Duration = Duration::from_secs(600);
/// Per-call drift timeout
pub const DRIFT_TIMEOUT: Duration = Duration::from_secs(300);
/// Availability probe timeout
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a probe result is trusted
pub const AVAILABILITY_TTL_SECS: i64 = 60;

/// Generation parameters for one call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on the whole HTTP exchange
    pub timeout: Duration,
}

impl GenerateOptions {
    /// Options for structured (exploratory/directed) phases
    pub fn structured(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
            timeout: STRUCTURED_TIMEOUT,
        }
    }

    /// Options for drift rounds
    pub fn drift(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
            timeout: DRIFT_TIMEOUT,
        }
    }
}

/// A black-box text generator
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Whether the endpoint is reachable (may be cached)
    async fn is_available(&self) -> bool;

    /// Drop any cached availability so the next probe is fresh
    fn invalidate_availability(&self) {}

    /// Generate a completion. Empty output counts as a failure.
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        options: &GenerateOptions,
    ) -> GatewayResult<String>;
}

/// Timestamped availability result
pub struct AvailabilityCache {
    ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<(DateTime<Local>, bool)>>,
}

impl AvailabilityCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, ChronoDuration::seconds(AVAILABILITY_TTL_SECS))
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: ChronoDuration) -> Self {
        Self {
            ttl,
            clock,
            last: Mutex::new(None),
        }
    }

    /// Cached answer, if still fresh
    pub fn get(&self) -> Option<bool> {
        let last = self.last.lock();
        match *last {
            Some((checked_at, available)) if self.clock.now() - checked_at < self.ttl => {
                Some(available)
            }
            _ => None,
        }
    }

    pub fn record(&self, available: bool) {
        *self.last.lock() = Some((self.clock.now(), available));
    }

    pub fn invalidate(&self) {
        *self.last.lock() = None;
    }
}

/// Ollama `/api/generate` request body
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
}

/// Gateway backed by a local Ollama server
pub struct OllamaGateway {
    base_url: String,
    client: reqwest::Client,
    availability: AvailabilityCache,
}

impl OllamaGateway {
    pub fn new(base_url: impl Into<String>, clock: Arc<dyn Clock>) -> GatewayResult<Self> {
        // No client-wide timeout: every request carries its own
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            availability: AvailabilityCache::new(clock),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Ollama probe failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Gateway for OllamaGateway {
    async fn is_available(&self) -> bool {
        if let Some(available) = self.availability.get() {
            return available;
        }
        let available = self.probe().await;
        self.availability.record(available);
        available
    }

    fn invalidate_availability(&self) {
        self.availability.invalidate();
    }

    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        options: &GenerateOptions,
    ) -> GatewayResult<String> {
        let body = OllamaGenerateRequest {
            model: &options.model,
            prompt,
            system,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GatewayError::Unavailable(self.base_url.clone())
                } else {
                    GatewayError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("Ollama error {}: {}", status, body);
            return Err(GatewayError::Status { status, body });
        }

        let result: OllamaGenerateResponse = response.json().await?;
        let text = result.response.trim();
        if text.is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}
