//! Ollama model server health probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use brainops_core::{config::env_string, defaults, HealthProbe, Result};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;

/// Timeout for the health request (seconds).
pub const HEALTH_TIMEOUT_SECS: u64 = defaults::HEALTH_TIMEOUT_SECS;

/// Health probe hitting `GET {base}/api/tags`.
///
/// A 2xx answer is healthy. Any other status or a transport error is
/// unhealthy and logged at WARN; the probe itself never fails.
#[derive(Debug, Clone)]
pub struct OllamaHealthProbe {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Default for OllamaHealthProbe {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL)
    }
}

impl OllamaHealthProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(HEALTH_TIMEOUT_SECS),
        }
    }

    /// Create probe from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `OLLAMA_BASE` | `http://127.0.0.1:11434` | Ollama endpoint |
    pub fn from_env() -> Self {
        Self::new(env_string("OLLAMA_BASE", DEFAULT_OLLAMA_URL))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HealthProbe for OllamaHealthProbe {
    async fn check_health(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!(
                        subsystem = "inference",
                        component = "ollama",
                        op = "check_health",
                        "Ollama health check passed"
                    );
                    Ok(true)
                } else {
                    warn!(
                        subsystem = "inference",
                        component = "ollama",
                        status = %resp.status(),
                        "Ollama health check failed"
                    );
                    Ok(false)
                }
            }
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "ollama",
                    error = %e,
                    "Ollama health check error"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_is_localhost() {
        assert!(DEFAULT_OLLAMA_URL.contains("127.0.0.1"));
        assert_eq!(OllamaHealthProbe::default().base_url(), DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let probe = OllamaHealthProbe::new("http://gpu-box:11434/");
        assert_eq!(probe.base_url(), "http://gpu-box:11434");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        // Port 9 (discard) is closed on test hosts.
        let probe = OllamaHealthProbe::new("http://127.0.0.1:9")
            .with_timeout(Duration::from_millis(500));
        assert!(!probe.check_health().await.unwrap());
    }
}
