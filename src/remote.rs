//! HTTP client for remote vectorization backends.
//!
//! `GET {base}/health` is the liveness probe; `POST {base}/vectorize` takes
//! the inbound request JSON and answers with the outbound result JSON.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::{Backend, BackendConfig, Error, Result, ServiceConfig, VectorizationRequest, VectorizationResult};

/// A backend reached over HTTP with a blocking client.
///
/// Must be created and dropped off any async executor; the service facade
/// keeps it on its own threads.
pub struct RemoteBackend {
    id: String,
    base_url: String,
    client: Client,
    request_timeout: Duration,
    probe_timeout: Duration,
}

#[derive(Deserialize)]
struct HealthReply {
    status: Option<String>,
}

impl RemoteBackend {
    pub fn new(backend: &BackendConfig, config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            id: backend.id.clone(),
            base_url: backend.base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
        })
    }

    /// One client per configured backend
    pub fn from_config(config: &ServiceConfig) -> Result<Vec<Self>> {
        config.backends.iter().map(|b| Self::new(b, config)).collect()
    }

    fn classify(&self, e: reqwest::Error, timeout: Duration) -> Error {
        if e.is_timeout() {
            Error::BackendTimeout { backend: self.id.clone(), timeout_ms: timeout.as_millis() as u64 }
        } else {
            Error::BackendError { backend: self.id.clone(), message: e.to_string() }
        }
    }

    fn backend_error(&self, message: impl Into<String>) -> Error {
        Error::BackendError { backend: self.id.clone(), message: message.into() }
    }
}

impl Backend for RemoteBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn probe(&self) -> Result<()> {
        let res = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .map_err(|e| self.classify(e, self.probe_timeout))?;
        if !res.status().is_success() {
            return Err(self.backend_error(format!("health returned {}", res.status())));
        }
        let body = res.bytes().map_err(|e| self.classify(e, self.probe_timeout))?;
        // an empty or non-JSON body is a plain liveness answer
        match serde_json::from_slice::<HealthReply>(&body) {
            Ok(HealthReply { status: Some(s) }) if !s.eq_ignore_ascii_case("ok") => {
                Err(self.backend_error(format!("health status '{}'", s)))
            }
            _ => Ok(()),
        }
    }

    fn vectorize(&self, request: &VectorizationRequest) -> Result<VectorizationResult> {
        let body = serde_json::to_vec(request)
            .map_err(|e| Error::LocalPipelineFailure(format!("Failed to encode request: {}", e)))?;
        let res = self
            .client
            .post(format!("{}/vectorize", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.request_timeout)
            .send()
            .map_err(|e| self.classify(e, self.request_timeout))?;

        let status = res.status();
        let bytes = res.bytes().map_err(|e| self.classify(e, self.request_timeout))?;
        if !status.is_success() {
            let snippet: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            return Err(self.backend_error(format!("HTTP {}: {}", status, snippet)));
        }

        let mut result: VectorizationResult = serde_json::from_slice(&bytes)
            .map_err(|e| self.backend_error(format!("unreadable reply: {}", e)))?;
        if !result.success {
            let reason = result.error.take().unwrap_or_else(|| "reported failure".to_string());
            return Err(self.backend_error(reason));
        }
        if result.vector_url.is_none() {
            return Err(self.backend_error("success reply without vectorUrl"));
        }
        result.backend = self.id.clone();
        Ok(result)
    }
}
