//! rfvector: raster-to-vector conversion with remote backend fallback
//!
//! Converts raster images (PNG, JPEG, ...) into SVG, EPS, PDF or AI documents
//! by color analysis, contour tracing and composition. Requests are routed to
//! configured remote vectorization backends while they are healthy and fall
//! back to the in-process pipeline otherwise, so a caller only sees a failure
//! when the local pipeline itself cannot produce a result.
//!
//! # Features
//!
//! - **Local pipeline**: palette extraction, 4-connected contour tracing with
//!   holes, topology-preserving simplification, deterministic output
//! - **Backend health**: probe-driven and request-driven state per backend
//! - **Async facade**: [`VectorService`] runs dispatch on a worker pool
//!
//! # Example
//!
//! ```no_run
//! use rfvector::{Dispatcher, HealthRegistry, ServiceConfig, VectorizationRequest};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig {
//!     output_dir: "/tmp/vectors".into(),
//!     ..Default::default()
//! };
//!
//! let registry = Arc::new(HealthRegistry::new(&config));
//! let dispatcher = Dispatcher::new(config, registry)?;
//! let result = dispatcher.dispatch(VectorizationRequest::from_url("file:///tmp/logo.png"));
//! println!("{}", serde_json::to_string(&result)?);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod request;
pub use request::{
    ColorMode, Complexity, ImageSource, OutputFormat, Quality, VectorizationRequest, VectorizationResult,
    LOCAL_BACKEND,
};

// Analyzer, tracer, composer and serializers
pub mod pipeline;

pub mod health;
pub use health::{BackendDescriptor, HealthProber, HealthRegistry, HealthState};

// Remote backend protocol (blocking HTTP)
pub mod remote;
pub use remote::RemoteBackend;

pub mod source;
pub mod storage;
pub use storage::{ArtifactStore, StoredArtifact};

pub mod dispatch;
pub use dispatch::{Dispatcher, Strategy};

// Async-friendly facade (worker-pool backed)
pub mod async_api;
pub use async_api::VectorService;

/// A vectorization backend reachable outside this process
///
/// The dispatcher only talks to backends through this trait; [`RemoteBackend`]
/// is the HTTP implementation.
pub trait Backend: Send + Sync {
    /// Configured id, reported in results as `backend`
    fn id(&self) -> &str;

    /// Lightweight liveness check, distinct from real work
    fn probe(&self) -> Result<()>;

    /// Vectorize `request`. A reply with `success: false` is an error here.
    fn vectorize(&self, request: &VectorizationRequest) -> Result<VectorizationResult>;
}

/// One configured remote backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    /// e.g. `http://127.0.0.1:5001`
    pub base_url: String,
}

impl FromStr for BackendConfig {
    type Err = Error;

    /// Parses `ID=URL`, the CLI's `--backend` syntax
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => Ok(Self {
                id: id.trim().to_string(),
                base_url: url.trim().to_string(),
            }),
            _ => Err(Error::ConfigError(format!("expected ID=URL, got '{}'", s))),
        }
    }
}

/// Bounds on accepted source images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    /// Largest encoded payload accepted, in bytes
    pub max_input_bytes: u64,
    /// Largest accepted width or height, in pixels
    pub max_dimension: u32,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 20 * 1024 * 1024,
            max_dimension: 8000,
        }
    }
}

/// Configuration for the dispatcher, health registry and service facade
///
/// Every field has a default, so a JSON config file only needs the keys it
/// overrides.
///
/// # Examples
///
/// ```
/// let cfg = rfvector::ServiceConfig::default();
/// assert_eq!(cfg.max_remote_attempts, 2);
/// assert!(cfg.backends.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Remote backends, in order of preference
    pub backends: Vec<BackendConfig>,
    /// Timeout for one remote vectorization attempt
    pub request_timeout_ms: u64,
    /// Timeout for one health probe
    pub probe_timeout_ms: u64,
    /// Pause between periodic probe rounds
    pub probe_interval_ms: u64,
    /// Failed probes before a backend is marked unhealthy
    pub probe_failure_threshold: u32,
    /// Consecutive failed requests before a backend is marked unhealthy
    pub request_failure_threshold: u32,
    /// Remote attempts per request, each on a different backend
    pub max_remote_attempts: usize,
    /// Timeout for fetching a source image URL
    pub source_timeout_ms: u64,
    pub limits: InputLimits,
    /// Directory artifacts are written to
    pub output_dir: PathBuf,
    /// Prefix for artifact URLs handed back to callers
    pub public_base_url: String,
    pub user_agent: String,
    /// Worker threads in [`VectorService`] (0 => one per CPU)
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            request_timeout_ms: 3000,
            probe_timeout_ms: 1000,
            probe_interval_ms: 10000,
            probe_failure_threshold: 1,
            request_failure_threshold: 3,
            max_remote_attempts: 2,
            source_timeout_ms: 10000,
            limits: InputLimits::default(),
            output_dir: PathBuf::from("./vectors"),
            public_base_url: "/vectors".to_string(),
            user_agent: concat!("rfvector/", env!("CARGO_PKG_VERSION")).to_string(),
            workers: 0,
        }
    }
}

impl ServiceConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        let config: ServiceConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for b in &self.backends {
            if b.id.is_empty() || b.id == LOCAL_BACKEND {
                return Err(Error::ConfigError(format!("invalid backend id '{}'", b.id)));
            }
            if !seen.insert(b.id.as_str()) {
                return Err(Error::ConfigError(format!("duplicate backend id '{}'", b.id)));
            }
            let url = url::Url::parse(&b.base_url)
                .map_err(|e| Error::ConfigError(format!("backend {}: bad base_url '{}': {}", b.id, b.base_url, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::ConfigError(format!(
                    "backend {}: unsupported scheme '{}'",
                    b.id,
                    url.scheme()
                )));
            }
        }
        if self.request_timeout_ms == 0 || self.probe_timeout_ms == 0 || self.source_timeout_ms == 0 {
            return Err(Error::ConfigError("timeouts must be positive".into()));
        }
        if self.probe_failure_threshold == 0 || self.request_failure_threshold == 0 {
            return Err(Error::ConfigError("failure thresholds must be at least 1".into()));
        }
        if self.limits.max_input_bytes == 0 || self.limits.max_dimension == 0 {
            return Err(Error::ConfigError("input limits must be positive".into()));
        }
        Ok(())
    }

    /// Worker pool size with the CPU-count default applied
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.request_timeout_ms, 3000);
        assert_eq!(config.request_failure_threshold, 3);
        assert_eq!(config.limits.max_dimension, 8000);
        assert!(config.user_agent.starts_with("rfvector/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: ServiceConfig = serde_json::from_str(
            r#"{"backends":[{"id":"gpu","base_url":"http://127.0.0.1:5001"}],"limits":{"max_dimension":100}}"#,
        )
        .unwrap();
        assert_eq!(cfg.backends.len(), 1);
        assert_eq!(cfg.limits.max_dimension, 100);
        assert_eq!(cfg.limits.max_input_bytes, 20 * 1024 * 1024);
        assert_eq!(cfg.probe_interval_ms, 10000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_backends() {
        let mut cfg = ServiceConfig::default();
        cfg.backends = vec![
            BackendConfig { id: "a".into(), base_url: "http://h:1".into() },
            BackendConfig { id: "a".into(), base_url: "http://h:2".into() },
        ];
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));

        cfg.backends = vec![BackendConfig { id: "a".into(), base_url: "not a url".into() }];
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));

        cfg.backends = vec![BackendConfig { id: "a".into(), base_url: "ftp://h/".into() }];
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));

        cfg.backends = vec![BackendConfig { id: "local".into(), base_url: "http://h:1".into() }];
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_backend_arg_parsing() {
        let b: BackendConfig = "gpu=http://127.0.0.1:5001".parse().unwrap();
        assert_eq!(b.id, "gpu");
        assert_eq!(b.base_url, "http://127.0.0.1:5001");
        assert!("nourl".parse::<BackendConfig>().is_err());
        assert!("=http://x".parse::<BackendConfig>().is_err());
    }

    #[test]
    fn test_config_file_errors_are_config_errors() {
        let err = ServiceConfig::from_json_file("/definitely/missing/rfvector.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
