//! Request dispatch: remote backends first, local pipeline as fallback.
//!
//! A request is resolved once, a [`Strategy`] is picked once from the health
//! registry, and every remote outcome is fed back into the registry. Remote
//! failures never reach the caller; only a failing local pipeline, a bad
//! source or a failed artifact write do.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::health::{self, BackendDescriptor, HealthProber, HealthRegistry};
use crate::pipeline::raster::{probe_dimensions, RasterImage};
use crate::pipeline::{run_local, PipelineOptions};
use crate::source::SourceResolver;
use crate::storage::ArtifactStore;
use crate::{
    Backend, Error, ImageSource, RemoteBackend, Result, ServiceConfig, VectorizationRequest, VectorizationResult,
    LOCAL_BACKEND,
};

/// How often an in-flight remote call checks whether its caller is gone
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// How a single request will be served, decided before any work starts
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// No healthy backend; run the in-process pipeline
    Local,
    /// Healthy backends to try in order, each at most once, before falling
    /// back to the local pipeline
    Remote(Vec<BackendDescriptor>),
}

pub struct Dispatcher {
    config: ServiceConfig,
    registry: Arc<HealthRegistry>,
    backends: Vec<Arc<dyn Backend>>,
    resolver: SourceResolver,
    store: ArtifactStore,
}

impl Dispatcher {
    /// Dispatcher with one HTTP client per configured backend.
    pub fn new(config: ServiceConfig, registry: Arc<HealthRegistry>) -> Result<Self> {
        config.validate()?;
        let backends = RemoteBackend::from_config(&config)?
            .into_iter()
            .map(|b| Arc::new(b) as Arc<dyn Backend>)
            .collect();
        Self::with_backends(config, registry, backends)
    }

    /// Dispatcher over caller-provided backends. Backends whose id is not in
    /// the registry are never selected.
    pub fn with_backends(
        config: ServiceConfig,
        registry: Arc<HealthRegistry>,
        backends: Vec<Arc<dyn Backend>>,
    ) -> Result<Self> {
        let resolver = SourceResolver::new(&config)?;
        let store = ArtifactStore::from_config(&config);
        Ok(Self { config, registry, backends, resolver, store })
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Probe every backend once, synchronously.
    pub fn probe_all(&self) {
        health::probe_all(&self.registry, &self.backends);
    }

    /// Periodic prober over this dispatcher's backends, `None` when there are
    /// none. Without it an Unhealthy backend is never selected again.
    pub fn spawn_prober(&self) -> Option<HealthProber> {
        if self.backends.is_empty() {
            return None;
        }
        Some(HealthProber::spawn(
            Arc::clone(&self.registry),
            self.backends.clone(),
            Duration::from_millis(self.config.probe_interval_ms),
        ))
    }

    fn backend(&self, id: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.id() == id)
    }

    /// Pick the strategy from the registry's current view.
    pub fn select_strategy(&self) -> Strategy {
        let candidates: Vec<BackendDescriptor> = self
            .registry
            .healthy_backends()
            .into_iter()
            .filter(|d| self.backend(&d.id).is_some())
            .take(self.config.max_remote_attempts)
            .collect();
        if candidates.is_empty() {
            Strategy::Local
        } else {
            Strategy::Remote(candidates)
        }
    }

    pub fn dispatch(&self, request: VectorizationRequest) -> VectorizationResult {
        self.dispatch_cancellable(request, &|| false)
    }

    /// Like [`dispatch`](Self::dispatch), checking `cancelled` between stages
    /// and while a remote call is in flight.
    ///
    /// Once the caller is gone the pending remote call is abandoned and no
    /// further attempt is made; a local pipeline that already started runs to
    /// completion and its output is discarded before anything is stored.
    pub fn dispatch_cancellable(
        &self,
        request: VectorizationRequest,
        cancelled: &dyn Fn() -> bool,
    ) -> VectorizationResult {
        let started = Instant::now();
        let format = request.output_format;
        let elapsed = || started.elapsed().as_millis() as u64;
        if let Some(hint) = &request.user_hint {
            debug!("user hint: {}", hint);
        }

        let bytes = match self.resolve(&request.source) {
            Ok(b) => b,
            Err(e) => {
                warn!("source rejected: {}", e);
                return VectorizationResult::failed(format, &e, elapsed(), LOCAL_BACKEND);
            }
        };

        if let Strategy::Remote(candidates) = self.select_strategy() {
            let remote_request =
                Arc::new(VectorizationRequest { source: ImageSource::Bytes(bytes.clone()), ..request.clone() });
            for d in candidates {
                if cancelled() {
                    debug!("caller gone, skipping backend {}", d.id);
                    return VectorizationResult::failed(format, &Error::Cancelled, elapsed(), LOCAL_BACKEND);
                }
                match self.try_remote(&d.id, &remote_request, cancelled) {
                    Ok(mut result) => {
                        result.format = format;
                        if result.processing_time_ms.is_none() {
                            result.processing_time_ms = Some(elapsed());
                        }
                        return result;
                    }
                    Err(e) if e.is_recoverable_remotely() => warn!("{}; trying next option", e),
                    Err(e) => {
                        debug!("remote attempt on {} abandoned: {}", d.id, e);
                        return VectorizationResult::failed(format, &e, elapsed(), LOCAL_BACKEND);
                    }
                }
            }
            info!("remote attempts exhausted, falling back to local pipeline");
        }

        if cancelled() {
            return VectorizationResult::failed(format, &Error::Cancelled, elapsed(), LOCAL_BACKEND);
        }
        match self.run_locally(&bytes, &request, cancelled) {
            Ok((url, size)) => VectorizationResult::succeeded(format, url, size, elapsed(), LOCAL_BACKEND),
            Err(Error::Cancelled) => {
                debug!("caller gone, local result discarded");
                VectorizationResult::failed(format, &Error::Cancelled, elapsed(), LOCAL_BACKEND)
            }
            Err(e) => {
                warn!("local pipeline failed: {}", e);
                VectorizationResult::failed(format, &e, elapsed(), LOCAL_BACKEND)
            }
        }
    }

    /// Encoded source bytes whose header passes the input limits.
    fn resolve(&self, source: &ImageSource) -> Result<Vec<u8>> {
        let bytes = self.resolver.resolve(source)?;
        probe_dimensions(&bytes, &self.config.limits)?;
        Ok(bytes)
    }

    /// One remote attempt on its own thread so the caller can walk away.
    ///
    /// An abandoned call keeps running until its backend replies or its
    /// request timeout fires; its outcome is not recorded.
    fn try_remote(
        &self,
        id: &str,
        request: &Arc<VectorizationRequest>,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<VectorizationResult> {
        let backend = Arc::clone(
            self.backend(id)
                .ok_or_else(|| Error::BackendError { backend: id.to_string(), message: "not configured".into() })?,
        );
        let t = Instant::now();
        let (tx, rx) = mpsc::channel();
        let req = Arc::clone(request);
        thread::Builder::new()
            .name(format!("remote-{}", id))
            .spawn(move || {
                let _ = tx.send(backend.vectorize(&req));
            })
            .map_err(|e| Error::BackendError {
                backend: id.to_string(),
                message: format!("failed to spawn request thread: {}", e),
            })?;

        let res = loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(res) => break res,
                Err(RecvTimeoutError::Timeout) => {
                    if cancelled() {
                        return Err(Error::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(Error::BackendError { backend: id.to_string(), message: "request thread panicked".into() })
                }
            }
        };
        let latency = t.elapsed().as_millis() as u64;
        self.registry.record_outcome(id, res.is_ok(), latency);
        if res.is_ok() {
            debug!("backend {} served request in {}ms", id, latency);
        }
        res
    }

    fn run_locally(
        &self,
        bytes: &[u8],
        request: &VectorizationRequest,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<(String, u64)> {
        let image = RasterImage::decode(bytes, &self.config.limits)?;
        let opts = PipelineOptions::from_request(request);
        let output = panic::catch_unwind(AssertUnwindSafe(|| run_local(image, &opts)))
            .map_err(|_| Error::LocalPipelineFailure("pipeline panicked".into()))??;
        if cancelled() {
            return Err(Error::Cancelled);
        }
        let artifact = self.store.write(&output.bytes, request.output_format)?;
        Ok((artifact.url, artifact.size))
    }
}
