//! Backend health registry and periodic prober.
//!
//! One [`HealthRegistry`] exists per process and is shared by `Arc` between
//! the dispatcher, the prober and the service workers. Each backend sits
//! behind its own mutex, so updates for different backends never contend and
//! a probe in flight never holds a lock: the network call happens first and
//! only the outcome is committed.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{Backend, ServiceConfig};

/// Last known availability of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// A configured backend and what the registry knows about it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub id: String,
    pub base_url: String,
    pub state: HealthState,
    pub last_checked: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
}

impl BackendDescriptor {
    fn new(id: &str, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.to_string(),
            state: HealthState::Unknown,
            last_checked: None,
            consecutive_failures: 0,
            last_latency_ms: None,
        }
    }
}

/// Where an outcome came from; probes and real requests have separate
/// failure thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Probe,
    Request,
}

/// Per-backend health state for a fixed set of backends
#[derive(Debug)]
pub struct HealthRegistry {
    backends: Vec<Mutex<BackendDescriptor>>,
    index: HashMap<String, usize>,
    probe_failure_threshold: u32,
    request_failure_threshold: u32,
}

impl HealthRegistry {
    /// All configured backends start `Unknown`.
    pub fn new(config: &ServiceConfig) -> Self {
        let backends: Vec<_> = config
            .backends
            .iter()
            .map(|b| Mutex::new(BackendDescriptor::new(&b.id, &b.base_url)))
            .collect();
        let index = config.backends.iter().enumerate().map(|(i, b)| (b.id.clone(), i)).collect();
        Self {
            backends,
            index,
            probe_failure_threshold: config.probe_failure_threshold.max(1),
            request_failure_threshold: config.request_failure_threshold.max(1),
        }
    }

    fn slot(&self, id: &str) -> Option<MutexGuard<'_, BackendDescriptor>> {
        let i = *self.index.get(id)?;
        // a poisoned descriptor is still a valid descriptor
        Some(self.backends[i].lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn is_healthy(&self, id: &str) -> bool {
        self.slot(id).map_or(false, |d| d.state == HealthState::Healthy)
    }

    pub fn state(&self, id: &str) -> Option<HealthState> {
        self.slot(id).map(|d| d.state)
    }

    /// Record the outcome of a real vectorization request.
    pub fn record_outcome(&self, id: &str, success: bool, latency_ms: u64) {
        self.record(id, success, latency_ms, Source::Request);
    }

    /// Record the outcome of a health probe.
    pub fn record_probe(&self, id: &str, success: bool, latency_ms: u64) {
        self.record(id, success, latency_ms, Source::Probe);
    }

    fn record(&self, id: &str, success: bool, latency_ms: u64, source: Source) {
        let Some(mut d) = self.slot(id) else {
            warn!("health outcome for unknown backend '{}' ignored", id);
            return;
        };
        d.last_checked = Some(SystemTime::now());
        d.last_latency_ms = Some(latency_ms);
        let before = d.state;

        if success {
            d.consecutive_failures = 0;
            d.state = HealthState::Healthy;
        } else {
            d.consecutive_failures = d.consecutive_failures.saturating_add(1);
            let threshold = match source {
                Source::Probe => self.probe_failure_threshold,
                Source::Request => self.request_failure_threshold,
            };
            if d.consecutive_failures >= threshold {
                d.state = HealthState::Unhealthy;
            }
        }

        if d.state != before {
            info!(
                "backend {} {:?} -> {:?} after {:?} ({} consecutive failures)",
                d.id, before, d.state, source, d.consecutive_failures
            );
        }
    }

    /// Healthy backends in configured order.
    pub fn healthy_backends(&self) -> Vec<BackendDescriptor> {
        self.snapshot().into_iter().filter(|d| d.state == HealthState::Healthy).collect()
    }

    /// Copy of every descriptor, in configured order.
    pub fn snapshot(&self) -> Vec<BackendDescriptor> {
        self.backends.iter().map(|m| m.lock().unwrap_or_else(|e| e.into_inner()).clone()).collect()
    }

    pub fn descriptor(&self, id: &str) -> Option<BackendDescriptor> {
        self.slot(id).map(|d| d.clone())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Probe every backend once and commit the results.
pub fn probe_all(registry: &HealthRegistry, backends: &[Arc<dyn Backend>]) {
    for backend in backends {
        let started = Instant::now();
        let res = backend.probe();
        let latency = started.elapsed().as_millis() as u64;
        match &res {
            Ok(()) => debug!("probe {} ok in {}ms", backend.id(), latency),
            Err(e) => debug!("probe {} failed: {}", backend.id(), e),
        }
        registry.record_probe(backend.id(), res.is_ok(), latency);
    }
}

/// Background thread that probes all backends on a fixed interval.
///
/// The first round runs immediately. Dropping the prober (or calling
/// [`HealthProber::stop`]) ends the loop at its next wake-up.
pub struct HealthProber {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl HealthProber {
    pub fn spawn(registry: Arc<HealthRegistry>, backends: Vec<Arc<dyn Backend>>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || loop {
            probe_all(&registry, &backends);
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self { stop_tx, handle: Some(handle) }
    }

    /// Stop probing and wait for an in-flight round to finish.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
