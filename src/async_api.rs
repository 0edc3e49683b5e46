use crate::dispatch::Dispatcher;
use crate::health::{BackendDescriptor, HealthRegistry};
use crate::{Error, Result, ServiceConfig, VectorizationRequest, VectorizationResult};
use log::debug;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

enum Job {
    Dispatch(VectorizationRequest, oneshot::Sender<VectorizationResult>),
    Probe(oneshot::Sender<Vec<BackendDescriptor>>),
}

enum Control {
    Close(oneshot::Sender<()>),
}

/// An async-friendly vectorization service backed by a pool of worker threads.
///
/// The dispatcher (and the blocking HTTP clients inside it) is created, used
/// and dropped on the service's own threads, never on the async executor.
/// Workers share one job queue; each job carries a `oneshot` reply channel.
/// Dropping a pending `dispatch` future closes that channel, which the worker
/// treats as a cancellation.
pub struct VectorService {
    job_tx: Sender<Job>,
    control_tx: Sender<Control>,
    registry: Arc<HealthRegistry>,
}

impl VectorService {
    /// Start the service: dispatcher, health prober and worker pool.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(HealthRegistry::new(&config));

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (control_tx, control_rx) = mpsc::channel::<Control>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        let shared = Arc::clone(&registry);
        thread::spawn(move || {
            let workers = config.effective_workers();
            let dispatcher = match Dispatcher::new(config, shared) {
                Ok(d) => Arc::new(d),
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let prober = dispatcher.spawn_prober();

            let job_rx = Arc::new(Mutex::new(job_rx));
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let dispatcher = Arc::clone(&dispatcher);
                    let job_rx = Arc::clone(&job_rx);
                    thread::spawn(move || worker_loop(&dispatcher, &job_rx))
                })
                .collect();

            let _ = init_tx.send(Ok(()));

            // Block until close() or until the service handle is dropped
            let reply = match control_rx.recv() {
                Ok(Control::Close(reply)) => Some(reply),
                Err(_) => None,
            };

            if let Some(p) = prober {
                p.stop();
            }
            for h in handles {
                let _ = h.join();
            }
            drop(dispatcher);
            if let Some(reply) = reply {
                let _ = reply.send(());
            }
        });

        init_rx
            .await
            .map_err(|e| Error::LocalPipelineFailure(format!("Service init canceled: {}", e)))??;

        Ok(Self { job_tx, control_tx, registry })
    }

    /// Vectorize one request on the worker pool.
    ///
    /// Dropping the returned future abandons the request: remaining remote
    /// attempts are skipped and any local result is discarded unstored.
    pub async fn dispatch(&self, request: VectorizationRequest) -> Result<VectorizationResult> {
        let (tx, rx) = oneshot::channel();
        self.job_tx
            .send(Job::Dispatch(request, tx))
            .map_err(|_| Error::LocalPipelineFailure("vector service is closed".into()))?;
        rx.await
            .map_err(|e| Error::LocalPipelineFailure(format!("Dispatch canceled: {}", e)))
    }

    /// Dispatch a batch concurrently; results come back in request order.
    pub async fn dispatch_all(&self, requests: Vec<VectorizationRequest>) -> Vec<Result<VectorizationResult>> {
        futures::future::join_all(requests.into_iter().map(|r| self.dispatch(r))).await
    }

    /// Probe every backend now and return the refreshed descriptors.
    pub async fn probe(&self) -> Result<Vec<BackendDescriptor>> {
        let (tx, rx) = oneshot::channel();
        self.job_tx
            .send(Job::Probe(tx))
            .map_err(|_| Error::LocalPipelineFailure("vector service is closed".into()))?;
        rx.await
            .map_err(|e| Error::LocalPipelineFailure(format!("Probe canceled: {}", e)))
    }

    /// Current health view, without probing.
    pub fn health(&self) -> Vec<BackendDescriptor> {
        self.registry.snapshot()
    }

    /// Stop the prober, let queued jobs drain and shut the workers down.
    pub async fn close(self) -> Result<()> {
        let Self { job_tx, control_tx, .. } = self;
        drop(job_tx);
        let (tx, rx) = oneshot::channel();
        let _ = control_tx.send(Control::Close(tx));
        rx.await
            .map_err(|e| Error::LocalPipelineFailure(format!("Close canceled: {}", e)))
    }
}

fn worker_loop(dispatcher: &Dispatcher, jobs: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let rx = match jobs.lock() {
                Ok(rx) => rx,
                Err(poisoned) => poisoned.into_inner(),
            };
            rx.recv()
        };
        match job {
            Ok(Job::Dispatch(request, reply)) => {
                if reply.is_closed() {
                    debug!("caller gone before dispatch started");
                    continue;
                }
                let result = dispatcher.dispatch_cancellable(request, &|| reply.is_closed());
                if reply.send(result).is_err() {
                    debug!("caller gone, result dropped");
                }
            }
            Ok(Job::Probe(reply)) => {
                dispatcher.probe_all();
                let _ = reply.send(dispatcher.registry().snapshot());
            }
            Err(_) => break,
        }
    }
}
