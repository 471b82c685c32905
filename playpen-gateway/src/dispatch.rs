//! Request dispatch to execution workers
//!
//! The gateway talks to execution capacity through the [`Dispatcher`]
//! boundary: one job in, one structured response out, correlated by id.
//! [`WorkerPool`] is the in-process implementation: a bounded queue with a
//! fixed set of workers, each taking exactly one job at a time and replying
//! on the job's oneshot before picking up the next (the queue-consumer
//! contract a remote worker deployment would honor with prefetch = 1).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info};
use uuid::Uuid;

use playpen_common::{ExecutionRequest, ExecutionResponse};
use playpen_sandbox::{SandboxError, SandboxService};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Queue is at capacity; callers should back off (surfaced as 429).
    #[error("execution queue is full")]
    Busy,

    /// Worker went away without replying; unrecoverable engine fault.
    #[error("execution worker was lost")]
    WorkerLost,

    /// Infrastructure fault inside the run (upload backend, bridge).
    #[error("internal execution error")]
    Infrastructure(#[source] SandboxError),
}

/// Boundary between the front door and execution capacity.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: ExecutionRequest)
        -> Result<ExecutionResponse, DispatchError>;
}

struct Job {
    correlation_id: Uuid,
    request: ExecutionRequest,
    reply_to: oneshot::Sender<Result<ExecutionResponse, DispatchError>>,
}

/// In-process worker pool over a bounded job queue.
pub struct WorkerPool {
    queue: mpsc::Sender<Job>,
}

impl WorkerPool {
    /// Spawn `workers` consumers over a queue of `queue_depth` jobs.
    pub fn start(service: Arc<SandboxService>, workers: usize, queue_depth: usize) -> Self {
        let (queue, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            tokio::spawn(worker_loop(worker_id, rx.clone(), service.clone()));
        }
        Self { queue }
    }
}

async fn worker_loop(worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, service: Arc<SandboxService>) {
    loop {
        // Hold the queue lock only while taking one job: each worker has at
        // most one in flight.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            return;
        };

        info!(
            worker = worker_id,
            correlation_id = %job.correlation_id,
            code_len = job.request.code.len(),
            "worker picked up execution job"
        );

        // Script failures are absorbed into the response; only
        // infrastructure faults cross as errors. The worker itself never
        // dies on a job.
        let result = match service.execute(job.request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                error!(
                    worker = worker_id,
                    correlation_id = %job.correlation_id,
                    error = %err,
                    "execution failed with an infrastructure fault"
                );
                Err(DispatchError::Infrastructure(err))
            }
        };

        // Reply before taking the next job: the ack-after-response contract.
        let _ = job.reply_to.send(result);
    }
}

#[async_trait]
impl Dispatcher for WorkerPool {
    async fn dispatch(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResponse, DispatchError> {
        let correlation_id = Uuid::new_v4();
        let (reply_to, reply) = oneshot::channel();

        self.queue
            .try_send(Job {
                correlation_id,
                request,
                reply_to,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DispatchError::Busy,
                mpsc::error::TrySendError::Closed(_) => DispatchError::WorkerLost,
            })?;

        reply.await.map_err(|_| DispatchError::WorkerLost)?
    }
}
