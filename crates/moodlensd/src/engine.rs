use moodlens_core::{EmotionPipeline, InferenceResult, PipelineError, RawImage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine workers exited")]
    ChannelClosed,
}

/// One inference request queued for the worker pool.
struct InferenceJob {
    image: RawImage,
    reply: oneshot::Sender<Result<InferenceResult, PipelineError>>,
}

/// Clone-safe handle to the engine worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<InferenceJob>,
    workers: usize,
    timeout: Option<Duration>,
}

impl EngineHandle {
    /// Run one image through the pipeline on a worker thread.
    ///
    /// When a timeout is configured and elapses, the call fails as
    /// `ClassifierUnavailable`; the worker finishes the job and drops the reply.
    pub async fn infer(&self, image: RawImage) -> Result<InferenceResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(InferenceJob { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "inference timed out");
                    return Err(PipelineError::ClassifierUnavailable(format!(
                        "inference timed out after {} ms",
                        limit.as_millis()
                    ))
                    .into());
                }
            },
            None => reply_rx.await,
        };
        let result = reply.map_err(|_| EngineError::ChannelClosed)?;
        result.map_err(EngineError::from)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Spawn `workers` dedicated OS threads sharing one bounded request queue.
///
/// The pipeline (and the models inside it) is shared, never copied.
pub fn spawn_engine(
    pipeline: Arc<EmotionPipeline>,
    workers: usize,
    queue: usize,
    timeout: Option<Duration>,
) -> Result<EngineHandle, EngineError> {
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel::<InferenceJob>(queue.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for id in 0..workers {
        let rx = Arc::clone(&rx);
        let pipeline = Arc::clone(&pipeline);
        std::thread::Builder::new()
            .name(format!("moodlens-engine-{id}"))
            .spawn(move || worker_loop(id, &rx, &pipeline))
            .map_err(EngineError::Spawn)?;
    }

    tracing::info!(workers, queue, available = pipeline.is_available(), "engine started");
    Ok(EngineHandle { tx, workers, timeout })
}

fn worker_loop(id: usize, rx: &Mutex<mpsc::Receiver<InferenceJob>>, pipeline: &EmotionPipeline) {
    tracing::debug!(worker = id, "engine worker started");
    loop {
        // Only the receive is serialized; inference runs unlocked.
        let job = {
            let mut guard = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.blocking_recv()
        };
        let Some(job) = job else { break };

        let result = pipeline.run(&job.image);
        if let Err(e) = &result {
            tracing::debug!(worker = id, error = %e, "inference failed");
        }
        let _ = job.reply.send(result);
    }
    tracing::debug!(worker = id, "engine worker exiting");
}
