//! Dynamic batch scheduler for local embedding.
//!
//! Coalesces many small, latency-sensitive embedding requests into fewer
//! large encoder invocations without starving any individual caller.
//! Batches close when the request count reaches `max_batch_size`, the token
//! budget would be exceeded, or the first request has waited `max_wait_time`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::ProviderError;

/// The wrapped encoder: a synchronous blocking call into the model runtime.
/// The scheduler invokes it on the blocking pool, never on its own loop.
pub trait TextEncoder: Send + Sync + 'static {
    /// Encode `texts` into one vector per text, in input order.
    /// `batch_size` is the runtime-internal micro-batch size pass-through.
    fn encode(&self, texts: &[String], batch_size: Option<usize>) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Dimensionality of produced vectors.
    fn dim(&self) -> usize;

    /// Model identifier used in metrics and logs.
    fn model_name(&self) -> &str;

    /// Token counts for `texts` via the runtime's tokenizer. `None` makes
    /// the scheduler fall back to a character-count heuristic, applied
    /// uniformly for the scheduler's lifetime.
    fn count_tokens(&self, texts: &[String]) -> Option<usize> {
        let _ = texts;
        None
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum requests per batch.
    pub max_batch_size: usize,
    /// Dwell bound measured from the first request's arrival.
    pub max_wait_time: Duration,
    /// Optional token budget per batch. A single oversized request still
    /// dispatches alone.
    pub max_batch_tokens: Option<usize>,
    /// Pass-through micro-batch size for the encoder.
    pub encode_batch_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            max_wait_time: Duration::from_millis(100),
            max_batch_tokens: None,
            encode_batch_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Read batching knobs from a model's extra-params map.
    pub fn from_model_config(config: &mica_core::models::ModelConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_batch_size: config
                .extra_usize("max_batch_size")
                .unwrap_or(defaults.max_batch_size),
            max_wait_time: config
                .extra_f64("max_wait_time")
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.max_wait_time),
            max_batch_tokens: config.extra_usize("max_batch_tokens"),
            encode_batch_size: config.extra_usize("encode_batch_size"),
        }
    }
}

/// One caller request: the texts, the completion slot, and the arrival time
/// that anchors the dwell clock.
struct BatchRequest {
    texts: Vec<String>,
    slot: oneshot::Sender<Result<Vec<Vec<f32>>, ProviderError>>,
    arrived: Instant,
}

/// Dynamic batch scheduler. `embed` enqueues a request and waits on its
/// completion slot; a single background loop collects and dispatches
/// batches.
pub struct BatchScheduler {
    tx: mpsc::UnboundedSender<BatchRequest>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutting_down: Arc<AtomicBool>,
    dim: usize,
}

impl BatchScheduler {
    /// Start the scheduler's background loop over the given encoder.
    pub fn start(encoder: Arc<dyn TextEncoder>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutting_down = Arc::new(AtomicBool::new(false));
        let dim = encoder.dim();

        info!(
            model = encoder.model_name(),
            max_batch_size = config.max_batch_size,
            max_wait_ms = config.max_wait_time.as_millis() as u64,
            max_batch_tokens = ?config.max_batch_tokens,
            "starting batch scheduler"
        );

        let handle = tokio::spawn(process_loop(rx, encoder, config, shutting_down.clone()));

        Self {
            tx,
            handle: std::sync::Mutex::new(Some(handle)),
            shutting_down,
            dim,
        }
    }

    /// Submit an embedding request and wait for the result. An empty input
    /// returns an empty matrix without touching the queue.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ProviderError::Cancelled);
        }

        let (slot, result) = oneshot::channel();
        let request = BatchRequest {
            texts,
            slot,
            arrived: Instant::now(),
        };
        self.tx
            .send(request)
            .map_err(|_| ProviderError::Cancelled)?;

        // A dropped sender means the loop was cancelled with this request
        // still outstanding.
        result.await.map_err(|_| ProviderError::Cancelled)?
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Cancel the background loop. In-flight completion slots are dropped,
    /// which surfaces as a cancellation error to their callers. Idempotent.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);

        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!("batch scheduler shut down");
        }
    }
}

async fn process_loop(
    mut rx: mpsc::UnboundedReceiver<BatchRequest>,
    encoder: Arc<dyn TextEncoder>,
    config: SchedulerConfig,
    shutting_down: Arc<AtomicBool>,
) {
    debug!("batch scheduler loop started");
    let mut deferred: VecDeque<BatchRequest> = VecDeque::new();

    while !shutting_down.load(Ordering::Acquire) {
        let Some(batch) = collect_batch(&mut rx, &mut deferred, encoder.as_ref(), &config).await
        else {
            // All senders gone and nothing deferred.
            break;
        };

        if batch.is_empty() {
            continue;
        }

        // Encode on a spawned task so the loop keeps collecting the next
        // batch while the encoder works.
        tokio::spawn(dispatch_batch(
            batch,
            Arc::clone(&encoder),
            config.encode_batch_size,
        ));
    }

    debug!("batch scheduler loop stopped");
}

/// Collect one batch: deferred requests lead, the first request anchors the
/// dwell clock, then the queue is drained non-blocking and finally with a
/// timeout bounded by the remaining wait budget.
async fn collect_batch(
    rx: &mut mpsc::UnboundedReceiver<BatchRequest>,
    deferred: &mut VecDeque<BatchRequest>,
    encoder: &dyn TextEncoder,
    config: &SchedulerConfig,
) -> Option<Vec<BatchRequest>> {
    let mut batch = Vec::new();

    // The first request always enters the batch, budget or not: a single
    // oversized request must still make progress.
    let first = match deferred.pop_front() {
        Some(request) => request,
        None => rx.recv().await?,
    };
    let first_arrival = first.arrived;
    let budget = config.max_batch_tokens;
    let mut total_tokens = if budget.is_some() {
        request_tokens(encoder, &first)
    } else {
        0
    };
    batch.push(first);

    // Deferred requests lead this batch while they fit; the first one that
    // does not stays deferred.
    while batch.len() < config.max_batch_size {
        let fits = match (deferred.front(), budget) {
            (None, _) => break,
            (Some(_), None) => true,
            (Some(candidate), Some(limit)) => {
                let tokens = request_tokens(encoder, candidate);
                if total_tokens + tokens > limit {
                    false
                } else {
                    total_tokens += tokens;
                    true
                }
            }
        };
        if !fits {
            break;
        }
        if let Some(request) = deferred.pop_front() {
            batch.push(request);
        }
    }

    // Drain whatever is already queued without blocking. An overshooting
    // request moves to the deferred list and ends collection.
    while batch.len() < config.max_batch_size {
        match rx.try_recv() {
            Ok(request) => {
                if let Some(limit) = budget {
                    let tokens = request_tokens(encoder, &request);
                    if total_tokens + tokens > limit {
                        deferred.push_back(request);
                        log_collected(&batch, first_arrival, total_tokens, budget);
                        return Some(batch);
                    }
                    total_tokens += tokens;
                }
                batch.push(request);
            }
            Err(_) => break,
        }
    }

    // Wait for stragglers until the first request's dwell budget runs out.
    while batch.len() < config.max_batch_size {
        let Some(remaining) = config.max_wait_time.checked_sub(first_arrival.elapsed()) else {
            break;
        };
        match tokio::time::timeout(remaining, rx.recv()).await {
            Err(_) => break,
            Ok(None) => break,
            Ok(Some(request)) => {
                if let Some(limit) = budget {
                    let tokens = request_tokens(encoder, &request);
                    if total_tokens + tokens > limit {
                        deferred.push_back(request);
                        break;
                    }
                    total_tokens += tokens;
                }
                batch.push(request);
            }
        }
    }

    log_collected(&batch, first_arrival, total_tokens, budget);
    Some(batch)
}

fn log_collected(
    batch: &[BatchRequest],
    first_arrival: Instant,
    total_tokens: usize,
    budget: Option<usize>,
) {
    debug!(
        requests = batch.len(),
        waited_ms = first_arrival.elapsed().as_millis() as u64,
        tokens = total_tokens,
        token_budget = ?budget,
        "collected batch"
    );
}

/// Flatten the batch, encode it off the loop, and distribute row slices back
/// to each request's completion slot. Any failure fails the whole batch.
async fn dispatch_batch(
    batch: Vec<BatchRequest>,
    encoder: Arc<dyn TextEncoder>,
    encode_batch_size: Option<usize>,
) {
    let mut all_texts: Vec<String> = Vec::new();
    let mut spans = Vec::with_capacity(batch.len());
    for request in &batch {
        let start = all_texts.len();
        all_texts.extend(request.texts.iter().cloned());
        spans.push((start, all_texts.len()));
    }

    let text_count = all_texts.len();
    debug!(
        requests = batch.len(),
        texts = text_count,
        "dispatching batch"
    );

    let started = Instant::now();
    let worker_encoder = Arc::clone(&encoder);
    let result = tokio::task::spawn_blocking(move || {
        worker_encoder.encode(&all_texts, encode_batch_size)
    })
    .await;

    let duration = started.elapsed().as_secs_f64();
    let model = encoder.model_name();

    let rows = match result {
        Ok(Ok(rows)) if rows.len() == text_count => rows,
        Ok(Ok(rows)) => {
            mica_core::observability::record_embedding_batch(model, duration, text_count, false);
            let message = format!(
                "encoder returned {} rows for {} texts",
                rows.len(),
                text_count
            );
            error!(model, %message, "batch dispatch failed");
            return fail_batch(batch, &message);
        }
        Ok(Err(e)) => {
            mica_core::observability::record_embedding_batch(model, duration, text_count, false);
            error!(model, error = %e, "batch encoding failed");
            return fail_batch(batch, &e.to_string());
        }
        Err(join_error) => {
            mica_core::observability::record_embedding_batch(model, duration, text_count, false);
            error!(model, error = %join_error, "encoder task panicked");
            return fail_batch(batch, &format!("encoder task panicked: {join_error}"));
        }
    };

    mica_core::observability::record_embedding_batch(model, duration, text_count, true);

    let mut rows = rows.into_iter();
    for (request, (start, end)) in batch.into_iter().zip(spans) {
        let slice: Vec<Vec<f32>> = rows.by_ref().take(end - start).collect();
        // A closed slot just means the caller gave up waiting.
        let _ = request.slot.send(Ok(slice));
    }
}

fn fail_batch(batch: Vec<BatchRequest>, message: &str) {
    for request in batch {
        let _ = request
            .slot
            .send(Err(ProviderError::Encoder(message.to_string())));
    }
}

fn request_tokens(encoder: &dyn TextEncoder, request: &BatchRequest) -> usize {
    encoder
        .count_tokens(&request.texts)
        .unwrap_or_else(|| request.texts.iter().map(String::len).sum())
}
