//! Embedding pipeline worker — isolates model loading and inference from callers
//!
//! The pipeline is a dedicated tokio task that owns the embedding backend.
//! Callers hold a cloneable [`EmbeddingPipeline`] handle and communicate over
//! an mpsc channel; every request carries a `Uuid` correlation id and every
//! reply is tagged with it, so multiple in-flight requests stay
//! distinguishable.
//!
//! Initialization is memoized by construction: the worker processes commands
//! sequentially, so concurrent `initialize()` callers queue behind the one
//! in-flight load instead of triggering duplicate loads. A failed attempt is
//! terminal for that attempt; the next `initialize()` retries.
//!
//! Batch requests are processed item-by-item inside the worker to keep peak
//! memory bounded; one item's failure never aborts its siblings.
//!
//! In-flight requests cannot be cancelled. A profile re-embed that races an
//! input change is resolved by the caller's fingerprint check on the next
//! read, so cancellation has not been worth the complexity yet.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::config::EmbeddingSettings;
use crate::embeddings::{
    content_hash, truncate_for_model, Embedded, EmbeddingBackend, EmbeddingError,
};

/// Builds the backend inside the worker. Runs on the blocking thread pool —
/// model loading is blocking I/O.
pub type BackendFactory =
    dyn Fn() -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> + Send + Sync;

/// Initialization stages, emitted as progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Download,
    Load,
    Ready,
}

/// Observational progress event. Never changes control flow.
#[derive(Debug, Clone)]
pub struct InitProgress {
    pub stage: InitStage,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
enum EmbedKind {
    Document,
    Query,
}

/// Per-item embedding outcome: `Ok(None)` is graceful degradation.
pub type ItemResult = Result<Option<Embedded>, EmbeddingError>;

struct InitReply {
    request_id: Uuid,
    result: Result<(), EmbeddingError>,
}

struct EmbedReply {
    request_id: Uuid,
    result: ItemResult,
}

struct BatchReply {
    request_id: Uuid,
    result: Result<Vec<ItemResult>, EmbeddingError>,
}

enum Command {
    Initialize {
        request_id: Uuid,
        reply: oneshot::Sender<InitReply>,
    },
    Embed {
        request_id: Uuid,
        text: String,
        kind: EmbedKind,
        reply: oneshot::Sender<EmbedReply>,
    },
    EmbedBatch {
        request_id: Uuid,
        items: Vec<String>,
        reply: oneshot::Sender<BatchReply>,
    },
}

/// Cloneable handle to the pipeline worker task.
#[derive(Clone)]
pub struct EmbeddingPipeline {
    tx: mpsc::Sender<Command>,
    progress: broadcast::Sender<InitProgress>,
}

impl EmbeddingPipeline {
    /// Spawn the worker task and return a handle to it.
    pub fn spawn<F>(factory: F, settings: &EmbeddingSettings) -> Self
    where
        F: Fn() -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        let (progress_tx, _) = broadcast::channel(16);
        let max_chars =
            settings.max_input_tokens as usize * settings.chars_per_token as usize;

        tokio::spawn(run_worker(
            rx,
            Arc::new(factory),
            progress_tx.clone(),
            max_chars,
        ));

        Self {
            tx,
            progress: progress_tx,
        }
    }

    /// Spawn a pipeline whose backend is selected by application settings.
    pub fn spawn_from_settings(settings: &EmbeddingSettings) -> Self {
        let factory_settings = settings.clone();
        Self::spawn(
            move || crate::embeddings::create_backend_from_settings(&factory_settings),
            settings,
        )
    }

    /// Subscribe to initialization progress events.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<InitProgress> {
        self.progress.subscribe()
    }

    /// Initialize the backend. Idempotent; concurrent callers await the same
    /// in-flight load. A failure is surfaced and the next call retries.
    pub async fn initialize(&self) -> Result<(), EmbeddingError> {
        let request_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Initialize {
                request_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EmbeddingError::WorkerUnavailable)?;

        let reply = reply_rx.await.map_err(|_| EmbeddingError::WorkerUnavailable)?;
        if reply.request_id != request_id {
            tracing::warn!(
                expected = %request_id,
                got = %reply.request_id,
                "Pipeline reply correlation id mismatch"
            );
        }
        reply.result
    }

    /// Embed a document text. Returns the vector plus a hash of the original,
    /// untruncated text; `Ok(None)` means the backend degraded gracefully.
    pub async fn embed(&self, text: &str) -> ItemResult {
        self.embed_kind(text, EmbedKind::Document).await
    }

    /// Embed a search query (task-hinting backends specialize this).
    pub async fn embed_query(&self, text: &str) -> ItemResult {
        self.embed_kind(text, EmbedKind::Query).await
    }

    async fn embed_kind(&self, text: &str, kind: EmbedKind) -> ItemResult {
        let request_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Embed {
                request_id,
                text: text.to_string(),
                kind,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EmbeddingError::WorkerUnavailable)?;

        let reply = reply_rx.await.map_err(|_| EmbeddingError::WorkerUnavailable)?;
        if reply.request_id != request_id {
            tracing::warn!(
                expected = %request_id,
                got = %reply.request_id,
                "Pipeline reply correlation id mismatch"
            );
        }
        reply.result
    }

    /// Embed a batch of document texts. Items are processed one at a time
    /// inside the worker; each item independently succeeds or fails. The
    /// outer error covers only whole-batch failures (backend never came up).
    pub async fn embed_batch(
        &self,
        items: Vec<String>,
    ) -> Result<Vec<ItemResult>, EmbeddingError> {
        let request_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::EmbedBatch {
                request_id,
                items,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EmbeddingError::WorkerUnavailable)?;

        let reply = reply_rx.await.map_err(|_| EmbeddingError::WorkerUnavailable)?;
        if reply.request_id != request_id {
            tracing::warn!(
                expected = %request_id,
                got = %reply.request_id,
                "Pipeline reply correlation id mismatch"
            );
        }
        reply.result
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn run_worker(
    mut rx: mpsc::Receiver<Command>,
    factory: Arc<BackendFactory>,
    progress: broadcast::Sender<InitProgress>,
    max_chars: usize,
) {
    let mut backend: Option<Box<dyn EmbeddingBackend>> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Initialize { request_id, reply } => {
                let result = ensure_backend(&mut backend, &factory, &progress)
                    .await
                    .map(|_| ());
                if let Err(e) = &result {
                    tracing::error!(request_id = %request_id, error = %e, "Pipeline initialization failed");
                }
                let _ = reply.send(InitReply { request_id, result });
            }
            Command::Embed {
                request_id,
                text,
                kind,
                reply,
            } => {
                let result = match ensure_backend(&mut backend, &factory, &progress).await {
                    Ok(b) => embed_one(b, &text, kind, max_chars).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(EmbedReply { request_id, result });
            }
            Command::EmbedBatch {
                request_id,
                items,
                reply,
            } => {
                let result = match ensure_backend(&mut backend, &factory, &progress).await {
                    Ok(b) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in &items {
                            let item_result =
                                embed_one(b, item, EmbedKind::Document, max_chars).await;
                            if let Err(e) = &item_result {
                                tracing::warn!(
                                    request_id = %request_id,
                                    error = %e,
                                    "Batch item failed to embed, continuing"
                                );
                            }
                            out.push(item_result);
                        }
                        Ok(out)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(BatchReply { request_id, result });
            }
        }
    }

    tracing::debug!("Embedding pipeline worker shutting down");
}

/// Load the backend if it is not loaded yet. The worker loop is sequential,
/// so this runs at most once at a time; a successful load is kept for the
/// lifetime of the worker.
async fn ensure_backend<'a>(
    slot: &'a mut Option<Box<dyn EmbeddingBackend>>,
    factory: &Arc<BackendFactory>,
    progress: &broadcast::Sender<InitProgress>,
) -> Result<&'a dyn EmbeddingBackend, EmbeddingError> {
    if slot.is_none() {
        emit(progress, InitStage::Download, "resolving model assets");
        emit(progress, InitStage::Load, "loading embedding backend");

        let factory = Arc::clone(factory);
        let built = tokio::task::spawn_blocking(move || factory())
            .await
            .map_err(|e| EmbeddingError::Initialization(format!("load task join error: {e}")))?;

        match built {
            Ok(b) => {
                emit(progress, InitStage::Ready, b.name());
                tracing::info!(backend = b.name(), dimensions = b.dimensions(), "Embedding backend ready");
                *slot = Some(b);
            }
            Err(e) => {
                return Err(EmbeddingError::Initialization(e.to_string()));
            }
        }
    }

    slot.as_deref()
        .ok_or_else(|| EmbeddingError::Initialization("backend missing after load".to_string()))
}

async fn embed_one(
    backend: &dyn EmbeddingBackend,
    text: &str,
    kind: EmbedKind,
    max_chars: usize,
) -> ItemResult {
    // Hash the original text; truncation only affects what the model sees.
    let hash = content_hash(text);
    let truncated = truncate_for_model(text, max_chars);

    let vector = match kind {
        EmbedKind::Document => backend.embed(truncated).await?,
        EmbedKind::Query => backend.embed_query(truncated).await?,
    };

    Ok(vector.map(|v| Embedded {
        vector: v,
        content_hash: hash,
    }))
}

fn emit(progress: &broadcast::Sender<InitProgress>, stage: InitStage, message: &str) {
    let _ = progress.send(InitProgress {
        stage,
        message: message.to_string(),
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that returns a fixed vector and counts calls; texts containing
    /// "poison" fail, to exercise per-item isolation.
    struct MockBackend {
        dims: usize,
        embed_calls: Arc<AtomicUsize>,
        last_text_len: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingBackend for MockBackend {
        async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            self.last_text_len.store(text.chars().count(), Ordering::SeqCst);
            if text.contains("poison") {
                return Err(EmbeddingError::OnnxInference("poisoned input".to_string()));
            }
            Ok(Some(vec![0.5; self.dims]))
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        fn name(&self) -> &str {
            "mock"
        }
    }

    struct TestHarness {
        pipeline: EmbeddingPipeline,
        init_calls: Arc<AtomicUsize>,
        embed_calls: Arc<AtomicUsize>,
        last_text_len: Arc<AtomicUsize>,
    }

    fn settings_with_budget(max_input_tokens: u32) -> EmbeddingSettings {
        EmbeddingSettings {
            max_input_tokens,
            chars_per_token: 3,
            ..EmbeddingSettings::default()
        }
    }

    fn spawn_mock_pipeline(settings: &EmbeddingSettings) -> TestHarness {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let embed_calls = Arc::new(AtomicUsize::new(0));
        let last_text_len = Arc::new(AtomicUsize::new(0));

        let init_counter = Arc::clone(&init_calls);
        let embed_counter = Arc::clone(&embed_calls);
        let len_slot = Arc::clone(&last_text_len);

        let pipeline = EmbeddingPipeline::spawn(
            move || {
                init_counter.fetch_add(1, Ordering::SeqCst);
                // Simulate a slow model load so concurrent initializers overlap.
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Box::new(MockBackend {
                    dims: 8,
                    embed_calls: Arc::clone(&embed_counter),
                    last_text_len: Arc::clone(&len_slot),
                }) as Box<dyn EmbeddingBackend>)
            },
            settings,
        );

        TestHarness {
            pipeline,
            init_calls,
            embed_calls,
            last_text_len,
        }
    }

    #[tokio::test]
    async fn test_concurrent_initialize_loads_backend_once() {
        let harness = spawn_mock_pipeline(&EmbeddingSettings::default());

        let (a, b, c) = tokio::join!(
            harness.pipeline.initialize(),
            harness.pipeline.initialize(),
            harness.pipeline.initialize(),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(
            harness.init_calls.load(Ordering::SeqCst),
            1,
            "Concurrent initialize must share one in-flight load"
        );

        // A later call is a no-op on the already-loaded backend.
        harness.pipeline.initialize().await.unwrap();
        assert_eq!(harness.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_surfaced_then_retryable() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_factory = Arc::clone(&attempts);

        let pipeline = EmbeddingPipeline::spawn(
            move || {
                let n = attempts_in_factory.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(EmbeddingError::ModelNotFound {
                        path: "/missing/model.onnx".to_string(),
                    })
                } else {
                    Ok(Box::new(MockBackend {
                        dims: 8,
                        embed_calls: Arc::new(AtomicUsize::new(0)),
                        last_text_len: Arc::new(AtomicUsize::new(0)),
                    }) as Box<dyn EmbeddingBackend>)
                }
            },
            &EmbeddingSettings::default(),
        );

        let first = pipeline.initialize().await;
        match first {
            Err(EmbeddingError::Initialization(msg)) => {
                assert!(msg.contains("/missing/model.onnx"), "got: {msg}");
            }
            other => panic!("Expected Initialization error, got: {other:?}"),
        }

        // The failed attempt is terminal, but a fresh call retries.
        let second = pipeline.initialize().await;
        assert!(second.is_ok(), "Expected retry to succeed: {:?}", second.err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_embed_returns_vector_and_hash_of_original_text() {
        let harness = spawn_mock_pipeline(&EmbeddingSettings::default());

        let embedded = harness
            .pipeline
            .embed("senior backend engineer")
            .await
            .unwrap()
            .expect("mock backend always returns a vector");

        assert_eq!(embedded.vector.len(), 8);
        assert_eq!(embedded.content_hash, content_hash("senior backend engineer"));
    }

    #[tokio::test]
    async fn test_long_text_is_truncated_but_hash_covers_full_text() {
        // Budget: 4 tokens * 3 chars = 12 chars.
        let harness = spawn_mock_pipeline(&settings_with_budget(4));
        let long_text = "x".repeat(100);

        let embedded = harness
            .pipeline
            .embed(&long_text)
            .await
            .unwrap()
            .expect("vector");

        assert_eq!(
            harness.last_text_len.load(Ordering::SeqCst),
            12,
            "Model input should be truncated to the char budget"
        );
        assert_eq!(
            embedded.content_hash,
            content_hash(&long_text),
            "Hash must cover the original, untruncated text"
        );
    }

    #[tokio::test]
    async fn test_batch_item_failure_does_not_abort_siblings() {
        let harness = spawn_mock_pipeline(&EmbeddingSettings::default());

        let results = harness
            .pipeline
            .embed_batch(vec![
                "first story".to_string(),
                "poison pill".to_string(),
                "third story".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err(), "Poisoned item must fail alone");
        assert!(results[2].is_ok(), "Items after a failure must still embed");
        assert_eq!(harness.embed_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_progress_events_reach_subscribers() {
        let harness = spawn_mock_pipeline(&EmbeddingSettings::default());
        let mut progress = harness.pipeline.subscribe_progress();

        harness.pipeline.initialize().await.unwrap();

        let mut stages = Vec::new();
        while let Ok(event) = progress.try_recv() {
            stages.push(event.stage);
        }
        assert!(
            stages.contains(&InitStage::Ready),
            "Expected a Ready event, got: {stages:?}"
        );
    }

    #[tokio::test]
    async fn test_worker_replies_echo_correlation_ids() {
        let (tx, rx) = mpsc::channel(4);
        let (progress_tx, _) = broadcast::channel(16);

        tokio::spawn(run_worker(
            rx,
            Arc::new(|| {
                Ok(Box::new(MockBackend {
                    dims: 4,
                    embed_calls: Arc::new(AtomicUsize::new(0)),
                    last_text_len: Arc::new(AtomicUsize::new(0)),
                }) as Box<dyn EmbeddingBackend>)
            }),
            progress_tx,
            4096,
        ));

        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();

        let (reply_a_tx, reply_a_rx) = oneshot::channel();
        let (reply_b_tx, reply_b_rx) = oneshot::channel();

        tx.send(Command::Embed {
            request_id: id_a,
            text: "alpha".to_string(),
            kind: EmbedKind::Document,
            reply: reply_a_tx,
        })
        .await
        .unwrap();
        tx.send(Command::Embed {
            request_id: id_b,
            text: "beta".to_string(),
            kind: EmbedKind::Document,
            reply: reply_b_tx,
        })
        .await
        .unwrap();

        let reply_a = reply_a_rx.await.unwrap();
        let reply_b = reply_b_rx.await.unwrap();

        assert_eq!(reply_a.request_id, id_a);
        assert_eq!(reply_b.request_id, id_b);
        assert!(reply_a.result.is_ok());
        assert!(reply_b.result.is_ok());
    }

    #[tokio::test]
    async fn test_embed_after_worker_gone_reports_unavailable() {
        let harness = spawn_mock_pipeline(&EmbeddingSettings::default());
        // Dropping all senders is the only shutdown path; simulate the other
        // side by dropping the handle's channel via a fresh, closed pipeline.
        let (tx, rx) = mpsc::channel::<Command>(1);
        drop(rx);
        let orphaned = EmbeddingPipeline {
            tx,
            progress: harness.pipeline.progress.clone(),
        };

        let result = orphaned.embed("anything").await;
        match result {
            Err(EmbeddingError::WorkerUnavailable) => {}
            other => panic!("Expected WorkerUnavailable, got: {other:?}"),
        }
    }
}
