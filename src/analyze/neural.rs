//! Neural classifier adapter: loader abstraction + single-flight lazy load + bounded inference.
//!
//! The 3-class model (NEG/NEU/POS) sits behind [`SequenceClassifier`]. Loading goes through
//! a [`ModelLoader`] the first time [`NeuralAdapter::ensure_loaded`] runs; the outcome
//! (model or error) is cached for the lifetime of the adapter, so a failed load is
//! reported once and every later call goes straight to the degraded path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{NeuralBackend, NeuralConfig};
use crate::error::ModelError;

/// Class probabilities from the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbs {
    pub neg: f32,
    pub neu: f32,
    pub pos: f32,
}

impl ClassProbs {
    /// Neutral-leaning distribution used for empty input.
    pub const NEUTRAL_PRIOR: ClassProbs = ClassProbs {
        neg: 0.25,
        neu: 0.5,
        pos: 0.25,
    };

    /// Rescale to sum 1; negative or non-finite entries count as 0.
    pub fn normalized(self) -> Self {
        let clean = |x: f32| if x.is_finite() && x > 0.0 { x } else { 0.0 };
        let (neg, neu, pos) = (clean(self.neg), clean(self.neu), clean(self.pos));
        let sum = neg + neu + pos;
        if sum <= f32::EPSILON {
            return Self::NEUTRAL_PRIOR;
        }
        Self {
            neg: neg / sum,
            neu: neu / sum,
            pos: pos / sum,
        }
    }

    /// Signed polarity `pos - neg` in [-1, 1].
    pub fn polarity(&self) -> f32 {
        (self.pos - self.neg).clamp(-1.0, 1.0)
    }

    /// Highest class probability.
    pub fn confidence(&self) -> f32 {
        self.neg.max(self.neu).max(self.pos)
    }
}

/// A loaded sequence classifier. Implementations must be safe for concurrent reads.
#[async_trait]
pub trait SequenceClassifier: Send + Sync {
    async fn predict(&self, text: &str) -> Result<ClassProbs, ModelError>;
    fn name(&self) -> &'static str;
}

/// Produces a classifier; called at most once per adapter.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn SequenceClassifier>, ModelError>;
    fn name(&self) -> &'static str;
}

/// Observable adapter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum NeuralStatus {
    NotLoaded,
    Ready,
    Unavailable(String),
    ForcedOff,
}

type LoadOutcome = Result<Arc<dyn SequenceClassifier>, ModelError>;

/// Owning wrapper around the shared model.
pub struct NeuralAdapter {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<LoadOutcome>,
    max_tokens: usize,
    timeout: Duration,
    forced_off: AtomicBool,
}

impl NeuralAdapter {
    pub fn new(loader: Arc<dyn ModelLoader>, cfg: &NeuralConfig) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            max_tokens: cfg.max_tokens.max(1),
            timeout: Duration::from_millis(cfg.timeout_ms.max(1)),
            forced_off: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &NeuralConfig) -> Self {
        Self::new(build_model_loader(cfg), cfg)
    }

    /// Adapter that never produces a model.
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledLoader), &NeuralConfig::default())
    }

    /// Force the adapter into the unavailable state (or back). Used for degraded-mode
    /// drills and by operators.
    pub fn set_forced_off(&self, off: bool) {
        self.forced_off.store(off, Ordering::SeqCst);
        info!(target: "neural", forced_off = off, "neural adapter override changed");
    }

    pub fn status(&self) -> NeuralStatus {
        if self.forced_off.load(Ordering::SeqCst) {
            return NeuralStatus::ForcedOff;
        }
        match self.model.get() {
            None => NeuralStatus::NotLoaded,
            Some(Ok(_)) => NeuralStatus::Ready,
            Some(Err(e)) => NeuralStatus::Unavailable(e.to_string()),
        }
    }

    /// Single-flight load: the first caller runs the loader, concurrent callers await it.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn SequenceClassifier>, ModelError> {
        if self.forced_off.load(Ordering::SeqCst) {
            return Err(ModelError::Disabled);
        }
        let loader = self.loader.clone();
        let outcome = self
            .model
            .get_or_init(|| async move {
                let started = Instant::now();
                let res = loader.load().await;
                match &res {
                    Ok(m) => info!(
                        target: "neural",
                        loader = loader.name(),
                        model = m.name(),
                        ms = started.elapsed().as_millis() as u64,
                        "neural model ready"
                    ),
                    Err(ModelError::Disabled) => {
                        info!(target: "neural", "neural model disabled, rule-only scoring")
                    }
                    Err(e) => warn!(
                        target: "neural",
                        loader = loader.name(),
                        error = %e,
                        "neural model unavailable, rule-only scoring"
                    ),
                }
                res
            })
            .await;
        outcome.clone()
    }

    /// Classify `text`, truncated to `max_tokens` whitespace tokens, within the timeout.
    pub async fn infer(&self, text: &str) -> Result<ClassProbs, ModelError> {
        let model = self.ensure_loaded().await?;
        let input = truncate_tokens(text, self.max_tokens);
        if input.is_empty() {
            return Ok(ClassProbs::NEUTRAL_PRIOR);
        }

        let started = Instant::now();
        let res = tokio::time::timeout(self.timeout, model.predict(&input)).await;
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("neural_inference_ms").record(ms);

        match res {
            Ok(Ok(probs)) => Ok(probs.normalized()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ModelError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Keep at most `max_tokens` whitespace-separated tokens.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Factory over the configured backend.
pub fn build_model_loader(cfg: &NeuralConfig) -> Arc<dyn ModelLoader> {
    match cfg.backend {
        NeuralBackend::Http => Arc::new(HttpModelLoader::new(cfg.clone())),
        NeuralBackend::Mock => Arc::new(MockLoader::default()),
        NeuralBackend::Disabled => Arc::new(DisabledLoader),
    }
}

// ------------------------------------------------------------
// Disabled
// ------------------------------------------------------------

pub struct DisabledLoader;

#[async_trait]
impl ModelLoader for DisabledLoader {
    async fn load(&self) -> Result<Arc<dyn SequenceClassifier>, ModelError> {
        Err(ModelError::Disabled)
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

// ------------------------------------------------------------
// Mock (deterministic, for tests and local runs)
// ------------------------------------------------------------

/// Returns the same probabilities for every input.
#[derive(Debug, Clone)]
pub struct MockClassifier {
    pub fixed: ClassProbs,
    pub latency: Option<Duration>,
    pub fail_with: Option<ModelError>,
}

#[async_trait]
impl SequenceClassifier for MockClassifier {
    async fn predict(&self, _text: &str) -> Result<ClassProbs, ModelError> {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(self.fixed),
        }
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Loader for [`MockClassifier`]; counts loads so single-flight can be checked.
#[derive(Debug)]
pub struct MockLoader {
    classifier: MockClassifier,
    load_delay: Option<Duration>,
    load_error: Option<String>,
    loads: AtomicUsize,
}

impl Default for MockLoader {
    fn default() -> Self {
        Self::new(ClassProbs {
            neg: 0.2,
            neu: 0.6,
            pos: 0.2,
        })
    }
}

impl MockLoader {
    pub fn new(fixed: ClassProbs) -> Self {
        Self {
            classifier: MockClassifier {
                fixed,
                latency: None,
                fail_with: None,
            },
            load_delay: None,
            load_error: None,
            loads: AtomicUsize::new(0),
        }
    }

    /// Inference sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.classifier.latency = Some(latency);
        self
    }

    /// Loading sleeps this long before returning.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Loading fails with `LoadFailed(msg)`.
    pub fn failing_load(mut self, msg: &str) -> Self {
        self.load_error = Some(msg.to_string());
        self
    }

    /// Every inference fails with `err`.
    pub fn failing_inference(mut self, err: ModelError) -> Self {
        self.classifier.fail_with = Some(err);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn load(&self) -> Result<Arc<dyn SequenceClassifier>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.load_delay {
            tokio::time::sleep(d).await;
        }
        if let Some(msg) = &self.load_error {
            return Err(ModelError::LoadFailed(msg.clone()));
        }
        Ok(Arc::new(self.classifier.clone()))
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// HTTP (text-classification endpoint serving the PhoBERT checkpoint)
// ------------------------------------------------------------

/// Loads by building the client and running one warm-up classification.
pub struct HttpModelLoader {
    cfg: NeuralConfig,
}

impl HttpModelLoader {
    pub fn new(cfg: NeuralConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl ModelLoader for HttpModelLoader {
    async fn load(&self) -> Result<Arc<dyn SequenceClassifier>, ModelError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("review-sentiment-core/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_millis(self.cfg.connect_timeout_ms.max(1)))
            .timeout(Duration::from_millis(self.cfg.timeout_ms.max(1)))
            .build()
            .map_err(|e| ModelError::LoadFailed(e.to_string()))?;
        let classifier = HttpClassifier {
            http,
            endpoint: self.cfg.endpoint.clone(),
            model: self.cfg.model.clone(),
            timeout_ms: self.cfg.timeout_ms,
        };
        classifier
            .predict("xin chào")
            .await
            .map_err(|e| ModelError::LoadFailed(e.to_string()))?;
        Ok(Arc::new(classifier))
    }
    fn name(&self) -> &'static str {
        "http"
    }
}

pub struct HttpClassifier {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

/// Both `[{..}]` and `[[{..}]]` shapes are produced by common inference servers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Flat(Vec<LabelScore>),
    Nested(Vec<Vec<LabelScore>>),
}

#[async_trait]
impl SequenceClassifier for HttpClassifier {
    async fn predict(&self, text: &str) -> Result<ClassProbs, ModelError> {
        #[derive(Serialize)]
        struct Req<'a> {
            inputs: &'a str,
            model: &'a str,
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&Req {
                inputs: text,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(self.timeout_ms)
                } else {
                    ModelError::Inference(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(ModelError::Inference(format!("status {}", resp.status())));
        }
        let body: ClassifyResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::BadResponse(e.to_string()))?;
        let scores = match body {
            ClassifyResponse::Flat(v) => v,
            ClassifyResponse::Nested(v) => v.into_iter().next().unwrap_or_default(),
        };
        probs_from_labels(&scores)
    }
    fn name(&self) -> &'static str {
        "http"
    }
}

fn probs_from_labels(scores: &[LabelScore]) -> Result<ClassProbs, ModelError> {
    let mut probs = ClassProbs {
        neg: 0.0,
        neu: 0.0,
        pos: 0.0,
    };
    let mut seen = 0;
    for s in scores {
        let label = s.label.to_ascii_lowercase();
        let slot = match label.as_str() {
            "neg" | "negative" | "label_0" => &mut probs.neg,
            "neu" | "neutral" | "label_1" => &mut probs.neu,
            "pos" | "positive" | "label_2" => &mut probs.pos,
            _ => continue,
        };
        *slot = s.score;
        seen += 1;
    }
    if seen == 0 {
        return Err(ModelError::BadResponse("no NEG/NEU/POS labels".to_string()));
    }
    Ok(probs.normalized())
}
