//! Embedding generation.
//!
//! - `Embedder`: anything that turns texts into fixed-dimension vectors
//! - `FastEmbedModel`: fastembed-backed implementation, downloads on first use
//! - `ModelCache`: explicit cache of loaded models keyed by name
//! - `EmbeddingGenerator`: validated, batched access to one cached model

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Default number of texts handed to the model per call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default limit on how long a first model load (download included) may take
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// A text embedding model.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed every text, returning one vector per input in order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastEmbedModel {
    /// Load a model by name, downloading it into `<cache_dir>/models` if needed.
    ///
    /// This blocks for the whole download on first use.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!("Loading embedding model {}", model_name);
        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;
        log::debug!("Model {} produces {}-dim vectors", model_name, dimensions);

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Load on a helper thread and give up after `timeout`.
    ///
    /// A load that times out keeps running in the background; its result is dropped.
    pub fn load_with_timeout(
        model_name: &str,
        cache_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let (tx, rx) = mpsc::channel();
        let name = model_name.to_string();
        std::thread::spawn(move || {
            let _ = tx.send(Self::new(&name, cache_dir));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(EmbeddingError::InitFailed(format!(
                "loading {} did not finish within {}s",
                model_name,
                timeout.as_secs()
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
                format!("loader thread for {} exited", model_name),
            )),
        }
    }

    /// Parse model name string to fastembed enum.
    pub fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for FastEmbedModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// Builds an embedder for a model name.
pub type ModelLoader = Box<dyn Fn(&str) -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync>;

/// Cache of loaded models keyed by (case-insensitive) model name.
///
/// Loading happens while the cache lock is held, so two callers asking for the
/// same model never load it twice.
pub struct ModelCache {
    loader: ModelLoader,
    models: Mutex<HashMap<String, Arc<dyn Embedder>>>,
}

static GLOBAL_CACHE: OnceCell<Arc<ModelCache>> = OnceCell::new();

impl ModelCache {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// A cache that loads fastembed models into `cache_dir`.
    pub fn fastembed(cache_dir: PathBuf, download_timeout: Duration) -> Self {
        Self::new(Box::new(move |name| {
            let model =
                FastEmbedModel::load_with_timeout(name, cache_dir.clone(), download_timeout)?;
            Ok(Arc::new(model) as Arc<dyn Embedder>)
        }))
    }

    /// The process-wide fastembed cache.
    ///
    /// The arguments are only used by the first call; later calls share that cache.
    pub fn global(cache_dir: PathBuf, download_timeout: Duration) -> Arc<ModelCache> {
        GLOBAL_CACHE
            .get_or_init(|| Arc::new(ModelCache::fastembed(cache_dir, download_timeout)))
            .clone()
    }

    /// Return the cached model, loading it on first request.
    pub fn get_or_load(&self, model_name: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let key = model_name.to_lowercase();
        let mut models = self.models.lock().map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to acquire model cache lock: {}", e))
        })?;

        if let Some(model) = models.get(&key) {
            return Ok(model.clone());
        }

        let model = (self.loader)(model_name)?;
        models.insert(key, model.clone());
        Ok(model)
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.models
            .lock()
            .map(|m| m.contains_key(&model_name.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.models.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached model. Generators holding a model keep their copy.
    pub fn clear(&self) {
        if let Ok(mut models) = self.models.lock() {
            models.clear();
        }
    }
}

/// Generates embeddings with one model, loading it lazily through a `ModelCache`.
pub struct EmbeddingGenerator {
    model_name: String,
    batch_size: usize,
    cache: Arc<ModelCache>,
    model: OnceCell<Arc<dyn Embedder>>,
}

impl EmbeddingGenerator {
    pub fn new(model_name: impl Into<String>, cache: Arc<ModelCache>) -> Self {
        Self {
            model_name: model_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            cache,
            model: OnceCell::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Output dimension of the model. Loads the model if needed.
    pub fn dimensions(&self) -> Result<usize, EmbeddingError> {
        Ok(self.model()?.dimensions())
    }

    /// Embed a single text.
    pub fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }

        let mut vectors = self.embed_checked(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    /// Embed many texts, preserving order. Any blank text fails the whole call.
    pub fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "text at index {} must not be empty",
                index
            )));
        }
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_checked(chunk)?);
        }
        Ok(vectors)
    }

    fn model(&self) -> Result<&Arc<dyn Embedder>, EmbeddingError> {
        self.model
            .get_or_try_init(|| self.cache.get_or_load(&self.model_name))
    }

    fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model()?;
        let vectors = model.embed_batch(texts)?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let expected = model.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                got: bad.len(),
            });
        }
        Ok(vectors)
    }
}
