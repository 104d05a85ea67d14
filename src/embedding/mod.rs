//! Embedding providers and the lazily-initialized handle the registry uses.

mod hashing;
mod ollama;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{EmbedderKind, Number, RagConfig};
use crate::error::{RagError, Result};

/// Maps text to fixed-size vectors. The dimension is whatever the provider
/// returns; the index adopts it on first write.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<Number>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("provider returned no vector".into()))
    }

    fn model_name(&self) -> &str;
}

type EmbedderFactory = Box<dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Builds the provider on first use and shares it afterwards. A failed build
/// is not cached, so the next call tries again.
pub struct LazyEmbedder {
    cell: OnceCell<Arc<dyn Embedder>>,
    factory: EmbedderFactory,
}

impl LazyEmbedder {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Wrap an already-built provider.
    pub fn ready(embedder: Arc<dyn Embedder>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(Arc::clone(&embedder));
        Self {
            cell,
            factory: Box::new(move || Ok(Arc::clone(&embedder))),
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        let kind = config.embedder;
        let url = config.ollama_url.clone();
        let model = config.embedding_model.clone();
        let dimensions = config.embedding_dimensions;

        Self::new(move || -> Result<Arc<dyn Embedder>> {
            match kind {
                EmbedderKind::Ollama => Ok(Arc::new(OllamaEmbedder::new(&url, &model)?)),
                EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(dimensions)?)),
            }
        })
    }

    pub fn get(&self) -> Result<&Arc<dyn Embedder>> {
        self.cell.get_or_try_init(|| {
            let embedder = (self.factory)().map_err(|e| {
                error!(error = %e, "failed to initialize embedding provider");
                match e {
                    RagError::EmbedderInit(_) => e,
                    other => RagError::EmbedderInit(other.to_string()),
                }
            })?;
            info!(model = embedder.model_name(), "embedding provider initialized");
            Ok(embedder)
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Constant;

    impl Embedder for Constant {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
            Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    #[test]
    fn test_factory_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lazy = LazyEmbedder::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Constant) as Arc<dyn Embedder>)
        });

        assert!(!lazy.is_initialized());
        lazy.get().unwrap();
        lazy.get().unwrap();
        assert!(lazy.is_initialized());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_init_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lazy = LazyEmbedder::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RagError::Embedding("model not downloaded".into()))
            } else {
                Ok(Arc::new(Constant) as Arc<dyn Embedder>)
            }
        });

        assert!(matches!(lazy.get(), Err(RagError::EmbedderInit(_))));
        assert!(lazy.get().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_embed_one_defaults_to_batch() {
        assert_eq!(Constant.embed_one("fever").unwrap(), vec![1.0, 2.0]);
    }
}
