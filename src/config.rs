use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;

use crate::chunker::ChunkParams;
use crate::error::{RagError, Result};

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_MIN_CHUNK_CHARS: usize = 20;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MIN_QUERY_CHARS: usize = 5;
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Raw, all-optional view of the config file and `RAGVAULT_*` environment.
#[derive(Deserialize, Default)]
pub struct RagVaultConfig {
    pub data_dir: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub min_chunk_chars: Option<usize>,
    pub top_k: Option<usize>,
    pub min_query_chars: Option<usize>,
    pub embedder: Option<String>,
    pub ollama_url: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
}

impl RagVaultConfig {
    pub fn try_from(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(RagVaultConfig {
            data_dir: config.get("data_dir").ok(),
            chunk_size: config.get("chunk_size").ok(),
            chunk_overlap: config.get("chunk_overlap").ok(),
            min_chunk_chars: config.get("min_chunk_chars").ok(),
            top_k: config.get("top_k").ok(),
            min_query_chars: config.get("min_query_chars").ok(),
            embedder: config.get("embedder").ok(),
            ollama_url: config.get("ollama_url").ok(),
            embedding_model: config.get("embedding_model").ok(),
            embedding_dimensions: config.get("embedding_dimensions").ok(),
        })
    }
}

/// Which embedding backend the binary wires into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Ollama,
    Hashing,
}

impl EmbedderKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hashing" | "hash" => Ok(Self::Hashing),
            other => Err(RagError::InvalidConfig(format!(
                "unknown embedder '{other}' (expected 'ollama' or 'hashing')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Hashing => "hashing",
        }
    }
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    pub top_k: usize,
    pub min_query_chars: usize,
    pub embedder: EmbedderKind,
    pub ollama_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            min_chunk_chars: DEFAULT_MIN_CHUNK_CHARS,
            top_k: DEFAULT_TOP_K,
            min_query_chars: DEFAULT_MIN_QUERY_CHARS,
            embedder: EmbedderKind::Ollama,
            ollama_url: "http://localhost:11434/api".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

impl RagConfig {
    /// Loads `ragvault_config.*` from the working directory (optional), then
    /// applies `RAGVAULT_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("ragvault_config").required(false))
            .add_source(Environment::with_prefix("RAGVAULT"))
            .build()
            .map_err(|e| RagError::InvalidConfig(e.to_string()))?;

        let raw = RagVaultConfig::try_from(&config)
            .map_err(|e| RagError::InvalidConfig(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RagVaultConfig) -> Result<Self> {
        let defaults = Self::default();

        let embedder = match raw.embedder {
            Some(value) => EmbedderKind::parse(&value)?,
            None => defaults.embedder,
        };

        let resolved = Self {
            data_dir: raw.data_dir.map(PathBuf::from).unwrap_or(defaults.data_dir),
            chunk_size: raw.chunk_size.unwrap_or(defaults.chunk_size),
            chunk_overlap: raw.chunk_overlap.unwrap_or(defaults.chunk_overlap),
            min_chunk_chars: raw.min_chunk_chars.unwrap_or(defaults.min_chunk_chars),
            top_k: raw.top_k.unwrap_or(defaults.top_k),
            min_query_chars: raw.min_query_chars.unwrap_or(defaults.min_query_chars),
            embedder,
            ollama_url: raw.ollama_url.unwrap_or(defaults.ollama_url),
            embedding_model: raw.embedding_model.unwrap_or(defaults.embedding_model),
            embedding_dimensions: raw
                .embedding_dimensions
                .unwrap_or(defaults.embedding_dimensions),
        };
        resolved.validate()?;
        Ok(resolved)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be at least 1".into()));
        }
        if self.embedding_dimensions == 0 {
            return Err(RagError::InvalidConfig(
                "embedding_dimensions must be at least 1".into(),
            ));
        }
        self.chunk_params().map(|_| ())
    }

    pub fn chunk_params(&self) -> Result<ChunkParams> {
        ChunkParams::new(self.chunk_size, self.chunk_overlap, self.min_chunk_chars)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn print_config(&self) {
        println!("data_dir={}", self.data_dir.display());
        println!("chunk_size={}", self.chunk_size);
        println!("chunk_overlap={}", self.chunk_overlap);
        println!("min_chunk_chars={}", self.min_chunk_chars);
        println!("top_k={}", self.top_k);
        println!("min_query_chars={}", self.min_query_chars);
        println!("embedder={}", self.embedder.as_str());
        println!("ollama_url={}", self.ollama_url);
        println!("embedding_model={}", self.embedding_model);
        println!("embedding_dimensions={}", self.embedding_dimensions);
    }
}
