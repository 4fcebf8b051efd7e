//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_STORE__EMBEDDING_DIM=384`). Provides helpers to expand `~` and
//! `${VAR}` and to resolve relative paths against a known base directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tracing::debug;

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::SearchMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub corpus_path: String,
    pub embedding_dim: usize,
    pub exact_index_threshold: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            corpus_path: "rag/chunks.parquet".to_string(),
            embedding_dim: 768,
            exact_index_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_similarity: f64,
    pub mode: SearchMode,
    pub nprobe: Option<usize>,
    pub overfetch: Option<usize>,
    pub dedupe: bool,
    pub keep_per_document: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.7,
            mode: SearchMode::Ann,
            nprobe: None,
            overfetch: None,
            dedupe: true,
            keep_per_document: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagSettings {
    pub store: StoreSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
}

impl RagSettings {
    /// Corpus path with `~` and env vars expanded.
    pub fn corpus_path(&self) -> PathBuf {
        expand_path(&self.store.corpus_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.embedding_dim == 0 {
            return Err(Error::Config("store.embedding_dim must be positive".into()));
        }
        if self.chunking.max_tokens == 0 {
            return Err(Error::Config("chunking.max_tokens must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(Error::Config(format!(
                "retrieval.min_similarity must be within [0, 1], got {}",
                self.retrieval.min_similarity
            )));
        }
        if self.retrieval.nprobe == Some(0) {
            return Err(Error::Config("retrieval.nprobe must be positive when set".into()));
        }
        if self.retrieval.keep_per_document == 0 {
            return Err(Error::Config("retrieval.keep_per_document must be positive".into()));
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            return Err(Error::Config(
                "embedding.batch_size and embedding.concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Loads configuration for the environment named by `RUST_ENV` (default `dev`).
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self {
            figment: Self::figment_for(&env_name),
        })
    }

    pub fn figment_for(env_name: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RagSettings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::Config(format!("Failed to get '{key}': {e}")))
    }

    /// Extracts and validates the full settings tree.
    pub fn settings(&self) -> Result<RagSettings> {
        let settings: RagSettings = self
            .figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        debug!(
            corpus = %settings.corpus_path().display(),
            embedding_dim = settings.store.embedding_dim,
            mode = %settings.retrieval.mode,
            "loaded settings"
        );
        Ok(settings)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
