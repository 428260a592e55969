use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the vector/metadata generations.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    pub uploads_dir: PathBuf,
    #[serde(default = "default_sidecar_globs")]
    pub sidecar_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Text that upstream extraction writes instead of content on failure.
    #[serde(default = "default_extraction_error_markers")]
    pub extraction_error_markers: Vec<String>,
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

fn default_sidecar_globs() -> Vec<String> {
    vec!["*.json".to_string()]
}
fn default_extraction_error_markers() -> Vec<String> {
    vec![
        "Error reading PDF".to_string(),
        "PDF file not found.".to_string(),
        crate::sources::FILE_NOT_FOUND_MARKER.to_string(),
    ]
}
fn default_min_content_chars() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or a proxy in front of a hosted API).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum embedding calls in flight for one document.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-snippet truncation applied when building the prompt.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Snippets stop being added once the context reaches this size.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout_secs(),
            max_chunk_chars: default_max_chunk_chars(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_max_chunk_chars() -> usize {
    3000
}
fn default_max_context_chars() -> usize {
    12000
}

/// What to do when a document with identical id and content is indexed again.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Append a second chunk set.
    #[default]
    Append,
    /// Leave the store untouched and report the document as already indexed.
    Skip,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexingConfig {
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,
}

impl Config {
    /// A config rooted at `dir` with every optional section defaulted.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            index: IndexConfig {
                dir: dir.join("vector_index"),
            },
            documents: DocumentsConfig {
                uploads_dir: dir.join("uploads"),
                sidecar_globs: default_sidecar_globs(),
                exclude_globs: Vec::new(),
                extraction_error_markers: default_extraction_error_markers(),
                min_content_chars: default_min_content_chars(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            indexing: IndexingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        chunk::validate_params(self.chunking.chunk_size, self.chunking.overlap)
            .with_context(|| "Invalid [chunking] section")?;

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }

        if self.embedding.concurrency == 0 {
            anyhow::bail!("embedding.concurrency must be >= 1");
        }

        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when set");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "gemini" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, gemini, openai, or ollama.",
                other
            ),
        }

        if matches!(self.embedding.provider.as_str(), "openai" | "ollama")
            && self.embedding.model.is_none()
        {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }

        match self.generation.provider.as_str() {
            "disabled" | "gemini" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled, gemini, openai, or ollama.",
                other
            ),
        }

        if self.generation.max_chunk_chars == 0 || self.generation.max_context_chars == 0 {
            anyhow::bail!("generation.max_chunk_chars and max_context_chars must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!(
            "[index]\ndir = \"/tmp/idx\"\n\n[documents]\nuploads_dir = \"/tmp/up\"\n\n{}",
            extra
        );
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.generation.max_chunk_chars, 3000);
        assert_eq!(config.indexing.on_duplicate, DuplicatePolicy::Append);
        assert_eq!(config.documents.min_content_chars, 10);
        assert!(config
            .documents
            .extraction_error_markers
            .iter()
            .any(|m| m == "Error reading PDF"));
    }

    #[test]
    fn test_rejects_overlap_ge_chunk_size() {
        let err = parse("[chunking]\nchunk_size = 100\noverlap = 100\n").unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        assert!(parse("[embedding]\nprovider = \"word2vec\"\n").is_err());
        assert!(parse("[generation]\nprovider = \"eliza\"\n").is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        let with_model =
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n";
        assert!(parse(with_model).is_ok());
    }

    #[test]
    fn test_duplicate_policy_parses() {
        let config = parse("[indexing]\non_duplicate = \"skip\"\n").unwrap();
        assert_eq!(config.indexing.on_duplicate, DuplicatePolicy::Skip);
    }

    #[test]
    fn test_minimal_is_valid() {
        let config = Config::minimal(Path::new("/tmp/kb"));
        config.validate().unwrap();
        assert!(config.index.dir.ends_with("vector_index"));
    }
}
