use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// `http` talks to a remote backend at `url`; `memory` keeps
    /// everything in-process (useful for local trials and tests).
    #[serde(default = "default_backend_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: default_backend_mode(),
            url: String::new(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

fn default_backend_mode() -> String {
    "memory".to_string()
}
fn default_backend_timeout_secs() -> u64 {
    30
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
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
        }
    }
}

fn default_match_threshold() -> f32 {
    0.7
}
fn default_match_count() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_url")]
    pub url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: default_chat_url(),
            model: default_chat_model(),
            referer: default_referer(),
            title: default_title(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_chat_model() -> String {
    "meta-llama/llama-3.2-3b-instruct:free".to_string()
}
fn default_referer() -> String {
    "http://localhost:3000".to_string()
}
fn default_title() -> String {
    "AI Study Notes".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// API credentials resolved from the environment. Their presence or
/// absence is the switch between real and degraded behavior: without
/// `OPENAI_API_KEY` embeddings are synthetic, without `OPENROUTER_API_KEY`
/// the chat stream surfaces a configuration error and note generation
/// falls back to a text summary.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub embedding_api_key: Option<String>,
    pub chat_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            embedding_api_key: read_key("OPENAI_API_KEY"),
            chat_api_key: read_key("OPENROUTER_API_KEY"),
        }
    }
}

/// Treat unset, blank, and never-edited placeholder values all as absent.
fn read_key(var: &str) -> Option<String> {
    let value = std::env::var(var).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with("your_") {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    // An overlap at or above the chunk size would keep the chunker from
    // ever advancing, so it is rejected here before any text arrives.
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.match_count < 1 {
        anyhow::bail!("retrieval.match_count must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.match_threshold) {
        anyhow::bail!("retrieval.match_threshold must be in [0.0, 1.0]");
    }

    match config.backend.mode.as_str() {
        "memory" => {}
        "http" => {
            if config.backend.url.trim().is_empty() {
                anyhow::bail!("backend.url must be set when backend.mode is 'http'");
            }
        }
        other => anyhow::bail!("Unknown backend mode: '{}'. Must be http or memory.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate(&config).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.match_count, 5);
    }

    #[test]
    fn rejects_overlap_at_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_size = 10;
        config.chunking.overlap = 10;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn rejects_http_mode_without_url() {
        let mut config = Config::default();
        config.backend.mode = "http".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 500

            [server]
            bind = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.chat.model, "meta-llama/llama-3.2-3b-instruct:free");
    }
}
