use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::TextProcessing;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub text_processing: TextProcessing,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Prepended to questions before encoding (e.g. `"query: "` for e5 models).
    #[serde(default)]
    pub query_prefix: Option<String>,
    /// Prepended to answers before encoding (e.g. `"passage: "` for e5 models).
    #[serde(default)]
    pub passage_prefix: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            batch_size: 100,
            max_retries: 5,
            timeout_secs: 30,
            query_prefix: None,
            passage_prefix: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Root of a Slack workspace export: one directory per channel.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Seconds a preceding message may lie before its answer.
    #[serde(default = "default_max_time_delta")]
    pub max_time_delta: f64,
    /// Pairs emitted per answer message, self-pair included.
    #[serde(default = "default_max_occurrence_rate")]
    pub max_occurrence_rate: usize,
    #[serde(default = "default_true")]
    pub include_self: bool,
    #[serde(default = "default_true")]
    pub include_thread_replies: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            max_time_delta: default_max_time_delta(),
            max_occurrence_rate: default_max_occurrence_rate(),
            include_self: true,
            include_thread_replies: true,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["*.json".to_string()]
}
fn default_max_time_delta() -> f64 {
    600.0
}
fn default_max_occurrence_rate() -> usize {
    1
}
fn default_true() -> bool {
    true
}

/// Which incoming messages the bot answers.
#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    #[serde(default)]
    pub respond_to_questions: bool,
    #[serde(default = "default_true")]
    pub respond_to_mentions: bool,
    #[serde(default = "default_true")]
    pub respond_to_broadcasts: bool,
    #[serde(default = "default_true")]
    pub respond_to_im: bool,
    #[serde(default = "default_true")]
    pub respond_to_img: bool,
    /// Channel names where every top-level message is answered.
    #[serde(default)]
    pub always_respond_in: Vec<String>,
    #[serde(default = "default_image_fetch_timeout_secs")]
    pub image_fetch_timeout_secs: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            respond_to_questions: false,
            respond_to_mentions: true,
            respond_to_broadcasts: true,
            respond_to_im: true,
            respond_to_img: true,
            always_respond_in: Vec::new(),
            image_fetch_timeout_secs: default_image_fetch_timeout_secs(),
        }
    }
}

fn default_image_fetch_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_command")]
    pub command: String,
    /// Tesseract language list, e.g. `"eng+nld"`.
    #[serde(default = "default_ocr_languages")]
    pub languages: String,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: default_ocr_command(),
            languages: default_ocr_languages(),
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_languages() -> String {
    "eng".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    30
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
    "127.0.0.1:3000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate corpus
    if config.corpus.max_time_delta < 0.0 || config.corpus.max_time_delta.is_nan() {
        anyhow::bail!("corpus.max_time_delta must be >= 0");
    }

    if config.ocr.command.trim().is_empty() {
        anyhow::bail!("ocr.command must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[model]\npath = \"model/bot.json\"\n").unwrap();
        assert_eq!(cfg.model.text_processing, TextProcessing::Normalize);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.corpus.max_time_delta, 600.0);
        assert_eq!(cfg.corpus.max_occurrence_rate, 1);
        assert!(cfg.corpus.include_self);
        assert!(!cfg.responder.respond_to_questions);
        assert!(cfg.responder.respond_to_mentions);
        assert!(cfg.responder.always_respond_in.is_empty());
        assert_eq!(cfg.ocr.command, "tesseract");
    }

    #[test]
    fn responder_section() {
        let cfg = parse(
            r#"
[model]
path = "m.json"
text_processing = "identity"

[responder]
respond_to_questions = true
respond_to_img = false
always_respond_in = ["announcements", "help"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.model.text_processing, TextProcessing::Identity);
        assert!(cfg.responder.respond_to_questions);
        assert!(!cfg.responder.respond_to_img);
        assert_eq!(cfg.responder.always_respond_in, vec!["announcements", "help"]);
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[model]\npath = \"m\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn openai_requires_model() {
        let err = parse("[model]\npath = \"m\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(parse("[model]\npath = \"m\"\n[embedding]\nbatch_size = 0\n").is_err());
    }
}
