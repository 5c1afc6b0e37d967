//! Question/answer encoder abstraction and implementations.
//!
//! The QA model needs a dual encoder: one mode embeds candidate answers
//! (together with the context they were said in), the other embeds
//! incoming questions, and both land in the same vector space. The
//! [`QaEncoder`] trait captures those two modes; concrete backends are:
//!
//! - **[`DisabledEncoder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAiEncoder`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaEncoder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEncoder`**: runs a model in-process via fastembed; no network calls after
//!   the first model download.
//!
//! General-purpose embedding models have no separate answer tower, so
//! answers and questions are distinguished by input formatting: an
//! optional prefix per mode (`"query: "` / `"passage: "` for e5 models)
//! and the answer's context appended after the answer text.
//!
//! Also provides the vector helpers the index and the model artifact use:
//! [`cosine_similarity`], [`vec_to_blob`] and [`blob_to_vec`].
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama encoders use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A dual encoder for question answering.
///
/// Implementations are expensive, process-bound resources (HTTP clients,
/// loaded ONNX sessions). They are never serialized with a trained model;
/// a fresh one is attached after loading.
#[async_trait]
pub trait QaEncoder: Send + Sync {
    /// Returns the model identifier (e.g. `"multilingual-e5-small"`).
    fn model_name(&self) -> &str;

    /// Embed answers, each conditioned on its context.
    ///
    /// `answers` and `contexts` are parallel; one vector is returned per answer.
    async fn encode_responses(
        &self,
        answers: &[String],
        contexts: &[String],
    ) -> Result<Vec<Vec<f32>>>;

    /// Embed a single question.
    async fn encode_question(&self, question: &str) -> Result<Vec<f32>>;
}

/// Input formatting shared by the text-embedding backends.
#[derive(Debug, Clone, Default)]
pub struct InputFormat {
    pub query_prefix: String,
    pub passage_prefix: String,
}

impl InputFormat {
    fn from_config(config: &EmbeddingConfig, model_name: &str) -> Self {
        let (query_default, passage_default) = default_prefixes(model_name);
        Self {
            query_prefix: config
                .query_prefix
                .clone()
                .unwrap_or_else(|| query_default.to_string()),
            passage_prefix: config
                .passage_prefix
                .clone()
                .unwrap_or_else(|| passage_default.to_string()),
        }
    }

    pub fn question_input(&self, question: &str) -> String {
        format!("{}{}", self.query_prefix, question)
    }

    /// The answer text, followed by its context when the context adds anything.
    pub fn response_input(&self, answer: &str, context: &str) -> String {
        if context.is_empty() || context == answer {
            format!("{}{}", self.passage_prefix, answer)
        } else {
            format!("{}{}\n\n{}", self.passage_prefix, answer, context)
        }
    }

    fn response_inputs(&self, answers: &[String], contexts: &[String]) -> Result<Vec<String>> {
        if answers.len() != contexts.len() {
            bail!(
                "answers and contexts differ in length ({} vs {})",
                answers.len(),
                contexts.len()
            );
        }
        Ok(answers
            .iter()
            .zip(contexts)
            .map(|(a, c)| self.response_input(a, c))
            .collect())
    }
}

/// Asymmetric models expect mode prefixes.
fn default_prefixes(model_name: &str) -> (&'static str, &'static str) {
    if model_name.contains("e5") {
        ("query: ", "passage: ")
    } else if model_name.starts_with("nomic-embed-text") {
        ("search_query: ", "search_document: ")
    } else {
        ("", "")
    }
}

// ============ Disabled Encoder ============

/// An encoder that always fails.
///
/// Used when `embedding.provider = "disabled"`. Loading a model with it
/// works, but training or answering fails with a descriptive message.
pub struct DisabledEncoder;

#[async_trait]
impl QaEncoder for DisabledEncoder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn encode_responses(&self, _: &[String], _: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }

    async fn encode_question(&self, _: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }
}

// ============ HTTP Encoders ============

/// Encoder backed by the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEncoder {
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    format: InputFormat,
}

impl OpenAiEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let format = InputFormat::from_config(config, &model);
        Ok(Self {
            model,
            api_key,
            client,
            max_retries: config.max_retries,
            format,
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            "https://api.openai.com/v1/embeddings",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json, texts.len())
    }
}

#[async_trait]
impl QaEncoder for OpenAiEncoder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn encode_responses(
        &self,
        answers: &[String],
        contexts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        self.embed(self.format.response_inputs(answers, contexts)?)
            .await
    }

    async fn encode_question(&self, question: &str) -> Result<Vec<f32>> {
        first_vector(self.embed(vec![self.format.question_input(question)]).await?)
    }
}

/// Encoder backed by a local Ollama instance (`POST /api/embed`).
pub struct OllamaEncoder {
    model: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
    format: InputFormat,
}

impl OllamaEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let format = InputFormat::from_config(config, &model);
        Ok(Self {
            model,
            url,
            client,
            max_retries: config.max_retries,
            format,
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl QaEncoder for OllamaEncoder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn encode_responses(
        &self,
        answers: &[String],
        contexts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        self.embed(self.format.response_inputs(answers, contexts)?)
            .await
    }

    async fn encode_question(&self, question: &str) -> Result<Vec<f32>> {
        first_vector(self.embed(vec![self.format.question_input(question)]).await?)
    }
}

/// POST a JSON body, retrying rate limits, server errors and network errors.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    provider: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        provider,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", provider, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "{} connection error ({}): {}",
                    provider,
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", provider)))
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vec(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);

    if indexed.len() != expected {
        bail!(
            "Invalid OpenAI response: expected {} embeddings, got {}",
            expected,
            indexed.len()
        );
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn first_vector(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Local Encoder (fastembed) ============

/// In-process encoder using fastembed (bundled ONNX Runtime).
///
/// The model is downloaded from Hugging Face on first use and cached.
/// The session is created once and shared; inference runs on the blocking
/// thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEncoder {
    model_name: String,
    batch_size: usize,
    format: InputFormat,
    session: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEncoder {
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        let session = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        let format = InputFormat::from_config(config, &model_name);
        Ok(Self {
            model_name,
            batch_size: config.batch_size,
            format,
            session: Arc::new(std::sync::Mutex::new(session)),
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let session = Arc::clone(&self.session);
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = session
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding session poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl QaEncoder for LocalEncoder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn encode_responses(
        &self,
        answers: &[String],
        contexts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        self.embed(self.format.response_inputs(answers, contexts)?)
            .await
    }

    async fn encode_question(&self, question: &str) -> Result<Vec<f32>> {
        first_vector(self.embed(vec![self.format.question_input(question)]).await?)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Create the [`QaEncoder`] named by the configuration.
///
/// | Config Value | Encoder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEncoder`] |
/// | `"openai"` | [`OpenAiEncoder`] |
/// | `"ollama"` | [`OllamaEncoder`] |
/// | `"local"` | `LocalEncoder` (feature `local-embeddings-fastembed`) |
pub async fn create_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn QaEncoder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEncoder)),
        "openai" => Ok(Arc::new(OpenAiEncoder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEncoder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEncoder::new(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use answerbot::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_and_mismatched() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn response_input_appends_distinct_context() {
        let format = InputFormat {
            query_prefix: "query: ".into(),
            passage_prefix: "passage: ".into(),
        };
        assert_eq!(format.response_input("yes", "yes"), "passage: yes");
        assert_eq!(format.response_input("yes", ""), "passage: yes");
        assert_eq!(
            format.response_input("at noon", "when is lunch?"),
            "passage: at noon\n\nwhen is lunch?"
        );
        assert_eq!(format.question_input("when?"), "query: when?");
    }

    #[test]
    fn prefixes_follow_model_family() {
        assert_eq!(default_prefixes("multilingual-e5-small"), ("query: ", "passage: "));
        assert_eq!(
            default_prefixes("nomic-embed-text-v1.5"),
            ("search_query: ", "search_document: ")
        );
        assert_eq!(default_prefixes("text-embedding-3-small"), ("", ""));
    }

    #[test]
    fn config_prefix_overrides_default() {
        let config = EmbeddingConfig {
            query_prefix: Some("Q: ".into()),
            ..Default::default()
        };
        let format = InputFormat::from_config(&config, "multilingual-e5-base");
        assert_eq!(format.query_prefix, "Q: ");
        assert_eq!(format.passage_prefix, "passage: ");
    }

    #[test]
    fn mismatched_response_inputs_rejected() {
        let format = InputFormat::default();
        assert!(format
            .response_inputs(&["a".into()], &[])
            .is_err());
    }

    #[test]
    fn openai_response_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&json, 3).is_err());
    }

    #[test]
    fn ollama_response_parsed() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5], [1.0, 0.0]]});
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn disabled_encoder_errors() {
        let encoder = DisabledEncoder;
        assert!(encoder.encode_question("hi").await.is_err());
        assert!(encoder.encode_responses(&[], &[]).await.is_err());
    }
}
