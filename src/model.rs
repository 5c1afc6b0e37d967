//! The retrieval QA model.
//!
//! A [`QaModel`] answers a question with the closest answer it has seen.
//! Training embeds every (context, answer) pair with the encoder's
//! response mode and fits a cosine 1-NN index over the result; answering
//! embeds the question with the encoder's question mode and looks up the
//! nearest row.
//!
//! The model has two tiers of state:
//!
//! - [`TrainedState`]: the answers, their embedding matrix, and the text
//!   processing applied before encoding. Cheap, durable, and saved to disk
//!   as a single JSON artifact.
//! - the encoder (and optional OCR backend): expensive process-bound
//!   resources that are never saved. [`QaModel::load`] restores the
//!   trained state and attaches a freshly created encoder.
//!
//! A model created with [`QaModel::new`] is untrained; querying or saving
//! it fails with [`ModelError::Untrained`].

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::corpus::ContextAnswerPair;
use crate::embedding::{blob_to_vec, vec_to_blob, QaEncoder};
use crate::index::NearestNeighbors;
use crate::normalize::{normalize_text, KeepFlags};
use crate::ocr::Ocr;
use crate::progress::{NoProgress, TrainProgressEvent, TrainProgressReporter};

const ARTIFACT_FORMAT: &str = "answerbot-qa-model";
const ARTIFACT_VERSION: u32 = 1;

/// Errors specific to the model's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("QA model is not trained; train it or load a saved model first")]
    Untrained,
    #[error("cannot train on an empty corpus")]
    EmptyCorpus,
    #[error("batch size must be > 0")]
    ZeroBatchSize,
    #[error("encoder returned {got} vectors for a batch of {expected} answers")]
    EmbeddingCount { expected: usize, got: usize },
    #[error("no OCR backend attached to the model")]
    NoOcr,
}

/// Processing applied to text before it is encoded.
///
/// Stored with the trained state so questions are processed exactly like
/// the answers were at training time. The user always gets the original,
/// unprocessed answer back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextProcessing {
    Identity,
    /// Strip Slack markup with [`normalize_text`].
    #[default]
    Normalize,
}

impl TextProcessing {
    pub fn apply(&self, text: &str) -> String {
        match self {
            TextProcessing::Identity => text.to_string(),
            TextProcessing::Normalize => normalize_text(Some(text), KeepFlags::default()),
        }
    }
}

/// An answer and its cosine distance to the question.
///
/// Distance is `0.0` for an identical direction and at most `2.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub distance: f32,
}

/// The durable half of a trained model.
#[derive(Debug, Clone)]
pub struct TrainedState {
    answers: Vec<String>,
    index: NearestNeighbors,
    text_processing: TextProcessing,
    encoder_model: String,
}

#[derive(Serialize, Deserialize)]
struct Artifact {
    format: String,
    version: u32,
    encoder_model: String,
    text_processing: TextProcessing,
    dims: usize,
    answers: Vec<String>,
    /// Base64 of little-endian f32 bytes, one entry per answer.
    embeddings: Vec<String>,
}

impl TrainedState {
    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn text_processing(&self) -> TextProcessing {
        self.text_processing
    }

    /// Name of the encoder model the answers were embedded with.
    pub fn encoder_model(&self) -> &str {
        &self.encoder_model
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let artifact = Artifact {
            format: ARTIFACT_FORMAT.to_string(),
            version: ARTIFACT_VERSION,
            encoder_model: self.encoder_model.clone(),
            text_processing: self.text_processing,
            dims: self.index.dims(),
            answers: self.answers.clone(),
            embeddings: self
                .index
                .rows()
                .iter()
                .map(|row| STANDARD.encode(vec_to_blob(row)))
                .collect(),
        };

        let file = File::create(path)
            .with_context(|| format!("Failed to create model file: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &artifact)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open model file: {}", path.display()))?;
        let artifact: Artifact = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse model file: {}", path.display()))?;

        if artifact.format != ARTIFACT_FORMAT {
            bail!("{} is not an answerbot model", path.display());
        }
        if artifact.version != ARTIFACT_VERSION {
            bail!(
                "Unsupported model version {} in {}",
                artifact.version,
                path.display()
            );
        }
        if artifact.embeddings.len() != artifact.answers.len() {
            bail!(
                "Corrupt model file {}: {} answers but {} embeddings",
                path.display(),
                artifact.answers.len(),
                artifact.embeddings.len()
            );
        }

        let mut rows = Vec::with_capacity(artifact.embeddings.len());
        for (i, encoded) in artifact.embeddings.iter().enumerate() {
            let bytes = STANDARD
                .decode(encoded)
                .with_context(|| format!("Corrupt embedding {} in {}", i, path.display()))?;
            let row = blob_to_vec(&bytes);
            if row.len() != artifact.dims {
                bail!(
                    "Corrupt model file {}: embedding {} has {} dims, expected {}",
                    path.display(),
                    i,
                    row.len(),
                    artifact.dims
                );
            }
            rows.push(row);
        }

        Ok(Self {
            answers: artifact.answers,
            index: NearestNeighbors::fit(rows)?,
            text_processing: artifact.text_processing,
            encoder_model: artifact.encoder_model,
        })
    }
}

/// A retrieval QA model: trained state plus attached resources.
pub struct QaModel {
    state: Option<TrainedState>,
    encoder: Arc<dyn QaEncoder>,
    ocr: Option<Arc<dyn Ocr>>,
}

impl QaModel {
    /// An untrained model using `encoder`.
    pub fn new(encoder: Arc<dyn QaEncoder>) -> Self {
        Self {
            state: None,
            encoder,
            ocr: None,
        }
    }

    /// Attach an encoder to previously trained state.
    pub fn from_state(state: TrainedState, encoder: Arc<dyn QaEncoder>) -> Self {
        if state.encoder_model != encoder.model_name() {
            tracing::warn!(
                trained_with = %state.encoder_model,
                attached = %encoder.model_name(),
                "encoder differs from the one the model was trained with"
            );
        }
        Self {
            state: Some(state),
            encoder,
            ocr: None,
        }
    }

    /// Load a saved model and attach a fresh encoder.
    pub fn load(path: &Path, encoder: Arc<dyn QaEncoder>) -> Result<Self> {
        Ok(Self::from_state(TrainedState::load(path)?, encoder))
    }

    /// Attach an OCR backend for [`get_image_answer`](Self::get_image_answer).
    pub fn with_ocr(mut self, ocr: Arc<dyn Ocr>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&TrainedState> {
        self.state.as_ref()
    }

    pub fn encoder(&self) -> &dyn QaEncoder {
        self.encoder.as_ref()
    }

    fn trained(&self) -> Result<&TrainedState> {
        self.state.as_ref().ok_or_else(|| ModelError::Untrained.into())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.trained()?.save(path)
    }

    pub async fn train(
        &mut self,
        pairs: &[ContextAnswerPair],
        text_processing: TextProcessing,
        batch_size: usize,
    ) -> Result<()> {
        self.train_with_progress(pairs, text_processing, batch_size, &NoProgress)
            .await
    }

    /// Embed every pair and fit the index, replacing any previous training.
    ///
    /// Pairs are processed in batches of `batch_size` to bound memory.
    /// Processing is applied to both sides before encoding; the original
    /// answer strings are what [`get_answer`](Self::get_answer) returns.
    /// On error the previous state, if any, is kept.
    pub async fn train_with_progress(
        &mut self,
        pairs: &[ContextAnswerPair],
        text_processing: TextProcessing,
        batch_size: usize,
        progress: &dyn TrainProgressReporter,
    ) -> Result<()> {
        if pairs.is_empty() {
            return Err(ModelError::EmptyCorpus.into());
        }
        if batch_size == 0 {
            return Err(ModelError::ZeroBatchSize.into());
        }

        let total = pairs.len();
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(total);

        for (batch_no, batch) in pairs.chunks(batch_size).enumerate() {
            let start = batch_no * batch_size;
            progress.report(TrainProgressEvent::Embedding {
                start,
                end: start + batch.len(),
                total,
            });

            let contexts: Vec<String> = batch
                .iter()
                .map(|p| text_processing.apply(&p.context))
                .collect();
            let answers: Vec<String> = batch
                .iter()
                .map(|p| text_processing.apply(&p.answer))
                .collect();

            let embeddings = self
                .encoder
                .encode_responses(&answers, &contexts)
                .await
                .with_context(|| format!("Failed to embed answers {}..{}", start, start + batch.len()))?;
            if embeddings.len() != batch.len() {
                return Err(ModelError::EmbeddingCount {
                    expected: batch.len(),
                    got: embeddings.len(),
                }
                .into());
            }
            rows.extend(embeddings);
        }

        progress.report(TrainProgressEvent::Fitting { rows: rows.len() });
        let index = NearestNeighbors::fit(rows)?;
        let dims = index.dims();

        self.state = Some(TrainedState {
            answers: pairs.iter().map(|p| p.answer.clone()).collect(),
            index,
            text_processing,
            encoder_model: self.encoder.model_name().to_string(),
        });
        progress.report(TrainProgressEvent::Done {
            answers: total,
            dims,
        });
        Ok(())
    }

    /// The nearest known answer to `question`.
    pub async fn get_answer(&self, question: &str) -> Result<Answer> {
        let state = self.trained()?;
        let processed = state.text_processing.apply(question);
        let embedding = self
            .encoder
            .encode_question(&processed)
            .await
            .context("Failed to embed question")?;
        let hit = state.index.nearest(&embedding)?;
        Ok(Answer {
            text: state.answers[hit.index].clone(),
            distance: hit.distance,
        })
    }

    /// Extract text from an image with the attached OCR backend and answer it.
    ///
    /// Empty OCR output is answered like an empty question.
    pub async fn get_image_answer(&self, image: &[u8]) -> Result<Answer> {
        self.trained()?;
        let ocr = self.ocr.as_ref().ok_or(ModelError::NoOcr)?;
        let text = ocr.image_to_text(image).await?;
        self.get_answer(&text).await
    }
}
