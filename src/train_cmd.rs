//! `answerbot train`: build training pairs, embed them, save the model.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::corpus::{read_answers_file, ContextAnswerPair};
use crate::embedding::create_encoder;
use crate::model::QaModel;
use crate::progress::ProgressMode;
use crate::stats::open_archive;

/// Train on (context, answer) pairs mined from the configured Slack export.
pub async fn run_train_slack(config: &Config, progress: ProgressMode) -> Result<()> {
    let archive = open_archive(config)?;
    let summary = archive.summary();
    let pairs = archive.build_training_pairs(&config.corpus);
    println!(
        "Loaded {} messages from {} channels: {} training pairs",
        summary.messages,
        summary.channels,
        pairs.len()
    );
    train_and_save(config, &pairs, progress).await
}

/// Train on a curated answer list, one answer per line, each paired with itself.
pub async fn run_train_answers(config: &Config, file: &Path, progress: ProgressMode) -> Result<()> {
    let pairs = read_answers_file(file)?;
    println!("Loaded {} answers from {}", pairs.len(), file.display());
    train_and_save(config, &pairs, progress).await
}

async fn train_and_save(config: &Config, pairs: &[ContextAnswerPair], progress: ProgressMode) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embeddings are disabled. Set [embedding] provider in the config to train.");
    }
    if pairs.is_empty() {
        bail!("No training pairs found; nothing to train on.");
    }

    let encoder = create_encoder(&config.embedding).await?;
    let mut model = QaModel::new(encoder);
    let reporter = progress.reporter();
    model
        .train_with_progress(
            pairs,
            config.model.text_processing,
            config.embedding.batch_size,
            reporter.as_ref(),
        )
        .await?;
    model.save(&config.model.path)?;

    if let Some(state) = model.state() {
        println!(
            "Saved model to {} ({} answers, {} dims, encoder {})",
            config.model.path.display(),
            state.len(),
            state.dims(),
            state.encoder_model()
        );
    }
    Ok(())
}
