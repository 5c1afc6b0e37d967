//! `answerbot ask` and `answerbot ask-image`: query a saved model locally.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_encoder;
use crate::model::{Answer, QaModel};
use crate::ocr::{ImageFormat, TesseractOcr};

/// Load the saved model with the configured encoder and OCR backend attached.
pub async fn load_model(config: &Config) -> Result<QaModel> {
    let encoder = create_encoder(&config.embedding).await?;
    let model = QaModel::load(&config.model.path, encoder)
        .with_context(|| format!("Failed to load model from {} (run `answerbot train` first)", config.model.path.display()))?;
    Ok(model.with_ocr(Arc::new(TesseractOcr::new(&config.ocr))))
}

/// Answer every question against one loaded model.
///
/// Questions from `file` follow those given on the command line. With more
/// than one question, each answer is preceded by its question.
pub async fn run_ask(config: &Config, mut questions: Vec<String>, file: Option<&Path>) -> Result<()> {
    if let Some(path) = file {
        questions.extend(read_questions(path)?);
    }
    if questions.is_empty() {
        bail!("No questions given. Pass them as arguments or with --file.");
    }

    let model = load_model(config).await?;
    let labelled = questions.len() > 1;
    for (i, question) in questions.iter().enumerate() {
        let answer = model
            .get_answer(question)
            .await
            .with_context(|| format!("Failed to answer question {}", i + 1))?;
        if labelled {
            if i > 0 {
                println!();
            }
            println!("> {}", question);
        }
        print_answer(&answer);
    }
    Ok(())
}

/// Non-blank lines of a question file, trimmed.
pub fn read_questions(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub async fn run_ask_image(config: &Config, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    let Some(format) = ImageFormat::sniff(&bytes) else {
        bail!("{} is not a supported image (png, jpeg, gif, bmp, tiff, webp)", path.display());
    };
    let model = load_model(config).await?;
    eprintln!("Recognizing {:?} image ({} bytes)", format, bytes.len());
    let answer = model.get_image_answer(&bytes).await?;
    print_answer(&answer);
    Ok(())
}

fn print_answer(answer: &Answer) {
    if answer.text.is_empty() {
        println!("(empty answer)");
    } else {
        println!("{}", answer.text);
    }
    println!();
    println!("distance: {:.4}", answer.distance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn question_file_skips_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("questions.txt");
        std::fs::write(&path, "where is the printer?\n\n  how do I reset the vpn?  \r\n\n").unwrap();
        assert_eq!(
            read_questions(&path).unwrap(),
            vec!["where is the printer?", "how do I reset the vpn?"]
        );
    }

    #[test]
    fn missing_question_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = read_questions(&tmp.path().join("nope.txt")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read questions file"));
    }
}
