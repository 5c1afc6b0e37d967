//! Optical character recognition for image attachments.
//!
//! People often post a screenshot of an error instead of typing the
//! question. The [`Ocr`] trait turns image bytes into text; the default
//! backend pipes the image through the `tesseract` command-line tool.
//! [`ImageFormat::sniff`] is the cheap decode check run before OCR.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::OcrConfig;

/// Image bytes in, recognized plain text out (possibly empty).
#[async_trait]
pub trait Ocr: Send + Sync {
    async fn image_to_text(&self, image: &[u8]) -> Result<String>;
}

/// OCR via `tesseract stdin stdout -l <languages>`.
pub struct TesseractOcr {
    command: String,
    languages: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            languages: config.languages.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Ocr for TesseractOcr {
    async fn image_to_text(&self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.languages])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start OCR command '{}'", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("OCR command stdin unavailable"))?;
        let data = image.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&data).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("OCR timed out after {:?}", self.timeout))?
            .context("OCR command failed")?;

        if !output.status.success() {
            bail!(
                "OCR command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        writer.await?.context("Failed to send image to OCR command")?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Raster formats tesseract can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Webp,
}

impl ImageFormat {
    /// Identify the format from its magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'B', b'M', ..] => Some(Self::Bmp),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Self::Tiff),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            _ => None,
        }
    }
}
