//! Training progress reporting.
//!
//! Embedding a workspace's history takes minutes, so `answerbot train`
//! reports each batch as it goes. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event during training.
#[derive(Clone, Debug, PartialEq)]
pub enum TrainProgressEvent {
    /// Answers `start..end` out of `total` are being embedded.
    Embedding {
        start: usize,
        end: usize,
        total: usize,
    },
    /// All batches embedded; fitting the nearest-neighbour index.
    Fitting { rows: usize },
    /// Training finished.
    Done { answers: usize, dims: usize },
}

/// Receives training progress. Called from [`QaModel::train`](crate::model::QaModel::train).
pub trait TrainProgressReporter: Send + Sync {
    fn report(&self, event: TrainProgressEvent);
}

/// Human-friendly progress on stderr: "train  embedding  [500, 1,000] / 12,345 answers".
pub struct StderrProgress;

impl TrainProgressReporter for StderrProgress {
    fn report(&self, event: TrainProgressEvent) {
        let line = match &event {
            TrainProgressEvent::Embedding { start, end, total } => format!(
                "train  embedding  [{}, {}] / {} answers\n",
                format_number(*start as u64),
                format_number(*end as u64),
                format_number(*total as u64)
            ),
            TrainProgressEvent::Fitting { rows } => format!(
                "train  fitting 1-nn cosine index over {} rows\n",
                format_number(*rows as u64)
            ),
            TrainProgressEvent::Done { answers, dims } => format!(
                "train  done  {} answers, {} dims\n",
                format_number(*answers as u64),
                dims
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl TrainProgressReporter for JsonProgress {
    fn report(&self, event: TrainProgressEvent) {
        let obj = match &event {
            TrainProgressEvent::Embedding { start, end, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "start": start,
                "end": end,
                "total": total
            }),
            TrainProgressEvent::Fitting { rows } => serde_json::json!({
                "event": "progress",
                "phase": "fitting",
                "rows": rows
            }),
            TrainProgressEvent::Done { answers, dims } => serde_json::json!({
                "event": "done",
                "answers": answers,
                "dims": dims
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl TrainProgressReporter for NoProgress {
    fn report(&self, _event: TrainProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn TrainProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
