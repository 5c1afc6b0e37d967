//! Training corpus construction from a Slack workspace export.
//!
//! A Slack export is a directory with one subdirectory per channel; each
//! channel directory holds one JSON file per day (`2019-12-02.json`), each
//! an array of messages. Filenames sort chronologically, so concatenating
//! the files in lexicographic order reconstructs the channel history.
//!
//! Replies are stored as `(user, ts)` pointers on the thread root, so the
//! archive also keeps a lookup from `(user, ts)` to message across all
//! channels.
//!
//! Two pairing policies produce [`ContextAnswerPair`]s:
//!
//! - [`SlackArchive::get_thread_reply_pairs`]: (thread root, reply).
//! - [`SlackArchive::get_context_answer_pairs`]: each message paired with
//!   itself and with a bounded window of messages before it. Most chat
//!   answers reply to some recent, unlabelled question, so this gives a
//!   noisy but large weakly supervised corpus.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::message::Message;
use crate::normalize::is_user_text_message;

/// A weakly supervised training example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextAnswerPair {
    pub context: String,
    pub answer: String,
}

impl ContextAnswerPair {
    pub fn new(context: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            answer: answer.into(),
        }
    }

    /// An answer that serves as its own context.
    pub fn self_pair(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self {
            context: answer.clone(),
            answer,
        }
    }
}

/// The full message history of one channel, oldest first.
#[derive(Debug, Clone)]
pub struct ChannelArchive {
    pub name: String,
    pub messages: Vec<Message>,
}

/// A loaded workspace export.
pub struct SlackArchive {
    channels: Vec<ChannelArchive>,
    /// `(user, ts)` → `(channel index, message index)`.
    by_user_ts: HashMap<(String, String), (usize, usize)>,
}

/// Counts shown by `answerbot corpus stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSummary {
    pub channels: usize,
    pub messages: usize,
    pub user_text_messages: usize,
    pub thread_roots: usize,
    pub first_message: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
}

impl SlackArchive {
    /// Load every channel under `root`.
    ///
    /// Channel directories are visited in name order; inside each, files
    /// matching `include_globs` are read in filename order. Files at the
    /// root itself (`users.json`, `channels.json`) are not channels and are
    /// ignored. A file that is not a JSON array of messages is an error.
    pub fn open(root: &Path, include_globs: &[String]) -> Result<Self> {
        if !root.is_dir() {
            bail!("Archive root does not exist: {}", root.display());
        }
        let include_set = build_globset(include_globs)?;

        let mut channels = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let messages = load_channel(entry.path(), &include_set)?;
            channels.push(ChannelArchive { name, messages });
        }

        Ok(Self::from_channels(channels))
    }

    /// Build an archive from already-loaded channels.
    pub fn from_channels(channels: Vec<ChannelArchive>) -> Self {
        let mut by_user_ts = HashMap::new();
        for (c, channel) in channels.iter().enumerate() {
            for (m, message) in channel.messages.iter().enumerate() {
                if let (Some(user), Some(ts)) = (&message.user, &message.ts) {
                    by_user_ts.insert((user.clone(), ts.clone()), (c, m));
                }
            }
        }
        Self {
            channels,
            by_user_ts,
        }
    }

    pub fn channels(&self) -> &[ChannelArchive] {
        &self.channels
    }

    pub fn get_message_by_user_and_timestamp(&self, user: &str, ts: &str) -> Option<&Message> {
        self.by_user_ts
            .get(&(user.to_string(), ts.to_string()))
            .map(|&(c, m)| &self.channels[c].messages[m])
    }

    /// Pair every thread root with each of its text replies.
    pub fn get_thread_reply_pairs(&self) -> Vec<ContextAnswerPair> {
        let mut pairs = Vec::new();
        for channel in &self.channels {
            for message in &channel.messages {
                let Some(replies) = &message.replies else {
                    continue;
                };
                if !is_user_text_message(message) {
                    continue;
                }
                for reply in replies {
                    let Some(reply_message) =
                        self.get_message_by_user_and_timestamp(&reply.user, &reply.ts)
                    else {
                        continue;
                    };
                    if is_user_text_message(reply_message) {
                        pairs.push(ContextAnswerPair::new(
                            message.text.clone().unwrap_or_default(),
                            reply_message.text.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
        }
        pairs
    }

    /// Pair each message with itself and with the messages shortly before it.
    ///
    /// See [`context_answer_pairs`] for the windowing rules.
    pub fn get_context_answer_pairs(
        &self,
        max_time_delta: f64,
        max_occurrence_rate: usize,
        include_self: bool,
    ) -> Vec<ContextAnswerPair> {
        let mut pairs = Vec::new();
        for channel in &self.channels {
            pairs.extend(context_answer_pairs(
                &channel.messages,
                max_time_delta,
                max_occurrence_rate,
                include_self,
            ));
        }
        pairs
    }

    /// Context-answer pairs followed by thread-reply pairs, per `config`.
    pub fn build_training_pairs(&self, config: &CorpusConfig) -> Vec<ContextAnswerPair> {
        let mut pairs = self.get_context_answer_pairs(
            config.max_time_delta,
            config.max_occurrence_rate,
            config.include_self,
        );
        if config.include_thread_replies {
            pairs.extend(self.get_thread_reply_pairs());
        }
        pairs
    }

    pub fn summary(&self) -> ArchiveSummary {
        let mut summary = ArchiveSummary {
            channels: self.channels.len(),
            messages: 0,
            user_text_messages: 0,
            thread_roots: 0,
            first_message: None,
            last_message: None,
        };
        let mut min_ts = f64::INFINITY;
        let mut max_ts = f64::NEG_INFINITY;

        for message in self.channels.iter().flat_map(|c| c.messages.iter()) {
            summary.messages += 1;
            if is_user_text_message(message) {
                summary.user_text_messages += 1;
            }
            if message.replies.as_ref().is_some_and(|r| !r.is_empty()) {
                summary.thread_roots += 1;
            }
            if let Some(ts) = message.ts_seconds() {
                min_ts = min_ts.min(ts);
                max_ts = max_ts.max(ts);
            }
        }

        if min_ts.is_finite() {
            summary.first_message = ts_to_datetime(min_ts);
            summary.last_message = ts_to_datetime(max_ts);
        }
        summary
    }
}

/// Windowed pairing over one channel's messages.
///
/// For every user-text message M, in order:
///
/// 1. if `include_self`, emit `(M, M)`; this counts toward the quota;
/// 2. walk backward through earlier messages, nearest first, emitting
///    `(prev, M)` for every user-text `prev`.
///
/// The walk stops once `max_occurrence_rate` pairs have been emitted for M
/// or once `ts(M) - ts(prev) > max_time_delta`. A gap exactly equal to
/// `max_time_delta` is still inside the window. Non-text messages are
/// passed over without using quota. A message without a numeric timestamp
/// ends the walk, since its distance cannot be bounded.
pub fn context_answer_pairs(
    messages: &[Message],
    max_time_delta: f64,
    max_occurrence_rate: usize,
    include_self: bool,
) -> Vec<ContextAnswerPair> {
    let mut pairs = Vec::new();

    for (i, message) in messages.iter().enumerate() {
        if !is_user_text_message(message) {
            continue;
        }
        let answer = message.text.as_deref().unwrap_or_default();
        let mut added = 0usize;

        if include_self && added < max_occurrence_rate {
            pairs.push(ContextAnswerPair::self_pair(answer));
            added += 1;
        }

        let Some(answer_ts) = message.ts_seconds() else {
            continue;
        };

        for previous in messages[..i].iter().rev() {
            if added >= max_occurrence_rate {
                break;
            }
            let Some(previous_ts) = previous.ts_seconds() else {
                break;
            };
            if answer_ts - previous_ts > max_time_delta {
                break;
            }
            if is_user_text_message(previous) {
                pairs.push(ContextAnswerPair::new(
                    previous.text.as_deref().unwrap_or_default(),
                    answer,
                ));
                added += 1;
            }
        }
    }

    pairs
}

/// Read a plain-text answer list: one answer per non-empty line, self-paired.
pub fn read_answers_file(path: &Path) -> Result<Vec<ContextAnswerPair>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ContextAnswerPair::self_pair)
        .collect())
}

fn load_channel(dir: &Path, include_set: &GlobSet) -> Result<Vec<Message>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if include_set.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }

    let mut messages = Vec::new();
    for path in files {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read archive file: {}", path.display()))?;
        let batch: Vec<Message> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse archive file: {}", path.display()))?;
        messages.extend(batch);
    }
    Ok(messages)
}

fn ts_to_datetime(ts: f64) -> Option<DateTime<Utc>> {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
