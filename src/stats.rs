//! Archive and model overview.
//!
//! `answerbot corpus stats` summarizes what a training run would see:
//! message counts, the date range, and how many training pairs each
//! channel contributes under the current `[corpus]` settings. `answerbot
//! corpus pairs` prints the pairs themselves for spot checks.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::Config;
use crate::corpus::{context_answer_pairs, SlackArchive};
use crate::model::TrainedState;
use crate::normalize::is_user_text_message;

struct ChannelStats {
    name: String,
    messages: usize,
    user_text: usize,
    pairs: usize,
}

/// Open the archive configured under `[corpus].root`.
pub fn open_archive(config: &Config) -> Result<SlackArchive> {
    let root = config
        .corpus
        .root
        .as_deref()
        .ok_or_else(|| anyhow!("[corpus].root is not set in the config"))?;
    SlackArchive::open(root, &config.corpus.include_globs)
}

/// Print archive counts, per-channel pair yield, and the saved model's size.
pub fn run_corpus_stats(config: &Config) -> Result<()> {
    let archive = open_archive(config)?;
    let summary = archive.summary();
    let corpus = &config.corpus;

    let mut channel_stats: Vec<ChannelStats> = archive
        .channels()
        .iter()
        .map(|c| ChannelStats {
            name: c.name.clone(),
            messages: c.messages.len(),
            user_text: c.messages.iter().filter(|m| is_user_text_message(m)).count(),
            pairs: context_answer_pairs(
                &c.messages,
                corpus.max_time_delta,
                corpus.max_occurrence_rate,
                corpus.include_self,
            )
            .len(),
        })
        .collect();
    channel_stats.sort_by(|a, b| b.messages.cmp(&a.messages).then(a.name.cmp(&b.name)));

    let thread_pairs = if corpus.include_thread_replies {
        archive.get_thread_reply_pairs().len()
    } else {
        0
    };
    let total_pairs: usize = channel_stats.iter().map(|c| c.pairs).sum::<usize>() + thread_pairs;

    println!("answerbot: Corpus Stats");
    println!("========================");
    println!();
    if let Some(root) = &corpus.root {
        println!("  Archive:       {}", root.display());
    }
    println!("  Channels:      {}", summary.channels);
    println!("  Messages:      {}", summary.messages);
    println!("  User text:     {}", summary.user_text_messages);
    println!("  Thread roots:  {}", summary.thread_roots);
    match (summary.first_message, summary.last_message) {
        (Some(first), Some(last)) => println!(
            "  Range:         {} .. {} (last {})",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d"),
            format_ts_relative(last.timestamp())
        ),
        _ => println!("  Range:         (no timestamps)"),
    }
    println!();
    println!(
        "  Pairs:         {} ({} windowed, {} thread replies)",
        total_pairs,
        total_pairs - thread_pairs,
        thread_pairs
    );
    println!(
        "  Window:        {}s, at most {} per answer, self pairs {}",
        corpus.max_time_delta,
        corpus.max_occurrence_rate,
        if corpus.include_self { "on" } else { "off" }
    );

    if !channel_stats.is_empty() {
        println!();
        println!("  By channel:");
        println!(
            "  {:<24} {:>9} {:>10} {:>8}",
            "CHANNEL", "MESSAGES", "USER TEXT", "PAIRS"
        );
        println!("  {}", "-".repeat(54));
        for c in &channel_stats {
            println!(
                "  {:<24} {:>9} {:>10} {:>8}",
                c.name, c.messages, c.user_text, c.pairs
            );
        }
    }

    println!();
    print_model_stats(&config.model.path);
    println!();
    Ok(())
}

fn print_model_stats(path: &Path) {
    let Ok(meta) = std::fs::metadata(path) else {
        println!("  Model:         {} (not trained yet)", path.display());
        return;
    };
    println!("  Model:         {} ({})", path.display(), format_bytes(meta.len()));
    match TrainedState::load(path) {
        Ok(state) => {
            println!("  Answers:       {}", state.len());
            println!("  Dimensions:    {}", state.dims());
            println!("  Encoder:       {}", state.encoder_model());
            if let Some(modified) = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            {
                println!("  Trained:       {}", format_ts_relative(modified.as_secs() as i64));
            }
        }
        Err(e) => println!("  Unreadable:    {:#}", e),
    }
}

/// Print training pairs, at most `limit` of them.
pub fn run_corpus_pairs(config: &Config, limit: Option<usize>) -> Result<()> {
    let archive = open_archive(config)?;
    let pairs = archive.build_training_pairs(&config.corpus);
    let shown = limit.unwrap_or(pairs.len()).min(pairs.len());

    for (i, pair) in pairs.iter().take(shown).enumerate() {
        println!("#{}", i + 1);
        println!("  context: {}", one_line(&pair.context));
        println!("  answer:  {}", one_line(&pair.answer));
    }
    println!();
    println!("{} of {} pairs shown", shown, pairs.len());
    Ok(())
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
