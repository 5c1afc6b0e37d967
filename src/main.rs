//! # answerbot CLI
//!
//! The `answerbot` binary trains the QA model from a Slack export, queries
//! it locally, and runs the Slack events server.
//!
//! ## Usage
//!
//! ```bash
//! answerbot --config ./config/answerbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `answerbot train slack` | Mine pairs from the configured export and train |
//! | `answerbot train answers <file>` | Train on a curated answer list |
//! | `answerbot ask "<question>"...` | Print the nearest answer to each question |
//! | `answerbot ask --file <path>` | Answer every line of a file |
//! | `answerbot ask-image <path>` | OCR an image and print the nearest answer |
//! | `answerbot corpus stats` | Summarize the export and pair yield |
//! | `answerbot corpus pairs` | Print training pairs |
//! | `answerbot serve` | Start the Slack events server |
//!
//! ## Examples
//!
//! ```bash
//! # Train on the workspace export under [corpus].root
//! answerbot train slack
//!
//! # Check what the model would say
//! answerbot ask "how do I reset my vpn password?"
//!
//! # Answer in Slack (needs SLACK_BOT_TOKEN and SLACK_SIGNING_SECRET)
//! answerbot serve
//! ```

use answerbot::{ask, config, logging, progress::ProgressMode, server, stats, train_cmd};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// answerbot: answers questions in Slack with the closest answer it has
/// seen before.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/answerbot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "answerbot",
    about = "Retrieval QA bot for Slack workspaces",
    version,
    long_about = "answerbot mines (context, answer) pairs from a Slack workspace export, \
    embeds them, and answers new questions with the nearest known answer by cosine distance, \
    from the command line or live in Slack."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/answerbot.toml`.
    #[arg(long, global = true, default_value = "./config/answerbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the model and save it to `[model].path`.
    Train {
        #[command(subcommand)]
        source: TrainSource,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer one or more questions with the saved model.
    Ask {
        /// Question texts. Chat markup is stripped as it would be in Slack.
        questions: Vec<String>,

        /// Also read questions from a file, one per non-blank line.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Recognize the text in an image and answer it.
    AskImage {
        /// Path to a PNG, JPEG, GIF, BMP, TIFF or WebP file.
        path: PathBuf,
    },

    /// Inspect the Slack export.
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },

    /// Start the Slack events server on `[server].bind`.
    ///
    /// Reads `SLACK_BOT_TOKEN` and `SLACK_SIGNING_SECRET` from the
    /// environment or a `.env` file.
    Serve,
}

#[derive(Subcommand)]
enum TrainSource {
    /// Pairs mined from the export under `[corpus].root`.
    Slack,
    /// A plain-text file with one answer per line.
    Answers {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum CorpusAction {
    /// Counts, date range and per-channel pair yield.
    Stats,
    /// Print the training pairs `train slack` would use.
    Pairs {
        /// Show at most this many pairs.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Train { source, progress } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            match source {
                TrainSource::Slack => train_cmd::run_train_slack(&cfg, progress).await?,
                TrainSource::Answers { file } => {
                    train_cmd::run_train_answers(&cfg, &file, progress).await?
                }
            }
        }
        Commands::Ask { questions, file } => {
            ask::run_ask(&cfg, questions, file.as_deref()).await?;
        }
        Commands::AskImage { path } => {
            ask::run_ask_image(&cfg, &path).await?;
        }
        Commands::Corpus { action } => match action {
            CorpusAction::Stats => stats::run_corpus_stats(&cfg)?,
            CorpusAction::Pairs { limit } => stats::run_corpus_pairs(&cfg, limit)?,
        },
        Commands::Serve => {
            logging::init();
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
