//! # answerbot
//!
//! A retrieval question-answering bot for Slack workspaces.
//!
//! answerbot learns from a workspace export: every message becomes a
//! candidate answer, paired with the messages that preceded it within a
//! time window and with the thread it replied to. Pairs are embedded and
//! indexed; a new question is answered with the single nearest known
//! answer by cosine distance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Slack export │──▶│   Corpus    │──▶│   QA model   │──▶ model.json
//! │  */*.json    │   │   pairs     │   │ embed + 1-NN │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!  Slack event ──▶ Router ──▶ Responder ◀─────┘
//!                                 │
//!                                 ▼
//!                         chat.postMessage
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! answerbot corpus stats            # what's in the export
//! answerbot train slack             # embed and save the model
//! answerbot ask "where is the vpn guide?"
//! answerbot serve                   # answer live in Slack
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`message`] | Slack message and rich-text types |
//! | [`normalize`] | Chat markup stripping and message predicates |
//! | [`corpus`] | Export loading and training-pair mining |
//! | [`embedding`] | Encoder backends (OpenAI, Ollama, local) |
//! | [`index`] | Cosine nearest-neighbour index |
//! | [`model`] | Train, save, load, answer |
//! | [`ocr`] | Image text recognition |
//! | [`router`] | When and where to reply |
//! | [`cache`] | Channel and identity caches |
//! | [`transport`] | Chat platform trait |
//! | [`slack`] | Slack Web API client |
//! | [`bot`] | Message handling end to end |
//! | [`server`] | Slack events HTTP server |

pub mod ask;
pub mod bot;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod index;
pub mod logging;
pub mod message;
pub mod model;
pub mod normalize;
pub mod ocr;
pub mod progress;
pub mod router;
pub mod server;
pub mod slack;
pub mod stats;
pub mod train_cmd;
pub mod transport;
