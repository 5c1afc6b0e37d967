//! The responder: turns an incoming message into at most one reply.
//!
//! [`Responder::handle_message`] resolves the channel metadata and the
//! bot's own identity (both cached after the first lookup), asks the
//! [`router`](crate::router) what to do, runs the text or image path
//! against the [`QaModel`], and posts the answer through the
//! [`ChatTransport`].

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{KeyedCache, OnceCache};
use crate::config::ResponderConfig;
use crate::message::Message;
use crate::model::{Answer, QaModel};
use crate::ocr::ImageFormat;
use crate::router::{decide, reply_thread, Decision};
use crate::transport::{BotIdentity, ChannelInfo, ChatTransport};

/// A reply that was posted.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub text: String,
    pub distance: f32,
}

/// Why an image attachment produced no answer.
#[derive(Debug, thiserror::Error)]
pub enum ImageFailure {
    #[error("image download failed: {0:#}")]
    Fetch(anyhow::Error),
    #[error("attachment is not a readable image")]
    Decode,
    #[error("image recognition failed: {0:#}")]
    Recognize(anyhow::Error),
}

pub struct Responder {
    model: Arc<QaModel>,
    transport: Arc<dyn ChatTransport>,
    config: ResponderConfig,
    channels: KeyedCache<ChannelInfo>,
    identity: OnceCache<BotIdentity>,
}

impl Responder {
    pub fn new(model: Arc<QaModel>, transport: Arc<dyn ChatTransport>, config: ResponderConfig) -> Self {
        Self {
            model,
            transport,
            config,
            channels: KeyedCache::new(),
            identity: OnceCache::new(),
        }
    }

    pub fn model(&self) -> &QaModel {
        &self.model
    }

    /// Decide, answer and post. Returns the reply if one was sent.
    ///
    /// Transport and model errors on the text path are returned; image
    /// path failures are logged at debug level and yield `Ok(None)`.
    pub async fn handle_message(&self, message: &Message) -> Result<Option<Reply>> {
        let Some(channel_id) = message.channel.as_deref() else {
            tracing::debug!("message without channel ignored");
            return Ok(None);
        };

        let channel = self.channel_info(channel_id).await?;
        let bot = self.bot_identity().await?;

        let answer = match decide(message, &channel, &bot.user_id, &self.config) {
            Decision::Ignore => return Ok(None),
            Decision::AnswerText { question } => {
                tracing::info!(channel = channel_id, %question, "answering question");
                self.model.get_answer(&question).await?
            }
            Decision::AnswerImage { url } => match self.answer_image(&url).await {
                Ok(answer) => answer,
                Err(failure) => {
                    tracing::debug!(channel = channel_id, %failure, "image attachment skipped");
                    return Ok(None);
                }
            },
        };

        if answer.text.is_empty() {
            tracing::debug!(channel = channel_id, "nearest answer is empty, not replying");
            return Ok(None);
        }

        let thread_ts = reply_thread(message, &channel);
        self.transport
            .post_reply(channel_id, thread_ts.as_deref(), &answer.text)
            .await
            .with_context(|| format!("Failed to post reply to {}", channel_id))?;
        tracing::info!(
            channel = channel_id,
            thread = thread_ts.as_deref().unwrap_or("-"),
            distance = answer.distance,
            "reply posted"
        );

        Ok(Some(Reply {
            channel: channel_id.to_string(),
            thread_ts,
            text: answer.text,
            distance: answer.distance,
        }))
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.channels
            .get_or_try_populate(channel_id, || async {
                self.transport
                    .channel_info(channel_id)
                    .await
                    .with_context(|| format!("Failed to look up channel {}", channel_id))
            })
            .await
    }

    async fn bot_identity(&self) -> Result<BotIdentity> {
        self.identity
            .get_or_try_populate(|| async {
                self.transport
                    .bot_identity()
                    .await
                    .context("Failed to look up bot identity")
            })
            .await
    }

    /// Fetch, check, recognize, answer.
    async fn answer_image(&self, url: &str) -> Result<Answer, ImageFailure> {
        let timeout = Duration::from_secs(self.config.image_fetch_timeout_secs);
        let bytes = tokio::time::timeout(timeout, self.transport.fetch_file(url))
            .await
            .map_err(|_| ImageFailure::Fetch(anyhow::anyhow!("timed out after {:?}", timeout)))?
            .map_err(ImageFailure::Fetch)?;

        if ImageFormat::sniff(&bytes).is_none() {
            return Err(ImageFailure::Decode);
        }

        self.model
            .get_image_answer(&bytes)
            .await
            .map_err(ImageFailure::Recognize)
    }
}
