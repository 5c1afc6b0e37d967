//! The chat platform as seen by the responder.
//!
//! [`ChatTransport`] is the seam between the answering logic and the
//! platform API; [`SlackWebClient`](crate::slack::SlackWebClient) is the
//! production implementation and tests substitute a recording fake.

use anyhow::Result;
use async_trait::async_trait;

/// Metadata about a channel that the router needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel name; absent for direct messages.
    pub name: Option<String>,
    /// Whether this is a one-to-one direct-message channel.
    pub is_im: bool,
}

/// The bot's own account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo>;

    async fn bot_identity(&self) -> Result<BotIdentity>;

    /// Download a private file with the bot's credentials.
    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>>;

    /// Post `text` to a channel, inside the thread rooted at `thread_ts` if given.
    async fn post_reply(&self, channel_id: &str, thread_ts: Option<&str>, text: &str) -> Result<()>;
}
