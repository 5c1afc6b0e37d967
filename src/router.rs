//! When to answer, and where.
//!
//! [`decide`] is a pure function of the incoming message, the channel's
//! metadata, the bot's own user id and the responder configuration. The
//! first matching rule wins:
//!
//! 1. Messages from the bot itself are ignored (no reply loops).
//! 2. A message with exactly one attachment and no text, with image
//!    answers enabled: answered through OCR if the attachment is an image,
//!    ignored otherwise.
//! 3. A user-text message is answered if any enabled trigger fires:
//!    - the channel is in `always_respond_in` and the message is top-level,
//!    - it is a broadcast (`@channel` / `@here`),
//!    - it is a direct message,
//!    - its text contains a question mark,
//!    - it mentions the bot.
//! 4. Everything else is ignored.

use crate::config::ResponderConfig;
use crate::message::Message;
use crate::normalize::{get_mentions, is_broadcast, is_user_text_message, message_text, KeepFlags};
use crate::transport::ChannelInfo;

/// What to do with an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ignore,
    /// Answer the normalized message text.
    AnswerText { question: String },
    /// Download the attached image, OCR it, and answer the extracted text.
    AnswerImage { url: String },
}

pub fn decide(
    message: &Message,
    channel: &ChannelInfo,
    bot_user_id: &str,
    config: &ResponderConfig,
) -> Decision {
    if message.user.as_deref() == Some(bot_user_id) {
        return Decision::Ignore;
    }

    let text = message_text(message, KeepFlags::default());

    if config.respond_to_img && text.is_empty() && message.files().len() == 1 {
        let file = &message.files()[0];
        return match (file.main_type(), &file.url_private) {
            (Some("image"), Some(url)) => Decision::AnswerImage { url: url.clone() },
            _ => Decision::Ignore,
        };
    }

    if !is_user_text_message(message) {
        return Decision::Ignore;
    }

    let always = channel
        .name
        .as_ref()
        .is_some_and(|name| config.always_respond_in.contains(name))
        && !message.is_thread_message();

    let triggered = always
        || (config.respond_to_broadcasts && is_broadcast(message))
        || (config.respond_to_im && channel.is_im)
        || (config.respond_to_questions && text.contains('?'))
        || (config.respond_to_mentions && get_mentions(message).iter().any(|id| id == bot_user_id));

    if triggered {
        Decision::AnswerText { question: text }
    } else {
        Decision::Ignore
    }
}

/// Thread to reply in: none for direct messages, otherwise the message's
/// thread, or a new thread rooted at the message itself.
pub fn reply_thread(message: &Message, channel: &ChannelInfo) -> Option<String> {
    if channel.is_im {
        return None;
    }
    message.thread_ts.clone().or_else(|| message.ts.clone())
}
