//! Slack message records.
//!
//! These types mirror the subset of the Slack message JSON that the
//! assistant reads, both from workspace export archives and from live
//! Events API payloads. Unknown fields are ignored, and every field is
//! optional because system messages (joins, topic changes, bot posts)
//! routinely omit `user` or `text`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single message as exported or delivered by Slack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Channel id. Absent in export archives (the directory names the channel).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Slack timestamp (`"1575300000.000200"`), unique per user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Rich-text block tree. Takes precedence over `text` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Element>>,
    /// Timestamp of the thread root when the message belongs to a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// Pointers to replies; the replies themselves are stored as separate messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<ReplyRef>>,
    /// Marks system-generated messages (`channel_join`, `bot_message`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileInfo>>,
}

impl Message {
    /// Timestamp as seconds since the epoch, if it parses.
    pub fn ts_seconds(&self) -> Option<f64> {
        self.ts.as_deref().and_then(parse_ts)
    }

    pub fn is_thread_message(&self) -> bool {
        self.thread_ts.is_some()
    }

    pub fn files(&self) -> &[FileInfo] {
        self.files.as_deref().unwrap_or(&[])
    }
}

/// Parse a Slack timestamp string into seconds.
pub fn parse_ts(ts: &str) -> Option<f64> {
    ts.trim().parse::<f64>().ok()
}

/// A `(user, ts)` pointer to a reply message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRef {
    pub user: String,
    pub ts: String,
}

/// An attached file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
}

impl FileInfo {
    /// The MIME main-type, e.g. `"image"` for `"image/png"`.
    pub fn main_type(&self) -> Option<&str> {
        self.mimetype
            .as_deref()
            .and_then(|m| m.split('/').next())
            .filter(|m| !m.is_empty())
    }
}

/// Element types the assistant understands inside a rich-text tree.
///
/// Containers (`rich_text`, `rich_text_section`, `rich_text_list`, ...)
/// and anything else deserialize as [`ElementKind::Other`] and only
/// contribute their nested elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Text,
    Emoji,
    User,
    Link,
    Broadcast,
    #[serde(other)]
    Other,
}

/// A node of the rich-text block tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    /// Layout blocks (`section`, `header`) carry a text object here; only
    /// plain strings are kept.
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub text: Option<String>,
    /// Emoji short name, without colons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Nested group. `Some(vec![])` and `None` are distinct for broadcast scanning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<Element>>,
}

fn string_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            text: None,
            name: None,
            user_id: None,
            url: None,
            elements: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_export_record() {
        let json = r#"{
            "type": "message",
            "user": "U1",
            "text": "hello <@U2>",
            "ts": "1575300000.000200",
            "replies": [{"user": "U2", "ts": "1575300010.000100"}],
            "client_msg_id": "ignored"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.user.as_deref(), Some("U1"));
        assert_eq!(msg.replies.as_ref().unwrap().len(), 1);
        assert!((msg.ts_seconds().unwrap() - 1575300000.0002).abs() < 1e-3);
    }

    #[test]
    fn unknown_element_types_become_other() {
        let json = r#"{"type": "rich_text_section", "elements": [{"type": "text", "text": "hi"}]}"#;
        let el: Element = serde_json::from_str(json).unwrap();
        assert_eq!(el.kind, ElementKind::Other);
        assert_eq!(el.elements.unwrap()[0].kind, ElementKind::Text);
    }

    #[test]
    fn layout_block_text_objects_tolerated() {
        let json = r#"{"user": "B1", "ts": "1.0", "blocks": [
            {"type": "section", "text": {"type": "mrkdwn", "text": "*deploy* done"}},
            {"type": "rich_text", "elements": [{"type": "text", "text": "ok"}]}
        ]}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        let blocks = msg.blocks.unwrap();
        assert_eq!(blocks[0].text, None);
        assert_eq!(blocks[1].elements.as_ref().unwrap()[0].text.as_deref(), Some("ok"));
    }

    #[test]
    fn file_main_type() {
        let file = FileInfo {
            mimetype: Some("image/png".into()),
            url_private: None,
        };
        assert_eq!(file.main_type(), Some("image"));
        assert_eq!(FileInfo::default().main_type(), None);
    }
}
