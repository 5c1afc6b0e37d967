//! Text normalization for Slack markup.
//!
//! Slack message text carries inline markup that is noise for a sentence
//! encoder: user mentions (`<@U123>`), links (`<https://...>`), emoji codes
//! (`:smile:`) and formatting markers (`*bold*`, `_italic_`, `~strike~`,
//! `` `code` ``). [`normalize_text`] strips them to produce plain text for
//! embedding, and [`message_text`] does the same for whole messages,
//! preferring the structured rich-text blocks when a message has them.
//!
//! The remaining helpers classify messages for the router and the corpus
//! builder: [`is_broadcast`], [`get_mentions`] and [`is_user_text_message`].

use regex::Regex;
use std::sync::LazyLock;

use crate::message::{Element, ElementKind, Message};

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@[^>]*>").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static EMOJI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":[^:]*:").unwrap());
static MENTION_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@([^>]*)>").unwrap());

/// Bold, italic, strikethrough and code delimiters.
const FORMATTING_MARKERS: [char; 4] = ['*', '_', '~', '`'];

const BROADCAST_MARKERS: [&str; 2] = ["<!channel>", "<!here>"];

/// Which kinds of markup survive normalization. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepFlags {
    pub mentions: bool,
    pub emojis: bool,
    pub links: bool,
}

/// Strip Slack markup from raw message text.
///
/// `None` yields an empty string. Mentions, links and emoji codes are
/// removed (unless kept) before the formatting marker characters, so that
/// a `_` or `*` inside a link is removed together with the link rather
/// than breaking the link pattern first.
///
/// ```rust
/// use answerbot::normalize::{normalize_text, KeepFlags};
///
/// let text = "<@U123> hi <http://x> :smile:";
/// assert_eq!(normalize_text(Some(text), KeepFlags::default()), "hi");
/// ```
pub fn normalize_text(text: Option<&str>, keep: KeepFlags) -> String {
    let Some(text) = text else {
        return String::new();
    };

    let mut text = text.to_string();
    if !keep.mentions {
        text = MENTION_RE.replace_all(&text, "").into_owned();
    }
    if !keep.links {
        text = LINK_RE.replace_all(&text, "").into_owned();
    }
    if !keep.emojis {
        text = EMOJI_RE.replace_all(&text, "").into_owned();
    }
    text.retain(|c| !FORMATTING_MARKERS.contains(&c));
    text.trim().to_string()
}

/// Plain text of a message.
///
/// When the message has rich-text blocks they take precedence over the
/// raw `text` field.
pub fn message_text(message: &Message, keep: KeepFlags) -> String {
    match &message.blocks {
        Some(blocks) => {
            let mut out = String::new();
            collect_block_text(blocks, keep, &mut out);
            out.trim().to_string()
        }
        None => normalize_text(message.text.as_deref(), keep),
    }
}

/// Preorder walk: nested groups expand in place, then the element's own text.
fn collect_block_text(elements: &[Element], keep: KeepFlags, out: &mut String) {
    for element in elements {
        if let Some(children) = &element.elements {
            collect_block_text(children, keep, out);
        }
        match element.kind {
            ElementKind::Text => out.push_str(element.text.as_deref().unwrap_or_default()),
            ElementKind::Emoji if keep.emojis => {
                out.push(':');
                out.push_str(element.name.as_deref().unwrap_or_default());
                out.push(':');
            }
            ElementKind::User if keep.mentions => {
                out.push_str("<@");
                out.push_str(element.user_id.as_deref().unwrap_or_default());
                out.push('>');
            }
            ElementKind::Link if keep.links => {
                out.push('<');
                out.push_str(element.url.as_deref().unwrap_or_default());
                out.push('>');
            }
            _ => {}
        }
    }
}

/// Whether the message notifies the whole channel (`@channel` / `@here`).
pub fn is_broadcast(message: &Message) -> bool {
    match &message.blocks {
        Some(blocks) => contains_broadcast(blocks),
        None => message
            .text
            .as_deref()
            .is_some_and(|text| BROADCAST_MARKERS.iter().any(|m| text.contains(m))),
    }
}

/// Scan one level of the block tree for a broadcast element.
///
/// The first element that carries a nested group decides the result for
/// its whole level: its group is scanned and later siblings are not.
/// Slack puts one section per rich-text block in practice, so this only
/// misses broadcasts that follow an earlier nested group.
fn contains_broadcast(elements: &[Element]) -> bool {
    for element in elements {
        if let Some(children) = &element.elements {
            return contains_broadcast(children);
        }
        if element.kind == ElementKind::Broadcast {
            return true;
        }
    }
    false
}

/// User ids mentioned in the message, in order of appearance, duplicates kept.
pub fn get_mentions(message: &Message) -> Vec<String> {
    match &message.blocks {
        Some(blocks) => {
            let mut users = Vec::new();
            collect_mentions(blocks, &mut users);
            users
        }
        None => message
            .text
            .as_deref()
            .map(|text| {
                MENTION_ID_RE
                    .captures_iter(text)
                    .map(|cap| cap[1].to_string())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn collect_mentions(elements: &[Element], users: &mut Vec<String>) {
    for element in elements {
        if let Some(children) = &element.elements {
            collect_mentions(children, users);
        }
        if element.kind == ElementKind::User {
            if let Some(id) = &element.user_id {
                users.push(id.clone());
            }
        }
    }
}

/// A message typed by a person: non-empty text and no subtype.
///
/// Subtyped messages (`channel_join`, `bot_message`, `channel_topic`, ...)
/// are system-generated and never used for training or answering.
pub fn is_user_text_message(message: &Message) -> bool {
    message.text.as_deref().is_some_and(|t| !t.is_empty()) && message.subtype.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_msg(text: &str) -> Message {
        Message {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn el(kind: ElementKind) -> Element {
        Element::new(kind)
    }

    fn text_el(text: &str) -> Element {
        Element {
            text: Some(text.to_string()),
            ..el(ElementKind::Text)
        }
    }

    fn group(kind: ElementKind, children: Vec<Element>) -> Element {
        Element {
            elements: Some(children),
            ..el(kind)
        }
    }

    #[test]
    fn none_is_empty() {
        assert_eq!(normalize_text(None, KeepFlags::default()), "");
    }

    #[test]
    fn strips_all_markup() {
        let out = normalize_text(
            Some("<@U123> hi <http://x> :smile:"),
            KeepFlags::default(),
        );
        assert_eq!(out, "hi");
    }

    #[test]
    fn keep_flags_preserve_tokens() {
        let all = KeepFlags {
            mentions: true,
            emojis: true,
            links: true,
        };
        let out = normalize_text(Some("<@U1> look :eyes: <http://a.b>"), all);
        assert_eq!(out, "<@U1> look :eyes: <http://a.b>");

        let emojis = KeepFlags {
            emojis: true,
            ..Default::default()
        };
        assert_eq!(normalize_text(Some("<@U1> look :eyes:"), emojis), "look :eyes:");
    }

    #[test]
    fn link_pattern_also_matches_mentions() {
        let mentions = KeepFlags {
            mentions: true,
            ..Default::default()
        };
        assert_eq!(normalize_text(Some("<@U1> look"), mentions), "look");
    }

    #[test]
    fn markers_removed_literally() {
        let out = normalize_text(Some("*bold* _it_ ~s~ `c` snake_case"), KeepFlags::default());
        assert_eq!(out, "bold it s c snakecase");
    }

    #[test]
    fn link_with_underscore_removed_whole() {
        let out = normalize_text(Some("see <http://x.org/a_b|docs> now"), KeepFlags::default());
        assert_eq!(out, "see  now");
    }

    #[test]
    fn idempotent_on_plain_text() {
        let once = normalize_text(Some("Where is the coffee machine?"), KeepFlags::default());
        let twice = normalize_text(Some(&once), KeepFlags::default());
        assert_eq!(once, twice);
        assert_eq!(once, "Where is the coffee machine?");
    }

    #[test]
    fn blocks_take_precedence() {
        let msg = Message {
            text: Some("raw text that should be ignored".into()),
            blocks: Some(vec![group(
                ElementKind::Other,
                vec![group(
                    ElementKind::Other,
                    vec![
                        Element {
                            user_id: Some("U9".into()),
                            ..el(ElementKind::User)
                        },
                        text_el(" hello "),
                        Element {
                            name: Some("wave".into()),
                            ..el(ElementKind::Emoji)
                        },
                        Element {
                            url: Some("http://x".into()),
                            ..el(ElementKind::Link)
                        },
                    ],
                )],
            )]),
            ..Default::default()
        };
        assert_eq!(message_text(&msg, KeepFlags::default()), "hello");
        let all = KeepFlags {
            mentions: true,
            emojis: true,
            links: true,
        };
        assert_eq!(message_text(&msg, all), "<@U9> hello :wave:<http://x>");
    }

    #[test]
    fn broadcast_in_raw_text() {
        assert!(is_broadcast(&text_msg("<!channel> lunch is here")));
        assert!(is_broadcast(&text_msg("hey <!here>")));
        assert!(!is_broadcast(&text_msg("hey everyone")));
        assert!(!is_broadcast(&Message::default()));
    }

    #[test]
    fn broadcast_in_blocks() {
        let msg = Message {
            blocks: Some(vec![group(
                ElementKind::Other,
                vec![group(
                    ElementKind::Other,
                    vec![text_el("hi "), el(ElementKind::Broadcast)],
                )],
            )]),
            ..Default::default()
        };
        assert!(is_broadcast(&msg));
    }

    #[test]
    fn broadcast_scan_stops_at_first_nested_group() {
        // The second section is never visited.
        let msg = Message {
            blocks: Some(vec![group(
                ElementKind::Other,
                vec![
                    group(ElementKind::Other, vec![text_el("first")]),
                    group(ElementKind::Other, vec![el(ElementKind::Broadcast)]),
                ],
            )]),
            ..Default::default()
        };
        assert!(!is_broadcast(&msg));
    }

    #[test]
    fn mentions_from_raw_text() {
        assert_eq!(get_mentions(&text_msg("<@U1> and <@U2>")), vec!["U1", "U2"]);
        assert_eq!(get_mentions(&text_msg("<@U1> <@U1>")), vec!["U1", "U1"]);
        assert!(get_mentions(&text_msg("nobody here")).is_empty());
        assert!(get_mentions(&Message::default()).is_empty());
    }

    #[test]
    fn mentions_from_blocks() {
        let user = |id: &str| Element {
            user_id: Some(id.into()),
            ..el(ElementKind::User)
        };
        let msg = Message {
            blocks: Some(vec![
                group(ElementKind::Other, vec![user("U1"), text_el(" and ")]),
                group(ElementKind::Other, vec![user("U2")]),
            ]),
            ..Default::default()
        };
        assert_eq!(get_mentions(&msg), vec!["U1", "U2"]);
    }

    #[test]
    fn user_text_message_rules() {
        assert!(is_user_text_message(&text_msg("hello")));
        assert!(!is_user_text_message(&text_msg("")));
        assert!(!is_user_text_message(&Message::default()));
        let joined = Message {
            subtype: Some("channel_join".into()),
            ..text_msg("<@U1> has joined the channel")
        };
        assert!(!is_user_text_message(&joined));
    }
}
