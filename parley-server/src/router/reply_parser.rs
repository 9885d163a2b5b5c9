use crate::error::RouteError;
use regex::Regex;
use std::sync::LazyLock;

static REPLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)->\s*([^:\n]+?)\s*::\s*(.*)").unwrap());

static ROUTING_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+\s*->\s*\S+\s*::\s*").unwrap());

/// A generation reply addressed to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// Display name or peer id, as written by the generator.
    pub target: String,
    pub message: String,
}

/// Parse `"<agent> -> <target>:: <message>"`, stripping any routing fragments the
/// generator echoed inside the message.
pub fn parse_reply(raw: &str) -> Result<ParsedReply, RouteError> {
    let malformed = || RouteError::MalformedReply {
        raw: raw.to_owned(),
    };

    let captures = REPLY.captures(raw).ok_or_else(malformed)?;
    let target = captures[1].trim().to_owned();
    let message = ROUTING_FRAGMENT.replace_all(&captures[2], "");
    let message = message.split_whitespace().collect::<Vec<_>>().join(" ");

    if target.is_empty() || message.is_empty() {
        return Err(malformed());
    }
    Ok(ParsedReply { target, message })
}
