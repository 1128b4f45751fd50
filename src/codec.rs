//! Frame codec for the ServerQuery text protocol.
//!
//! Outgoing commands are single lines terminated by `\n\r`. Replies are
//! space-delimited `key=value` fields followed by a status line of the form
//! `error id=<n> msg=<text>`. Event pushes are lines starting with `notify`.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Terminator appended to every outgoing command.
pub const LINE_TERMINATOR: &str = "\n\r";

/// Substring that marks the end of a command reply.
pub const REPLY_SENTINEL: &str = "error id=";

/// Substring present in every reply to a successful command.
pub const SUCCESS_MARKER: &str = "error id=0";

/// Substring present in every asynchronous event push.
pub const EVENT_MARKER: &str = "notify";

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error id=(\d+)(?: msg=(\S*))?").expect("status line regex is valid")
});

/// Encode a command into a wire frame.
///
/// The command text is sent as-is; callers pre-escape spaces in values
/// with [`escape_spaces`].
#[must_use]
pub fn encode(command: &str) -> Vec<u8> {
    let mut frame = String::with_capacity(command.len() + LINE_TERMINATOR.len());
    frame.push_str(command);
    frame.push_str(LINE_TERMINATOR);
    frame.into_bytes()
}

/// Escape spaces in a field value as `\s`.
#[must_use]
pub fn escape_spaces(text: &str) -> String {
    text.replace(' ', "\\s")
}

/// Decode a field value received from the server.
///
/// Only the space escape (`\s`) is decoded. Other escapes such as `\p`
/// or `\/` are passed through unchanged.
#[must_use]
pub fn decode_field_value(raw: &str) -> String {
    raw.replace("\\s", " ")
}

/// Parse a blob of whitespace-separated `key=value` tokens.
///
/// Each token is split on its first `=`. Tokens without `=` are skipped.
/// Values are returned raw (not escape-decoded).
#[must_use]
pub fn parse_keyvalue_blob(text: &str) -> BTreeMap<String, String> {
    text.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// The success predicate applied to every reply.
#[must_use]
pub fn is_success(reply: &str) -> bool {
    reply.contains(SUCCESS_MARKER)
}

/// Whether an accumulated buffer holds a complete reply.
///
/// The reply ends with the line that carries `error id=`, so the sentinel
/// must be followed by a line break. A status line cut right after
/// `error id=` is still incomplete.
#[must_use]
pub fn reply_complete(buffer: &[u8]) -> bool {
    find(buffer, REPLY_SENTINEL.as_bytes())
        .is_some_and(|pos| buffer[pos + REPLY_SENTINEL.len()..].contains(&b'\n'))
}

/// Whether a chunk carries at least one event push.
#[must_use]
pub fn has_event(chunk: &str) -> bool {
    chunk.contains(EVENT_MARKER)
}

/// Remove event lines from a received buffer.
///
/// Returns every line that starts with `notify`, in arrival order. All
/// other bytes stay in `buffer` untouched, terminators and a trailing
/// partial line included.
pub fn take_event_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut kept = Vec::with_capacity(buffer.len());
    let mut events = Vec::new();

    for segment in buffer.split_inclusive(|&b| b == b'\n') {
        let text = String::from_utf8_lossy(segment);
        let line = text.trim();
        if line.starts_with(EVENT_MARKER) {
            events.push(line.to_string());
        } else {
            kept.extend_from_slice(segment);
        }
    }

    *buffer = kept;
    events
}

/// Decode the complete UTF-8 prefix of `buffer`.
///
/// A multi-byte character cut off at the end stays in `buffer` so the
/// next read can finish it. Invalid sequences elsewhere decode lossily.
pub fn take_complete_text(buffer: &mut Vec<u8>) -> String {
    let complete = match std::str::from_utf8(buffer) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => buffer.len(),
    };
    let tail = buffer.split_off(complete);
    let text = String::from_utf8_lossy(buffer).into_owned();
    *buffer = tail;
    text
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Status line of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyStatus {
    /// Numeric error id; `0` means success.
    pub id: u32,
    /// Server message with spaces decoded.
    pub msg: String,
}

impl ReplyStatus {
    /// Parse the last status line found in a reply.
    #[must_use]
    pub fn parse(reply: &str) -> Option<Self> {
        let caps = STATUS_LINE.captures_iter(reply).last()?;
        let id = caps.get(1)?.as_str().parse().ok()?;
        let msg = caps
            .get(2)
            .map(|m| decode_field_value(m.as_str()))
            .unwrap_or_default();
        Some(Self { id, msg })
    }

    /// Whether the status reports success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.id == 0
    }
}

impl std::fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error {}: {}", self.id, self.msg)
    }
}

/// Describe a reply for log output.
#[must_use]
pub fn describe_reply(reply: &str) -> String {
    ReplyStatus::parse(reply).map_or_else(
        || {
            if reply.is_empty() {
                "no reply".to_string()
            } else {
                "no status line".to_string()
            }
        },
        |status| status.to_string(),
    )
}
