//! Event routing.
//!
//! Classifies pushed lines and turns chat messages that look like bot
//! commands into [`CommandInvocation`]s. Only `notifytextmessage` is
//! consumed; other notifications are logged and dropped.

use crate::codec::{self, EVENT_MARKER};
use tracing::debug;

/// Event name of a chat message push.
pub const TEXT_MESSAGE_EVENT: &str = "notifytextmessage";

/// Prefix that marks a chat message as a bot command.
pub const COMMAND_PREFIX: char = '!';

/// Where a chat message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Private message to a client.
    Private,
    /// Channel chat.
    Channel,
    /// Server-wide chat.
    Server,
}

impl TargetMode {
    fn from_field(value: &str) -> Option<Self> {
        match value {
            "1" => Some(Self::Private),
            "2" => Some(Self::Channel),
            "3" => Some(Self::Server),
            _ => None,
        }
    }
}

/// A parsed `notifytextmessage` push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextMessage {
    pub invoker_id: Option<String>,
    pub invoker_name: Option<String>,
    /// Message text with spaces decoded.
    pub message: Option<String>,
    pub target_mode: Option<TargetMode>,
    /// Raw `target` field, used as the invoking channel id.
    pub target: Option<String>,
}

impl TextMessage {
    /// Parse the fields of a text message line.
    ///
    /// Missing or malformed fields are left unset.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut event = Self::default();
        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "invokerid" => event.invoker_id = Some(value.to_string()),
                "msg" => event.message = Some(codec::decode_field_value(value)),
                "targetmode" => event.target_mode = TargetMode::from_field(value),
                "target" => event.target = Some(value.to_string()),
                "invokername" => event.invoker_name = Some(codec::decode_field_value(value)),
                _ => {}
            }
        }
        event
    }

    /// Convert into a command invocation if this message is one.
    ///
    /// Requires an invoker and a message starting with `!`, and ignores
    /// messages sent by the bot itself.
    #[must_use]
    pub fn into_invocation(self, bot_client_id: Option<&str>) -> Option<CommandInvocation> {
        let invoker_id = self.invoker_id?;
        let message = self.message?;

        if bot_client_id == Some(invoker_id.as_str()) {
            return None;
        }
        if !message.starts_with(COMMAND_PREFIX) {
            return None;
        }

        Some(CommandInvocation {
            message,
            invoker_id,
            invoker_name: self.invoker_name,
            channel_id: self.target,
        })
    }
}

/// A chat command waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Full message text, arguments included.
    pub message: String,
    pub invoker_id: String,
    pub invoker_name: Option<String>,
    /// Channel the command was issued from, if known.
    pub channel_id: Option<String>,
}

/// Route a received chunk.
///
/// A chunk may hold several lines; every text message line that carries a
/// command produces one invocation, in order.
#[must_use]
pub fn route(chunk: &str, bot_client_id: Option<&str>) -> Vec<CommandInvocation> {
    let mut invocations = Vec::new();

    for line in chunk.split('\n') {
        let line = line.trim_matches('\r').trim();
        if !line.contains(EVENT_MARKER) {
            continue;
        }

        if !line.contains(TEXT_MESSAGE_EVENT) {
            let kind = line.split_whitespace().next().unwrap_or_default();
            debug!("Ignoring event: {}", kind);
            continue;
        }

        let event = TextMessage::parse(line);
        debug!(
            invoker = ?event.invoker_name,
            invoker_id = ?event.invoker_id,
            mode = ?event.target_mode,
            "Text message: {:?}",
            event.message
        );

        if let Some(invocation) = event.into_invocation(bot_client_id) {
            invocations.push(invocation);
        }
    }

    invocations
}
