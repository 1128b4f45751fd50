//! Chat command dispatch and bulk operations.
//!
//! Every bulk operation takes one snapshot of the eligible clients, sends
//! one request per client, and counts each outcome independently. A failed
//! client never stops the rest of the batch.

use crate::codec;
use crate::directory::ClientRecord;
use crate::event::CommandInvocation;
use crate::session::Session;
use crate::transport::Connector;
use std::fmt;
use tracing::{info, warn};

/// `reasonid` for kicking a client from the server.
const KICK_FROM_SERVER: u8 = 5;

/// Commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// `!mp`: poke every user.
    MassPoke,
    /// `!mm`: move every user to the invoker's channel.
    MassMove,
    /// `!mk`: kick every user from the server.
    MassKick,
    /// `!test`: log the eligible users.
    Test,
}

impl BotCommand {
    pub const ALL: [Self; 4] = [Self::MassPoke, Self::MassMove, Self::MassKick, Self::Test];

    /// Parse the command token of a chat message.
    ///
    /// Only the first word counts; it is matched case-insensitively and any
    /// arguments after it are ignored.
    #[must_use]
    pub fn parse(message: &str) -> Option<Self> {
        let token = message.split_whitespace().next()?;
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.token().eq_ignore_ascii_case(token))
    }

    /// The chat token for this command.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::MassPoke => "!mp",
            Self::MassMove => "!mm",
            Self::MassKick => "!mk",
            Self::Test => "!test",
        }
    }

    /// One-line help text.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::MassPoke => "Poke every user",
            Self::MassMove => "Move every user to the command's channel",
            Self::MassKick => "Kick every user from the server",
            Self::Test => "List eligible users in the log (debug)",
        }
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Texts used by the bulk operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub poke_message: String,
    pub kick_message: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            poke_message: "Mass poke from the bot!".into(),
            kick_message: "Mass kick from the bot".into(),
        }
    }
}

/// Outcome of one bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkReport {
    pub command: BotCommand,
    /// Clients a request was sent for.
    pub targeted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkReport {
    const fn new(command: BotCommand) -> Self {
        Self {
            command,
            targeted: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

/// Runs chat commands against a session.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    settings: CommandSettings,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    /// Dispatch one chat command.
    ///
    /// Returns `None` when the message is not a known command.
    pub async fn dispatch<C: Connector>(
        &self,
        session: &mut Session<C>,
        invocation: &CommandInvocation,
    ) -> Option<BulkReport> {
        let Some(command) = BotCommand::parse(invocation.message.trim()) else {
            info!("Unrecognized command: {}", invocation.message.trim());
            return None;
        };

        info!(
            invoker = invocation.invoker_name.as_deref().unwrap_or("?"),
            "Running {} for client {}", command, invocation.invoker_id
        );
        let report = self
            .execute(session, command, invocation.channel_id.as_deref())
            .await;
        info!(
            "{} finished: {}/{} succeeded",
            command, report.succeeded, report.targeted
        );
        Some(report)
    }

    /// Run a command against the current set of eligible clients.
    pub async fn execute<C: Connector>(
        &self,
        session: &mut Session<C>,
        command: BotCommand,
        channel_id: Option<&str>,
    ) -> BulkReport {
        let clients = session.list_clients_excluding_self().await;
        let mut report = BulkReport::new(command);

        match command {
            BotCommand::MassPoke => {
                let msg = codec::escape_spaces(&self.settings.poke_message);
                for client in &clients {
                    let request = format!("clientpoke clid={} msg={msg}", client.clid());
                    apply(session, &mut report, client, &request, "poked").await;
                }
            }
            BotCommand::MassMove => {
                let Some(channel_id) = channel_id else {
                    warn!("{} needs a channel to move clients into", command);
                    return report;
                };
                for client in clients.iter().filter(|c| c.channel_id() != Some(channel_id)) {
                    let request = format!("clientmove clid={} cid={channel_id}", client.clid());
                    apply(session, &mut report, client, &request, "moved").await;
                }
            }
            BotCommand::MassKick => {
                let reason = codec::escape_spaces(&self.settings.kick_message);
                for client in &clients {
                    let request = format!(
                        "clientkick clid={} reasonid={KICK_FROM_SERVER} reasonmsg={reason}",
                        client.clid()
                    );
                    apply(session, &mut report, client, &request, "kicked").await;
                }
            }
            BotCommand::Test => {
                info!("{} clients eligible for commands", clients.len());
                for client in &clients {
                    info!(
                        "  - {} (id {}, type {}, channel {})",
                        client.nickname(),
                        client.clid(),
                        client.client_type().unwrap_or("?"),
                        client.channel_id().unwrap_or("?")
                    );
                }
            }
        }

        report
    }
}

/// Send one per-client request and record its outcome.
async fn apply<C: Connector>(
    session: &mut Session<C>,
    report: &mut BulkReport,
    client: &ClientRecord,
    request: &str,
    verb: &str,
) {
    report.targeted += 1;
    match session.request(request).await {
        Ok(reply) if codec::is_success(&reply) => {
            report.succeeded += 1;
            info!("{} {}", client, verb);
        }
        Ok(reply) => {
            report.failed += 1;
            warn!("{} not {}: {}", client, verb, codec::describe_reply(&reply));
        }
        Err(e) => {
            report.failed += 1;
            warn!("{} not {}: {}", client, verb, e);
        }
    }
}
