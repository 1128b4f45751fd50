//! querybot — ServerQuery chat command bot
//!
//! Keeps one authenticated query session open against a voice-chat server,
//! listens for `!`-prefixed chat commands and applies bulk actions (poke,
//! move, kick) to every connected user.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod connection;
pub mod directory;
pub mod dispatch;
pub mod event;
pub mod runner;
pub mod session;
pub mod testing;
pub mod transport;

pub use cli::Cli;
pub use config::{Config, ConfigError};
pub use connection::{Connection, Timeouts};
pub use directory::ClientRecord;
pub use dispatch::{BotCommand, BulkReport, CommandSettings, Dispatcher};
pub use event::{CommandInvocation, TextMessage};
pub use runner::{LoopSettings, RunOutcome, Runner};
pub use session::{Identity, ServerInfo, Session, SessionError, SessionSettings};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport, TransportError};
