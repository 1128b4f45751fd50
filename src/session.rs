//! Session lifecycle: login, identity, event registration, reconnection.

use crate::codec;
use crate::connection::{Connection, Timeouts};
use crate::event::{self, CommandInvocation};
use crate::transport::{Connector, TransportError};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Event groups the bot subscribes to.
const EVENT_REGISTRATIONS: [&str; 3] = ["textserver", "textchannel", "textprivate"];

/// Errors that can occur in a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("authentication failed: {}", codec::describe_reply(.reply))]
    Auth { reply: String },

    #[error("not connected")]
    NotConnected,

    #[error("giving up after {attempts} reconnection attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Credentials, timing and retry policy for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub username: String,
    pub password: String,
    pub timeouts: Timeouts,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

/// Who the bot is on the server, as reported by `whoami`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub server_id: Option<String>,
    pub client_id: Option<String>,
}

/// Basic virtual server details from `serverinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub clients_online: Option<String>,
    pub max_clients: Option<String>,
}

impl ServerInfo {
    fn from_reply(reply: &str) -> Self {
        let fields = codec::parse_keyvalue_blob(reply);
        Self {
            name: fields
                .get("virtualserver_name")
                .map(|v| codec::decode_field_value(v)),
            clients_online: fields.get("virtualserver_clientsonline").cloned(),
            max_clients: fields.get("virtualserver_maxclients").cloned(),
        }
    }
}

/// The single logical session with the query server.
///
/// `connection` is `Some` only after a successful login.
pub struct Session<C: Connector> {
    connector: C,
    settings: SessionSettings,
    connection: Option<Connection<C::Transport>>,
    identity: Identity,
    reconnect_attempts: u32,
    pending: VecDeque<CommandInvocation>,
}

impl<C: Connector> Session<C> {
    /// Create a disconnected session.
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
            connection: None,
            identity: Identity::default(),
            reconnect_attempts: 0,
            pending: VecDeque::new(),
        }
    }

    /// Connect, log in, discover identity and subscribe to chat events.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        info!("Connecting to {}...", self.connector.peer());

        // Never hold two sockets at once
        self.disconnect().await;

        let (mut conn, welcome) = Connection::open(&mut self.connector, self.settings.timeouts).await?;
        debug!("Welcome message: {}", welcome);

        info!("Authenticating as {}", self.settings.username);
        let login = format!("login {} {}", self.settings.username, self.settings.password);
        let reply = match conn.request(&login).await {
            Ok(reply) => reply,
            Err(e) => {
                conn.close().await;
                return Err(e.into());
            }
        };
        if !codec::is_success(&reply) {
            error!("Authentication failed: {}", codec::describe_reply(&reply));
            conn.close().await;
            return Err(SessionError::Auth { reply });
        }
        info!("Authenticated");

        self.identity = match conn.request("whoami").await {
            Ok(reply) if codec::is_success(&reply) => parse_identity(&reply),
            Ok(reply) => {
                warn!("Could not read identity ({}), continuing", codec::describe_reply(&reply));
                Identity::default()
            }
            Err(e) => {
                warn!("Could not read identity ({}), continuing", e);
                Identity::default()
            }
        };
        if let Some(server_id) = &self.identity.server_id {
            info!("Using virtual server {}", server_id);
        }
        if let Some(client_id) = &self.identity.client_id {
            info!("Bot client id is {}", client_id);
        }

        self.connection = Some(conn);
        self.register_events().await;
        self.reconnect_attempts = 0;
        self.route_queued_events();

        info!("Command listener active");
        Ok(())
    }

    /// Subscribe to server, channel and private chat events.
    ///
    /// Individual failures are logged; partial coverage is tolerated.
    pub async fn register_events(&mut self) {
        let mut registered = 0;
        for event in EVENT_REGISTRATIONS {
            match self.request(&format!("servernotifyregister event={event}")).await {
                Ok(reply) if codec::is_success(&reply) => registered += 1,
                Ok(reply) => warn!("Failed to register {} events: {}", event, codec::describe_reply(&reply)),
                Err(e) => warn!("Failed to register {} events: {}", event, e),
            }
        }
        info!("Registered {}/{} event groups", registered, EVENT_REGISTRATIONS.len());
    }

    /// Send a command and return its reply.
    ///
    /// Events that arrive while waiting are routed into the pending
    /// invocation queue, never into the reply.
    pub async fn request(&mut self, command: &str) -> Result<String, SessionError> {
        let conn = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        let result = conn.request(command).await;
        self.route_queued_events();
        Ok(result?)
    }

    /// Liveness probe: a full `whoami` round trip.
    pub async fn is_connected(&mut self) -> bool {
        match &self.connection {
            None => return false,
            Some(conn) if conn.is_broken() => return false,
            Some(_) => {}
        }
        match self.request("whoami").await {
            Ok(reply) => codec::is_success(&reply),
            Err(e) => {
                debug!("Liveness probe failed: {}", e);
                false
            }
        }
    }

    /// Whether the connection has seen a transport error.
    #[must_use]
    pub fn link_lost(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_broken)
    }

    /// Tear down and connect again, within the retry budget.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        let max = self.settings.max_reconnect_attempts;
        if self.reconnect_attempts >= max {
            error!("Maximum reconnection attempts reached ({})", max);
            return Err(SessionError::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            });
        }

        self.reconnect_attempts += 1;
        info!("Reconnection attempt {}/{}", self.reconnect_attempts, max);

        self.disconnect().await;
        tokio::time::sleep(self.settings.reconnect_delay).await;
        self.connect().await
    }

    /// Log out and close the connection. Does nothing when disconnected.
    ///
    /// Invocations not yet dispatched are dropped with the connection.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close().await;
            info!("Disconnected from server");
        }
        if !self.pending.is_empty() {
            debug!("Dropping {} undispatched commands", self.pending.len());
            self.pending.clear();
        }
        self.identity = Identity::default();
    }

    /// Fetch basic server details.
    pub async fn server_info(&mut self) -> Result<ServerInfo, SessionError> {
        let reply = self.request("serverinfo").await?;
        if !codec::is_success(&reply) {
            warn!("serverinfo failed: {}", codec::describe_reply(&reply));
            return Ok(ServerInfo::default());
        }
        Ok(ServerInfo::from_reply(&reply))
    }

    /// Poll the socket once and route anything that arrived.
    ///
    /// Returns whether new invocations were queued.
    pub async fn poll_events(&mut self) -> bool {
        let Some(conn) = self.connection.as_mut() else {
            return false;
        };
        let before = self.pending.len();
        if let Some(chunk) = conn.poll().await {
            if codec::has_event(&chunk) {
                let bot_id = self.identity.client_id.as_deref();
                self.pending.extend(event::route(&chunk, bot_id));
            } else {
                debug!("Ignoring unsolicited data: {}", chunk);
            }
        }
        self.route_queued_events();
        self.pending.len() > before
    }

    /// Take the next command invocation waiting for dispatch.
    pub fn next_invocation(&mut self) -> Option<CommandInvocation> {
        self.pending.pop_front()
    }

    /// Whether a login session is currently established.
    #[must_use]
    pub const fn is_established(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn bot_client_id(&self) -> Option<&str> {
        self.identity.client_id.as_deref()
    }

    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn route_queued_events(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        let bot_id = self.identity.client_id.as_deref();
        for chunk in conn.take_events() {
            self.pending.extend(event::route(&chunk, bot_id));
        }
    }
}

/// Extract server and client id from a `whoami` reply.
fn parse_identity(reply: &str) -> Identity {
    let fields = codec::parse_keyvalue_blob(reply);
    Identity {
        server_id: fields.get("virtualserver_id").cloned(),
        client_id: fields.get("client_id").cloned(),
    }
}
