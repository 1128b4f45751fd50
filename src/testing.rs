//! In-memory ServerQuery server for tests.
//!
//! [`FakeServer`] implements [`Connector`] through [`FakeServer::connector`]
//! and answers commands from a script:
//!
//! ```ignore
//! let server = FakeServer::new();
//! server.reply("clientpoke", "error id=512 msg=invalid\\sclientID");
//! server.push_event("notifytextmessage targetmode=3 msg=!mp invokerid=7");
//!
//! let mut session = Session::new(server.connector(), settings);
//! session.connect().await?;
//! assert_eq!(server.sent()[0], "login serveradmin secret");
//! ```
//!
//! Receives never block: an empty inbound queue or an explicit stall
//! behaves like a receive timeout.

use crate::codec::LINE_TERMINATOR;
use crate::transport::{Connector, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const WELCOME: &str = "TS3\n\rWelcome to the TeamSpeak 3 ServerQuery interface, type \"help\" for a list of commands.\n\r";

const UNKNOWN_COMMAND: &str = "error id=256 msg=command\\snot\\sfound";

/// Default whoami reply: server 1, bot client id 1.
pub const DEFAULT_WHOAMI: &str = "virtualserver_status=online virtualserver_id=1 virtualserver_unique_identifier=fakeuid virtualserver_port=9987 client_id=1 client_channel_id=1 client_nickname=serveradmin client_database_id=1 client_login_name=serveradmin client_unique_identifier=serveradmin client_origin_server_id=0\n\rerror id=0 msg=ok";

/// Something the fake server puts on the wire.
#[derive(Debug, Clone)]
enum Inbound {
    Data(Vec<u8>),
    /// One receive times out.
    Stall,
    /// The server closes the connection.
    Hangup,
}

type Script = Vec<Inbound>;

#[derive(Default)]
struct State {
    oneshots: Vec<(String, Script)>,
    defaults: Vec<(String, Script)>,
    inbound: VecDeque<Inbound>,
    sent: Vec<String>,
    generation: u64,
    dropped: bool,
    closed: bool,
    connect_attempts: usize,
    failing_connects: usize,
}

impl State {
    fn script_for(&mut self, command: &str) -> Script {
        if let Some(pos) = self
            .oneshots
            .iter()
            .position(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return self.oneshots.remove(pos).1;
        }

        self.defaults
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map_or_else(|| line(UNKNOWN_COMMAND), |(_, script)| script.clone())
    }
}

fn line(text: &str) -> Script {
    vec![Inbound::Data(format!("{text}{LINE_TERMINATOR}").into_bytes())]
}

/// A scripted query server shared between a test and its transports.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    /// A server that accepts any login, reports bot client id 1 on server 1,
    /// and lists only the query client itself.
    #[must_use]
    pub fn new() -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(State::default())),
        };
        server.always("login", "error id=0 msg=ok");
        server.always("whoami", DEFAULT_WHOAMI);
        server.always("servernotifyregister", "error id=0 msg=ok");
        server.always("logout", "error id=0 msg=ok");
        server.always(
            "serverinfo",
            "virtualserver_name=Fake\\sServer virtualserver_clientsonline=1 virtualserver_maxclients=32\n\rerror id=0 msg=ok",
        );
        server.always(
            "clientlist",
            "clid=1 cid=1 client_database_id=1 client_nickname=serveradmin client_type=1\n\rerror id=0 msg=ok",
        );
        server
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector handing out transports bound to this server.
    #[must_use]
    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }

    /// Reply with `text` to every command starting with `prefix`.
    ///
    /// Later calls take precedence over earlier ones.
    pub fn always(&self, prefix: &str, text: &str) {
        self.state().defaults.push((prefix.to_string(), line(text)));
    }

    /// Reply with `text` to the next command starting with `prefix`.
    pub fn reply(&self, prefix: &str, text: &str) {
        self.state().oneshots.push((prefix.to_string(), line(text)));
    }

    /// Reply to the next matching command with raw chunks, one per receive.
    pub fn reply_chunks(&self, prefix: &str, chunks: &[&str]) {
        let script = chunks
            .iter()
            .map(|c| Inbound::Data(c.as_bytes().to_vec()))
            .collect();
        self.state().oneshots.push((prefix.to_string(), script));
    }

    /// Like [`FakeServer::reply_chunks`], for chunks that are not valid
    /// UTF-8 on their own.
    pub fn reply_bytes(&self, prefix: &str, chunks: &[&[u8]]) {
        let script = chunks.iter().map(|c| Inbound::Data(c.to_vec())).collect();
        self.state().oneshots.push((prefix.to_string(), script));
    }

    /// Push an event, let one receive time out, then send the reply.
    pub fn reply_after_event(&self, prefix: &str, event: &str, text: &str) {
        let mut script = line(event);
        script.push(Inbound::Stall);
        script.extend(line(text));
        self.state().oneshots.push((prefix.to_string(), script));
    }

    /// Close the connection instead of answering the next matching command.
    pub fn hang_up_on(&self, prefix: &str) {
        self.state()
            .oneshots
            .push((prefix.to_string(), vec![Inbound::Hangup]));
    }

    /// Push an unsolicited line to the current connection.
    pub fn push_event(&self, event: &str) {
        self.state().inbound.extend(line(event));
    }

    /// Push raw bytes to the current connection, unterminated.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state().inbound.push_back(Inbound::Data(bytes.to_vec()));
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.state().failing_connects = n;
    }

    /// Number of connect attempts so far, failed ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    /// Commands received so far, without terminators.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Forget the recorded commands.
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Kill the current connection; further I/O on it fails.
    pub fn drop_connection(&self) {
        self.state().dropped = true;
    }

    /// Whether the client shut down the current connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

/// [`Connector`] for a [`FakeServer`].
#[derive(Clone)]
pub struct FakeConnector {
    server: FakeServer,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&mut self, _timeout: Duration) -> Result<FakeTransport, TransportError> {
        let mut state = self.server.state();
        state.connect_attempts += 1;

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Connect {
                addr: self.peer(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }

        state.generation += 1;
        state.dropped = false;
        state.closed = false;
        state.inbound.clear();
        state
            .inbound
            .push_back(Inbound::Data(WELCOME.as_bytes().to_vec()));

        Ok(FakeTransport {
            server: self.server.clone(),
            generation: state.generation,
        })
    }

    fn peer(&self) -> String {
        "fake:10011".to_string()
    }
}

/// [`Transport`] for a [`FakeServer`].
pub struct FakeTransport {
    server: FakeServer,
    generation: u64,
}

impl FakeTransport {
    fn live_state(&self) -> Result<MutexGuard<'_, State>, TransportError> {
        let state = self.server.state();
        if state.generation != self.generation || state.dropped || state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state)
    }
}

impl Transport for FakeTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.live_state()?;
        let text = String::from_utf8_lossy(frame);
        let command = text.strip_suffix(LINE_TERMINATOR).unwrap_or(&text).to_string();

        let script = state.script_for(&command);
        state.sent.push(command);
        state.inbound.extend(script);
        Ok(())
    }

    async fn recv(&mut self, max: usize, _wait: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut state = self.live_state()?;
        match state.inbound.pop_front() {
            Some(Inbound::Data(mut bytes)) => {
                if bytes.len() > max {
                    let rest = bytes.split_off(max);
                    state.inbound.push_front(Inbound::Data(rest));
                }
                Ok(Some(bytes))
            }
            Some(Inbound::Hangup) => {
                state.dropped = true;
                Err(TransportError::Closed)
            }
            Some(Inbound::Stall) | None => Ok(None),
        }
    }

    async fn shutdown(&mut self) {
        let mut state = self.server.state();
        if state.generation == self.generation {
            state.closed = true;
        }
    }
}
