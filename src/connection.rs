//! A single query connection.
//!
//! The protocol has no request ids and no length framing: a reply ends when
//! the line carrying `error id=` is complete, and event pushes may arrive
//! before or in the middle of a reply. This module is the only place that knows about
//! that heuristic. Event lines seen while waiting for a reply are queued and
//! handed out via [`Connection::take_events`].

use crate::codec;
use crate::transport::{Connector, Transport, TransportError};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Receive size while waiting for a reply.
const REPLY_CHUNK: usize = 1024;

/// Receive size for idle polling.
const POLL_CHUNK: usize = 4096;

/// Timing parameters for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Limit for TCP connect and the welcome banner.
    pub connect: Duration,
    /// Per-receive wait while a request is in flight.
    pub reply: Duration,
    /// Per-receive wait while idle.
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            reply: Duration::from_secs(2),
            poll: Duration::from_millis(100),
        }
    }
}

/// An open connection to the query port.
pub struct Connection<T: Transport> {
    transport: T,
    timeouts: Timeouts,
    events: VecDeque<String>,
    /// Bytes of a character cut off by the last read.
    carry: Vec<u8>,
    broken: bool,
}

impl<T: Transport> Connection<T> {
    /// Connect and read the welcome banner.
    pub async fn open<C>(connector: &mut C, timeouts: Timeouts) -> Result<(Self, String), TransportError>
    where
        C: Connector<Transport = T>,
    {
        let mut transport = connector.connect(timeouts.connect).await?;

        let welcome = match transport.recv(REPLY_CHUNK, timeouts.connect).await {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Ok(None) => String::new(),
            Err(e) => {
                transport.shutdown().await;
                return Err(e);
            }
        };

        let conn = Self {
            transport,
            timeouts,
            events: VecDeque::new(),
            carry: Vec::new(),
            broken: false,
        };
        Ok((conn, welcome))
    }

    /// Send a command and collect its reply.
    ///
    /// Returns the trimmed reply text, which may be empty or lack a status
    /// line if the server went quiet. Callers check it with
    /// [`codec::is_success`].
    pub async fn request(&mut self, command: &str) -> Result<String, TransportError> {
        trace!(command = redact(command), "sending command");

        if let Err(e) = self.transport.send(&codec::encode(command)).await {
            self.broken = true;
            return Err(e);
        }

        let mut buffer = std::mem::take(&mut self.carry);
        loop {
            match self.transport.recv(REPLY_CHUNK, self.timeouts.reply).await {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    if codec::reply_complete(&buffer) {
                        break;
                    }
                }
                Ok(None) => {
                    // An event may have arrived instead of the reply
                    if self.queue_events(&mut buffer) > 0 {
                        continue;
                    }
                    debug!(command = redact(command), "reply timed out without status line");
                    break;
                }
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            }
        }

        self.queue_events(&mut buffer);
        let reply = codec::take_complete_text(&mut buffer);
        self.carry = buffer;
        Ok(reply.trim().to_string())
    }

    /// Poll for pushed data without a request in flight.
    ///
    /// A timeout yields `None`. Errors are logged and swallowed; the
    /// connection is flagged broken so the next liveness check fails fast.
    pub async fn poll(&mut self) -> Option<String> {
        match self.transport.recv(POLL_CHUNK, self.timeouts.poll).await {
            Ok(Some(bytes)) => {
                self.carry.extend_from_slice(&bytes);
                let text = codec::take_complete_text(&mut self.carry);
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Ok(None) => None,
            Err(e) => {
                if !self.broken {
                    warn!("Error while polling for events: {}", e);
                }
                self.broken = true;
                None
            }
        }
    }

    /// Drain event lines received while waiting for replies.
    pub fn take_events(&mut self) -> Vec<String> {
        self.events.drain(..).collect()
    }

    /// Whether a transport error has been seen on this connection.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    /// Log out and close the socket. Errors are ignored.
    pub async fn close(mut self) {
        if !self.broken {
            if let Err(e) = self.request("logout").await {
                debug!("Logout failed: {}", e);
            }
        }
        self.transport.shutdown().await;
    }

    /// Move event lines from `buffer` into the queue, returning how many.
    fn queue_events(&mut self, buffer: &mut Vec<u8>) -> usize {
        let events = codec::take_event_lines(buffer);
        let count = events.len();
        for event in events {
            debug!("Event received during request: {}", event);
            self.events.push_back(event);
        }
        count
    }
}

/// Hide the password of a login command in logs.
fn redact(command: &str) -> &str {
    if command.starts_with("login ") { "login <redacted>" } else { command }
}
