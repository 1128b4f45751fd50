//! The bot's main loop.
//!
//! Polls for chat events, dispatches commands, probes liveness on an
//! interval and reconnects when the link is lost. Everything runs on one
//! task so requests and idle polls never overlap on the socket.

use crate::dispatch::{BotCommand, Dispatcher};
use crate::session::{Session, SessionError};
use crate::transport::Connector;
use std::future::Future;
use std::pin::{Pin, pin};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Timing of the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Interval between liveness probes.
    pub keepalive_interval: Duration,
    /// Interval between heartbeat log lines.
    pub status_interval: Duration,
    /// Pause between iterations.
    pub idle_pause: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            status_interval: Duration::from_secs(300),
            idle_pause: Duration::from_millis(500),
        }
    }
}

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The shutdown signal fired.
    Interrupted,
    /// The connection was lost and could not be restored.
    ReconnectExhausted,
}

/// Drives a session for the lifetime of the process.
pub struct Runner<C: Connector> {
    session: Session<C>,
    dispatcher: Dispatcher,
    settings: LoopSettings,
}

impl<C: Connector> Runner<C> {
    #[must_use]
    pub const fn new(session: Session<C>, dispatcher: Dispatcher, settings: LoopSettings) -> Self {
        Self {
            session,
            dispatcher,
            settings,
        }
    }

    /// Connect, then serve until `shutdown` resolves or reconnection fails.
    ///
    /// Errors from the initial connection are returned. The session is
    /// always disconnected before this returns.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<RunOutcome, SessionError> {
        let mut shutdown = pin!(shutdown);
        info!("Starting query bot...");

        let started = tokio::select! {
            connected = self.session.connect() => Some(connected),
            () = &mut shutdown => None,
        };
        match started {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("Could not establish initial connection: {}", e);
                return Err(e);
            }
            None => return Ok(self.stop_early().await),
        }

        let interrupted = tokio::select! {
            () = self.print_overview() => false,
            () = &mut shutdown => true,
        };
        if interrupted {
            return Ok(self.stop_early().await);
        }
        info!("Bot connected and running");

        let outcome = self.serve(shutdown.as_mut()).await;

        self.session.disconnect().await;
        info!("Bot stopped");
        Ok(outcome)
    }

    /// Access the session, mainly for inspection in tests.
    #[must_use]
    pub const fn session(&self) -> &Session<C> {
        &self.session
    }

    async fn stop_early(&mut self) -> RunOutcome {
        info!("Shutdown requested during startup");
        self.session.disconnect().await;
        info!("Bot stopped");
        RunOutcome::Interrupted
    }

    async fn serve<F: Future<Output = ()>>(&mut self, mut shutdown: Pin<&mut F>) -> RunOutcome {
        let mut last_keepalive = Instant::now();
        let mut last_status = Instant::now();

        loop {
            self.session.poll_events().await;
            self.dispatch_pending().await;

            let probe_due = last_keepalive.elapsed() >= self.settings.keepalive_interval;
            if probe_due || self.session.link_lost() {
                last_keepalive = Instant::now();
                if !self.session.is_connected().await {
                    warn!("Connection lost, reconnecting...");
                    tokio::select! {
                        restored = self.restore() => {
                            if !restored {
                                error!("Could not reconnect, stopping bot");
                                return RunOutcome::ReconnectExhausted;
                            }
                        }
                        () = &mut shutdown => {
                            info!("Shutdown requested");
                            return RunOutcome::Interrupted;
                        }
                    }
                    last_keepalive = Instant::now();
                }
            }

            if last_status.elapsed() >= self.settings.status_interval {
                last_status = Instant::now();
                info!("Bot running normally");
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.idle_pause) => {}
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return RunOutcome::Interrupted;
                }
            }
        }
    }

    /// Run every queued command, including ones that arrive meanwhile.
    async fn dispatch_pending(&mut self) {
        while let Some(invocation) = self.session.next_invocation() {
            self.dispatcher.dispatch(&mut self.session, &invocation).await;
        }
    }

    /// Reconnect until it works or the attempt budget runs out.
    async fn restore(&mut self) -> bool {
        loop {
            match self.session.reconnect().await {
                Ok(()) => {
                    self.print_overview().await;
                    return true;
                }
                Err(SessionError::ReconnectExhausted { .. }) => return false,
                Err(e) => warn!("Reconnection attempt failed: {}", e),
            }
        }
    }

    /// Print server details, real users and available commands.
    async fn print_overview(&mut self) {
        let info = match self.session.server_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("Could not fetch server info: {}", e);
                return;
            }
        };

        let rule = "=".repeat(50);
        println!("\n{rule}");
        println!("SERVER INFO");
        println!("{rule}");
        println!("Name: {}", info.name.as_deref().unwrap_or("?"));
        println!("Clients online: {}", info.clients_online.as_deref().unwrap_or("?"));
        println!("Max clients: {}", info.max_clients.as_deref().unwrap_or("?"));
        println!("{rule}");

        let clients = self.session.list_clients().await;
        println!("\nCONNECTED USERS:");
        println!("{}", "-".repeat(30));
        for client in &clients {
            println!("  {client}");
        }
        println!("{}", "-".repeat(30));

        println!("\nAVAILABLE COMMANDS:");
        println!("{}", "-".repeat(30));
        for command in BotCommand::ALL {
            println!("  {:<6} - {}", command.token(), command.description());
        }
        println!("{}", "-".repeat(30));
    }
}
