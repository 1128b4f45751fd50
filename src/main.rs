//! querybot — ServerQuery chat command bot

use clap::Parser;
use querybot::{Cli, Dispatcher, LoopSettings, RunOutcome, Runner, Session, TcpConnector};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins when set
    let default_filter = if cli.verbose { "querybot=debug" } else { "querybot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(RunOutcome::Interrupted) => {}
        Ok(RunOutcome::ReconnectExhausted) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let config = cli.resolve_config()?;
    let shutdown = shutdown_signal()?;

    let connector = TcpConnector::new(config.host.clone(), config.query_port);
    let session = Session::new(connector, config.session_settings());
    let dispatcher = Dispatcher::new(config.command_settings());
    let settings = LoopSettings {
        keepalive_interval: config.keepalive_interval(),
        status_interval: config.status_interval(),
        idle_pause: config.idle_pause(),
    };

    info!("Press Ctrl+C to stop the bot");
    let mut runner = Runner::new(session, dispatcher, settings);
    Ok(runner.run(shutdown).await?)
}

/// Install the Ctrl-C handler now; the returned future resolves once it fires.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(async move {
        interrupt.recv().await;
        info!("Received Ctrl-C, stopping bot");
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl-C, stopping bot");
    })
}
