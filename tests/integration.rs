//! Integration tests against a ServerQuery server speaking real TCP.
//!
//! Each test starts its own fake server on an ephemeral port.

use querybot::{
    BotCommand, CommandSettings, Dispatcher, LoopSettings, RunOutcome, Runner, Session,
    SessionSettings, TcpConnector, Timeouts,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WELCOME: &str = "TS3\n\rWelcome to the TeamSpeak 3 ServerQuery interface.\n\r";
const OK: &str = "error id=0 msg=ok";
const CLIENTS: &str = "clid=1 cid=1 client_database_id=1 client_nickname=serveradmin client_type=1|clid=6 cid=1 client_database_id=4 client_nickname=Ann client_type=0|clid=7 cid=2 client_database_id=5 client_nickname=Ben client_type=0";

/// What the fake server does after reading a command.
enum Action {
    Reply(String),
    /// Reply after a pause.
    Delayed(Duration, String),
    /// Send an event, pause, then the reply.
    EventThenReply(String, Duration, String),
    /// Reply, then push an event line.
    ReplyThenEvent(String, String),
    /// Close the connection without replying.
    Hangup,
}

type Handler = Arc<dyn Fn(usize, &str) -> Action + Send + Sync>;

/// Commands received by the fake server, tagged with the connection number.
#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<(usize, String)>>>);

impl Log {
    fn push(&self, conn: usize, command: &str) {
        self.0.lock().expect("log lock").push((conn, command.to_string()));
    }

    fn commands(&self) -> Vec<String> {
        self.0.lock().expect("log lock").iter().map(|(_, c)| c.clone()).collect()
    }

    fn connections(&self) -> usize {
        self.0.lock().expect("log lock").iter().map(|(n, _)| *n).max().unwrap_or(0)
    }
}

fn handler(f: impl Fn(usize, &str) -> Action + Send + Sync + 'static) -> Handler {
    Arc::new(f)
}

fn default_reply(command: &str) -> Action {
    let word = command.split_whitespace().next().unwrap_or_default();
    match word {
        "whoami" => Action::Reply(format!("virtualserver_status=online virtualserver_id=1 client_id=1 client_channel_id=1\n\r{OK}")),
        "serverinfo" => Action::Reply(format!(
            "virtualserver_name=Integration\\sServer virtualserver_clientsonline=3 virtualserver_maxclients=32\n\r{OK}"
        )),
        "clientlist" => Action::Reply(format!("{CLIENTS}\n\r{OK}")),
        _ => Action::Reply(OK.to_string()),
    }
}

/// Start a fake server; returns its port and the command log.
async fn spawn_server(handler: Handler) -> (u16, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let log = Log::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let mut conn_no = 0;
        while let Ok((stream, _)) = listener.accept().await {
            conn_no += 1;
            let handler = Arc::clone(&handler);
            let log = server_log.clone();
            tokio::spawn(serve_connection(stream, conn_no, handler, log));
        }
    });

    (port, log)
}

async fn serve_connection(stream: TcpStream, conn_no: usize, handler: Handler, log: Log) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    if write_half.write_all(WELCOME.as_bytes()).await.is_err() {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // Frames end in "\n\r", so the '\r' leads the next line
        let command = line.trim_matches(|c: char| c == '\r' || c == '\n').to_string();
        if command.is_empty() {
            continue;
        }
        log.push(conn_no, &command);

        let result = match handler(conn_no, &command) {
            Action::Reply(reply) => write_half.write_all(format!("{reply}\n\r").as_bytes()).await,
            Action::Delayed(pause, reply) => {
                tokio::time::sleep(pause).await;
                write_half.write_all(format!("{reply}\n\r").as_bytes()).await
            }
            Action::EventThenReply(event, pause, reply) => {
                let first = write_half.write_all(format!("{event}\n\r").as_bytes()).await;
                tokio::time::sleep(pause).await;
                match first {
                    Ok(()) => write_half.write_all(format!("{reply}\n\r").as_bytes()).await,
                    Err(e) => Err(e),
                }
            }
            Action::ReplyThenEvent(reply, event) => {
                write_half
                    .write_all(format!("{reply}\n\r{event}\n\r").as_bytes())
                    .await
            }
            Action::Hangup => return,
        };
        if result.is_err() {
            return;
        }
    }
}

fn settings(max_attempts: u32) -> SessionSettings {
    SessionSettings {
        username: "serveradmin".into(),
        password: "secret".into(),
        timeouts: Timeouts {
            connect: Duration::from_secs(5),
            reply: Duration::from_millis(200),
            poll: Duration::from_millis(20),
        },
        reconnect_delay: Duration::ZERO,
        max_reconnect_attempts: max_attempts,
    }
}

fn loop_settings() -> LoopSettings {
    LoopSettings {
        keepalive_interval: Duration::from_secs(60),
        status_interval: Duration::from_secs(300),
        idle_pause: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_connect_and_mass_poke_over_tcp() {
    let (port, log) = spawn_server(handler(|_, command| default_reply(command))).await;

    let mut session = Session::new(TcpConnector::new("127.0.0.1", port), settings(1));
    timeout(Duration::from_secs(5), session.connect())
        .await
        .expect("timeout")
        .expect("connect");
    assert_eq!(session.bot_client_id(), Some("1"));

    let info = session.server_info().await.expect("serverinfo");
    assert_eq!(info.name.as_deref(), Some("Integration Server"));

    let report = Dispatcher::new(CommandSettings::default())
        .execute(&mut session, BotCommand::MassPoke, None)
        .await;
    assert_eq!(report.targeted, 2);
    assert_eq!(report.succeeded, 2);

    session.disconnect().await;

    let commands = log.commands();
    assert_eq!(commands[0], "login serveradmin secret");
    assert!(commands.contains(&"clientpoke clid=6 msg=Mass\\spoke\\sfrom\\sthe\\sbot!".to_string()));
    assert!(commands.contains(&"clientpoke clid=7 msg=Mass\\spoke\\sfrom\\sthe\\sbot!".to_string()));
    assert_eq!(commands.last().map(String::as_str), Some("logout"));
}

#[tokio::test]
async fn test_wrong_password_is_auth_error() {
    let (port, log) = spawn_server(handler(|_, command| {
        if command.starts_with("login") {
            Action::Reply("error id=520 msg=invalid\\sloginname\\sor\\spassword".into())
        } else {
            default_reply(command)
        }
    }))
    .await;

    let mut session = Session::new(TcpConnector::new("127.0.0.1", port), settings(1));
    let err = session.connect().await.expect_err("login should fail");

    assert!(matches!(err, querybot::SessionError::Auth { .. }));
    assert!(!session.is_established());
    assert!(!log.commands().contains(&"whoami".to_string()));
}

#[tokio::test]
async fn test_event_during_request_is_routed_not_returned() {
    let event = "notifytextmessage targetmode=2 msg=!test target=1 invokerid=6 invokername=Ann";
    let (port, _log) = spawn_server(handler(move |_, command| {
        if command == "serverinfo" {
            Action::EventThenReply(
                event.to_string(),
                Duration::from_millis(500),
                format!("virtualserver_name=Slow\n\r{OK}"),
            )
        } else {
            default_reply(command)
        }
    }))
    .await;

    let mut session = Session::new(TcpConnector::new("127.0.0.1", port), settings(1));
    session.connect().await.expect("connect");

    let reply = session.request("serverinfo").await.expect("request");
    assert!(!reply.contains("notify"));
    assert!(reply.contains("virtualserver_name=Slow"));

    let invocation = session.next_invocation().expect("queued invocation");
    assert_eq!(invocation.message, "!test");
    assert_eq!(invocation.invoker_id, "6");
    assert_eq!(invocation.channel_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_runner_moves_clients_on_chat_command() {
    let (moved_tx, mut moved_rx) = mpsc::unbounded_channel::<String>();
    let (port, _log) = spawn_server(handler(move |_, command| {
        if command == "servernotifyregister event=textprivate" {
            Action::ReplyThenEvent(
                OK.to_string(),
                "notifytextmessage targetmode=2 msg=!MM\\splease target=2 invokerid=7 invokername=Ben".into(),
            )
        } else if command.starts_with("clientmove") {
            moved_tx.send(command.to_string()).ok();
            Action::Reply(OK.to_string())
        } else {
            default_reply(command)
        }
    }))
    .await;

    let session = Session::new(TcpConnector::new("127.0.0.1", port), settings(1));
    let mut runner = Runner::new(session, Dispatcher::default(), loop_settings());

    let shutdown = async {
        let moved = moved_rx.recv().await;
        assert_eq!(moved.as_deref(), Some("clientmove clid=6 cid=2"));
    };
    let outcome = timeout(Duration::from_secs(10), runner.run(shutdown))
        .await
        .expect("timeout")
        .expect("run");

    assert_eq!(outcome, RunOutcome::Interrupted);
}

#[tokio::test]
async fn test_runner_reconnects_after_server_hangup() {
    let (port, log) = spawn_server(handler(|conn, command| {
        // The first connection dies while the startup overview lists clients
        if conn == 1 && command == "clientlist" {
            Action::Hangup
        } else {
            default_reply(command)
        }
    }))
    .await;

    let session = Session::new(TcpConnector::new("127.0.0.1", port), settings(3));
    let mut runner = Runner::new(session, Dispatcher::default(), loop_settings());

    let shutdown_log = log.clone();
    let shutdown = async move {
        while shutdown_log.connections() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Let the second login finish
        tokio::time::sleep(Duration::from_millis(300)).await;
    };
    let outcome = timeout(Duration::from_secs(10), runner.run(shutdown))
        .await
        .expect("timeout")
        .expect("run");

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(log.connections(), 2);
    let logins = log
        .commands()
        .iter()
        .filter(|c| c.starts_with("login"))
        .count();
    assert_eq!(logins, 2);
}

#[tokio::test]
async fn test_shutdown_during_startup_still_logs_out() {
    let (port, log) = spawn_server(handler(|_, command| {
        if command == "serverinfo" {
            Action::Delayed(Duration::from_millis(150), format!("virtualserver_name=Slow\n\r{OK}"))
        } else {
            default_reply(command)
        }
    }))
    .await;

    let session = Session::new(TcpConnector::new("127.0.0.1", port), settings(1));
    let mut runner = Runner::new(session, Dispatcher::default(), loop_settings());

    // Interrupt while the startup overview waits for serverinfo
    let shutdown_log = log.clone();
    let shutdown = async move {
        while !shutdown_log.commands().iter().any(|c| c == "serverinfo") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let outcome = timeout(Duration::from_secs(5), runner.run(shutdown))
        .await
        .expect("timeout")
        .expect("run");

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(!runner.session().is_established());

    timeout(Duration::from_secs(2), async {
        while !log.commands().iter().any(|c| c == "logout") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("logout was not sent");
    assert!(!log.commands().iter().any(|c| c == "clientlist"));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let session = Session::new(TcpConnector::new("127.0.0.1", port), settings(1));
    let mut runner = Runner::new(session, Dispatcher::default(), loop_settings());

    let result = runner.run(std::future::pending()).await;
    assert!(matches!(result, Err(querybot::SessionError::Transport(_))));
}
