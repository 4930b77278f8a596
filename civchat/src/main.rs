//! `CivChat` — line-oriented chat client for the civic network.
//!
//! Connects the push channel for one signed-in user, prints presence and
//! inbox changes, and optionally opens a chat with a peer. Configuration via
//! CLI flags, environment variables, or config file
//! (`~/.config/civchat/config.toml`).
//!
//! ```bash
//! cargo run --bin civchat -- --api-url http://127.0.0.1:3000/api/ \
//!     --socket-url ws://127.0.0.1:3000/ws --user-id alice --token ... \
//!     --peer bob
//! ```
//!
//! Input lines are sent to the open chat. Commands: `/online`, `/chats`,
//! `/more`, `/quit`.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use civchat::api::{ChatApi, HttpChatApi};
use civchat::chat::view::{ChatView, ViewEvent};
use civchat::client::{ChatClient, ClientUpdate};
use civchat::config::{CliArgs, ClientConfig};
use civchat::connection::ConnectionState;
use civchat::session::AuthSession;
use civchat::transport::ws::WsConnector;
use civchat_proto::message::UserId;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // CLI args > config file > env > defaults.
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("civchat starting");

    let (Some(user_id), Some(token)) = (config.user_id.clone(), config.token.clone()) else {
        eprintln!("error: --user-id and --token are required");
        return ExitCode::from(2);
    };
    let (api_base, socket_url) = match (config.api_base(), config.socket()) {
        (Ok(api), Ok(socket)) => (api, socket),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let api = match HttpChatApi::new(api_base, config.request_timeout) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let connector = WsConnector::new(socket_url, &config.connection);

    let (client, updates) = ChatClient::new(connector, api, &config);
    client.start(AuthSession::new(user_id, token)).await;

    let view = match config.peer.as_deref() {
        Some(peer) => match client.open_chat_with(&UserId::new(peer)).await {
            Ok(opened) => Some(opened),
            Err(e) => {
                eprintln!("could not open chat with {peer}: {e}");
                None
            }
        },
        None => None,
    };

    run(&client, view, updates).await;

    client.stop().await;
    tracing::info!("civchat exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Logs go to a file so they do not interleave with the chat on stdout.
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("civchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

type OpenView<A> = (ChatView<A>, mpsc::Receiver<ViewEvent>);

/// Interleave stdin, client updates, view updates and state changes until
/// `/quit` or end of input.
async fn run<A: ChatApi>(
    client: &ChatClient<WsConnector, A>,
    mut view: Option<OpenView<A>>,
    mut updates: mpsc::Receiver<ClientUpdate>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = client.connection().watch_state();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !handle_line(client, view.as_ref(), line.trim()).await {
                    break;
                }
            }
            Some(update) = updates.recv() => print_update(&update),
            Some(event) = next_view_event(&mut view) => {
                if let Some((chat, _)) = view.as_ref() {
                    print_view_event(chat, &event);
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                print_state(&current);
            }
        }
    }
}

async fn next_view_event<A: ChatApi>(view: &mut Option<OpenView<A>>) -> Option<ViewEvent> {
    match view {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Returns `false` to quit.
async fn handle_line<A: ChatApi>(
    client: &ChatClient<WsConnector, A>,
    view: Option<&OpenView<A>>,
    line: &str,
) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/online" => {
            let online: Vec<String> = client.online_users().iter().map(ToString::to_string).collect();
            println!("online: {}", online.join(", "));
        }
        "/chats" => {
            let me = client.session().map(|s| s.user_id);
            for chat in client.chats() {
                let peer = me
                    .as_ref()
                    .and_then(|me| chat.other_participant(me))
                    .map_or_else(|| "?".to_string(), |p| p.user.id.to_string());
                println!("{}  with {peer}  (last activity {})", chat.id, chat.last_activity);
            }
            println!("unread: {}", client.unread_count());
        }
        "/more" => match view {
            Some((chat, _)) => match chat.load_more().await {
                Ok(None) => println!("no older messages"),
                Ok(Some(_)) => {}
                Err(e) => println!("load failed: {e}"),
            },
            None => println!("no chat open"),
        },
        text => match view {
            Some((chat, _)) => {
                chat.keystroke();
                if let Err(e) = chat.send(text).await {
                    println!("not sent: {e}");
                }
            }
            None => println!("no chat open (use --peer)"),
        },
    }
    true
}

fn print_update(update: &ClientUpdate) {
    match update {
        ClientUpdate::Presence(online) => println!("* {} user(s) online", online.len()),
        ClientUpdate::Inbox { unread } => println!("* unread: {unread}"),
    }
}

fn print_view_event<A: ChatApi>(chat: &ChatView<A>, event: &ViewEvent) {
    match event {
        ViewEvent::Messages => {
            if let Some(last) = chat.messages().last() {
                println!("[{}] {}: {}", last.created_at.format("%H:%M"), last.sender.id, last.content);
            }
        }
        ViewEvent::Typing(users) if users.is_empty() => {}
        ViewEvent::Typing(users) => {
            let names: Vec<String> = users.iter().map(ToString::to_string).collect();
            println!("* {} typing...", names.join(", "));
        }
        ViewEvent::ReadBy { user, .. } => println!("* read by {user}"),
        ViewEvent::LoadFailed { page, error } => println!("! page {page} failed to load: {error}"),
    }
}

fn print_state(state: &ConnectionState) {
    match state {
        ConnectionState::Connecting => println!("* connecting..."),
        ConnectionState::Open { socket_id } => println!("* connected ({socket_id})"),
        ConnectionState::ReconnectPending { attempt } => {
            println!("* connection lost, retrying (attempt {attempt})");
        }
        ConnectionState::Closed { reason } => println!("* disconnected: {reason:?}"),
    }
}
