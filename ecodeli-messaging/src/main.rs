//! `ecodeli-chat`: headless EcoDeli messaging client.
//!
//! Connects as the configured user, loads the conversation list, and reads
//! commands from stdin. Logs go to a file, never stdout.
//!
//! ```bash
//! cargo run --bin ecodeli-chat -- --user-id 1 --role client \
//!     --api-url http://127.0.0.1:4000/api --ws-url ws://127.0.0.1:4000/ws
//! ```
//!
//! Commands: `/list`, `/open <id>`, `/close`, `/users`, `/start <id>`,
//! `/filter <all|client|delivery|service|shopkeeper> [query]`, `/typing`,
//! `/quit`. Any other line is sent to the open conversation.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use ecodeli_messaging::api::Backend;
use ecodeli_messaging::api::http::HttpBackend;
use ecodeli_messaging::config::{CliArgs, ClientConfig};
use ecodeli_messaging::controller::{Messenger, RoleFilter, SessionEvent};
use ecodeli_messaging::store::Conversation;
use ecodeli_messaging::transport::Transport;
use ecodeli_messaging::transport::ws::WsSession;
use ecodeli_proto::user::{User, UserId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("ecodeli-chat starting");

    let Some(me) = config.local_user() else {
        eprintln!("error: no user id configured (use --user-id or [session] user_id)");
        return ExitCode::FAILURE;
    };

    let backend = match HttpBackend::new(&config.http_config()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let transport = Arc::new(WsSession::new(config.ws_config()));

    let mut messenger = Messenger::new(me, transport, backend, config.messenger_config());
    messenger.start();
    match messenger.load_conversations().await {
        Ok(count) => println!("{count} conversation(s)"),
        Err(e) => println!("could not load conversations: {e}"),
    }

    run(&mut messenger).await;
    messenger.shutdown();
    ExitCode::SUCCESS
}

/// Initialize file-based tracing. Returns a guard that must be held for the
/// lifetime of the application to ensure logs are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("ecodeli-chat.log");
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

/// View state of the command loop.
struct View {
    filter: RoleFilter,
    query: String,
}

async fn run<T: Transport + 'static, B: Backend + 'static>(messenger: &mut Messenger<T, B>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = View {
        filter: RoleFilter::All,
        query: String::new(),
    };

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                if !command(messenger, &mut view, line.trim()).await {
                    break;
                }
            }
            event = messenger.next_event() => {
                let Some(event) = event else {
                    break;
                };
                announce(messenger, &event);
                messenger.handle_event(event);
            }
        }
    }
}

/// Runs one input line. Returns `false` to quit.
async fn command<T: Transport + 'static, B: Backend + 'static>(
    messenger: &mut Messenger<T, B>,
    view: &mut View,
    line: &str,
) -> bool {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match verb {
        "" => {}
        "/quit" | "/exit" => return false,
        "/list" => {
            for conversation in messenger.filtered_conversations(view.filter, &view.query) {
                println!("{}", summary_line(&conversation));
            }
        }
        "/filter" => {
            let (name, query) = rest.split_once(' ').unwrap_or((rest, ""));
            match RoleFilter::parse(name) {
                Some(filter) => {
                    if !messenger.allowed_filters().contains(&filter) {
                        println!("filter {filter} is not available for your role, showing all");
                    }
                    view.filter = filter;
                    view.query = query.trim().to_string();
                }
                None => println!("unknown filter {name:?}"),
            }
        }
        "/open" => match parse_peer(rest) {
            Some(peer) if messenger.select_conversation(Some(peer)).await => {
                if let Some(conversation) = messenger.conversation(peer) {
                    print_history(messenger.me().id, conversation);
                }
            }
            _ => println!("no conversation with {rest:?}"),
        },
        "/close" => {
            messenger.select_conversation(None).await;
        }
        "/users" => {
            if messenger.load_available_users() {
                println!("loading directory...");
            } else {
                print_directory(messenger.directory());
            }
        }
        "/start" => match parse_peer(rest) {
            Some(peer) => {
                let user = messenger
                    .directory()
                    .iter()
                    .find(|u| u.id == peer)
                    .cloned()
                    .unwrap_or_else(|| User::placeholder(peer));
                messenger.start_conversation(user).await;
                println!("talking to {peer}");
            }
            None => println!("usage: /start <user id>"),
        },
        "/typing" => {
            if let Some(peer) = messenger.selected() {
                messenger.send_typing(peer);
            }
        }
        _ if verb.starts_with('/') => println!("unknown command {verb}"),
        _ => match messenger.selected() {
            Some(peer) => {
                messenger.send_message(peer, line);
                if !messenger.is_connected() {
                    println!("(offline, message not sent)");
                }
            }
            None => println!("open a conversation first (/open <id>)"),
        },
    }
    true
}

fn parse_peer(raw: &str) -> Option<UserId> {
    raw.trim_start_matches("conv-").parse().ok().map(UserId::new)
}

fn announce<T: Transport + 'static, B: Backend + 'static>(
    messenger: &Messenger<T, B>,
    event: &SessionEvent,
) {
    match event {
        SessionEvent::Message(message) if message.sender_id != messenger.me().id => {
            let name = message
                .sender
                .as_ref()
                .map_or_else(|| format!("User #{}", message.sender_id), User::full_name);
            println!("[{}] {name}: {}", message.sender_id, message.content);
        }
        SessionEvent::Typing(peer) if messenger.selected() == Some(*peer) => {
            println!("[{peer}] is typing...");
        }
        SessionEvent::Connection(state) => println!("-- {state}"),
        SessionEvent::Failure(error) => println!("-- {error}"),
        SessionEvent::DirectoryLoaded(Ok(users)) => print_directory(users),
        SessionEvent::DirectoryLoaded(Err(error)) => println!("directory unavailable: {error}"),
        _ => {}
    }
}

fn summary_line(conversation: &Conversation) -> String {
    let preview = conversation
        .last_message
        .as_ref()
        .map_or("", |p| p.content.as_str());
    let typing = if conversation.is_typing { " (typing)" } else { "" };
    format!(
        "{:>6}  {:<24} {:>3} unread  {:<7} {preview}{typing}",
        conversation.peer(),
        conversation.recipient.full_name(),
        conversation.unread_count,
        conversation.status,
    )
}

fn print_history(me: UserId, conversation: &Conversation) {
    println!("== {} ==", conversation.recipient.full_name());
    for message in &conversation.messages {
        let who = if message.sender_id == me { "you" } else { "them" };
        let mark = if message.is_confirmed() { "" } else { " (pending)" };
        println!(
            "{} {who}: {}{mark}",
            message.created_at.format("%H:%M"),
            message.content
        );
    }
}

fn print_directory(users: &[User]) {
    for user in users {
        let role = user.role.map_or_else(String::new, |r| r.to_string());
        println!("{:>6}  {:<24} {role}", user.id, user.full_name());
    }
}
