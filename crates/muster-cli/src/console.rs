//! Line-oriented operator console
//!
//! The same commands drive a host and a joined client. A host applies them
//! to its own coordinator; a client turns them into requests to its host.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use muster_client::ClientCoordinator;
use muster_host::HostCoordinator;
use muster_protocol::LocalPlayerType;

use crate::output::{format_listing, print_error, print_info, print_success, print_warning};

/// One console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Take(String),
    Release(String),
    Enable(String),
    Disable(String),
    PlayAs(String, LocalPlayerType),
    Start,
    Persist,
    LoadMatch(String),
    Matches,
    Help,
    Quit,
}

pub const HELP: &str = "\
list                 show seats
take <seat>          claim a seat
release <seat>       give a seat up
enable <seat>        enable a seat
disable <seat>       disable a seat
type <seat> <type>   how the host plays its seat (human, weak_ai, fast_ai, hard_ai, does_nothing)
start                start the match once every seat is claimed
persist              keep seating across the next match reload
match <name>         load another match
matches              list loadable matches
quit                 leave";

impl ConsoleCommand {
    /// Parse a console line. Blank lines are `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let Some((word, rest)) = split_word(line) else {
            return Ok(None);
        };
        let arg = || {
            if rest.is_empty() {
                Err(format!("usage: {} <seat>", word))
            } else {
                Ok(rest.to_string())
            }
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "list" | "ls" => Self::List,
            "take" => Self::Take(arg()?),
            "release" => Self::Release(arg()?),
            "enable" => Self::Enable(arg()?),
            "disable" => Self::Disable(arg()?),
            "type" => {
                // seat names may contain spaces, the type never does
                let (seat, kind) = rest
                    .rsplit_once(char::is_whitespace)
                    .ok_or_else(|| "usage: type <seat> <type>".to_string())?;
                Self::PlayAs(seat.trim().to_string(), kind.parse()?)
            }
            "start" => Self::Start,
            "persist" => Self::Persist,
            "match" => {
                if rest.is_empty() {
                    return Err("usage: match <name>".to_string());
                }
                Self::LoadMatch(rest.to_string())
            }
            "matches" => Self::Matches,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command: {} (try help)", other)),
        };
        Ok(Some(command))
    }
}

fn split_word(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    })
}

/// Read commands from stdin until `quit`, end of input or cancellation
async fn read_commands<F>(cancel: &CancellationToken, mut handle: F)
where
    F: FnMut(ConsoleCommand),
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                // stdin closed; keep serving until cancelled
                cancel.cancelled().await;
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read console input: {}", e);
                cancel.cancelled().await;
                break;
            }
        };
        match ConsoleCommand::parse(&line) {
            Ok(Some(ConsoleCommand::Help)) => println!("{}", HELP),
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => handle(command),
            Ok(None) => {}
            Err(message) => print_warning(&message),
        }
    }
}

/// Console for a running host
pub async fn run_host_console(host: Arc<HostCoordinator>, cancel: CancellationToken) {
    read_commands(&cancel, |command| apply_host_command(&host, command)).await;
}

fn apply_host_command(host: &Arc<HostCoordinator>, command: ConsoleCommand) {
    let report = |changed: bool, what: &str| {
        if !changed {
            print_warning(&format!("Nothing changed ({})", what));
        }
    };
    match command {
        ConsoleCommand::List => println!("{}", format_listing(&host.player_listing())),
        ConsoleCommand::Take(seat) => report(host.take_seat_as_host(&seat), &seat),
        ConsoleCommand::Release(seat) => report(host.release_seat_as_host(&seat), &seat),
        ConsoleCommand::Enable(seat) => report(host.set_seat_enabled(&seat, true), &seat),
        ConsoleCommand::Disable(seat) => report(host.set_seat_enabled(&seat, false), &seat),
        ConsoleCommand::PlayAs(seat, kind) => report(host.set_local_player_type(&seat, kind), &seat),
        ConsoleCommand::Start => {
            let host = Arc::clone(host);
            tokio::spawn(async move {
                match host.start_match().await {
                    Ok(true) => print_success("Match started"),
                    Ok(false) => print_warning("Every seat must be claimed first"),
                    Err(e) => print_error(&format!("Launch failed: {}", e)),
                }
            });
        }
        ConsoleCommand::Persist => {
            host.persist_seating();
            print_info("Seating will be kept across the next match reload");
        }
        ConsoleCommand::LoadMatch(name) => match host.change_active_match(&name) {
            Ok(_) => print_success(&format!("Loaded {}", name)),
            Err(e) => print_error(&e.to_string()),
        },
        ConsoleCommand::Matches => print_names(&host.list_available_matches()),
        ConsoleCommand::Help | ConsoleCommand::Quit => {}
    }
}

/// Console for a joined client
pub async fn run_client_console(client: Arc<ClientCoordinator>, cancel: CancellationToken) {
    read_commands(&cancel, |command| apply_client_command(&client, command)).await;
}

fn apply_client_command(client: &Arc<ClientCoordinator>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::List => match client.player_listing() {
            Some(listing) => println!("{}", format_listing(&listing)),
            None => print_warning("No listing received yet"),
        },
        ConsoleCommand::Take(seat) => client.request_take_seat(&seat),
        ConsoleCommand::Release(seat) => client.request_release_seat(&seat),
        ConsoleCommand::Enable(seat) => client.request_enable(&seat),
        ConsoleCommand::Disable(seat) => client.request_disable(&seat),
        ConsoleCommand::PlayAs(..) | ConsoleCommand::Start | ConsoleCommand::Persist => {
            print_warning("Only the host can do that")
        }
        ConsoleCommand::LoadMatch(name) => {
            if !client.is_host_headless() {
                print_warning("Only a headless host accepts match changes");
                return;
            }
            let client = Arc::clone(client);
            tokio::spawn(async move {
                match client.change_active_match(&name).await {
                    Ok(()) => print_success(&format!("Host loaded {}", name)),
                    Err(e) => print_error(&e.to_string()),
                }
            });
        }
        ConsoleCommand::Matches => {
            let client = Arc::clone(client);
            tokio::spawn(async move {
                match client.list_available_matches().await {
                    Ok(names) => print_names(&names),
                    Err(e) => print_error(&e.to_string()),
                }
            });
        }
        ConsoleCommand::Help | ConsoleCommand::Quit => {}
    }
}

fn print_names(names: &[String]) {
    if names.is_empty() {
        print_info("No matches available");
    }
    for name in names {
        println!("  {}", name);
    }
}
