//! muster
//!
//! Single binary for both sides of seat coordination:
//! - `host` runs the authoritative coordinator and accepts players
//! - `join` connects to a host and mirrors its seats
//! - `config` writes or shows the configuration files
//!
//! Without a subcommand the mode comes from the MUSTER_* environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use muster::commands::config::{config_init, config_show, ConfigSide};
use muster::console::{run_client_console, run_host_console};
use muster::output::{print_error, print_info, print_success, print_warning, ListingPrinter};
use muster_client::{ClientCoordinator, ClientUpdate, Credentials, HostAddress};
use muster_core::config::{self, DEFAULT_PORT};
use muster_core::{Bootstrap, ClientConfig, HostConfig, MatchCatalog};
use muster_host::{ConnectionParams, HostCoordinator, HttpLobbyBridge};

#[derive(Parser)]
#[command(name = "muster")]
#[command(author, version, about = "Seat coordination for turn-based multiplayer matches")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a match and accept players
    Host(HostArgs),

    /// Join a hosted match
    Join(JoinArgs),

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Write the client file instead of the host file
        #[arg(long)]
        client: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the configuration file
    Show {
        /// Show the client file instead of the host file
        #[arg(long)]
        client: bool,
    },

    /// Print the configuration file path
    Path {
        /// Print the client file path instead of the host file path
        #[arg(long)]
        client: bool,
    },
}

#[derive(clap::Args, Default)]
struct HostArgs {
    /// Node name (overrides config)
    #[arg(short, long, env = "MUSTER_NAME")]
    name: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "MUSTER_PORT")]
    port: Option<u16>,

    /// Password players must know
    #[arg(long, env = "MUSTER_SERVER_PASSWORD")]
    password: Option<String>,

    /// Run unattended: no console, the match starts once every seat is claimed
    #[arg(long)]
    headless: bool,

    /// Directory of match definitions
    #[arg(long)]
    matches_dir: Option<PathBuf>,

    /// Match to load at startup
    #[arg(long = "match")]
    initial_match: Option<String>,

    /// Matchmaking lobby to register with
    #[arg(long, env = "MUSTER_LOBBY_URI")]
    lobby_uri: Option<String>,
}

#[derive(clap::Args)]
struct JoinArgs {
    /// Host name or address
    #[arg(long, env = "MUSTER_HOST")]
    host: String,

    /// Host port
    #[arg(short, long, env = "MUSTER_PORT", default_value_t = DEFAULT_PORT as u32)]
    port: u32,

    /// Node name (overrides config)
    #[arg(short, long, env = "MUSTER_NAME")]
    name: Option<String>,

    /// Host password
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let command = match cli.command {
        Some(command) => command,
        None => match Bootstrap::from_env().context("Invalid MUSTER_* environment")? {
            Bootstrap::Host(bootstrap) => Commands::Host(HostArgs {
                name: Some(bootstrap.name),
                port: Some(bootstrap.port),
                password: bootstrap.password,
                lobby_uri: bootstrap.lobby_uri,
                // an environment-launched host is an unattended bot
                headless: true,
                ..HostArgs::default()
            }),
            Bootstrap::Client(bootstrap) => Commands::Join(JoinArgs {
                host: bootstrap.host,
                port: bootstrap.port as u32,
                name: Some(bootstrap.name),
                password: None,
            }),
            Bootstrap::Interactive => {
                print_info("Nothing to do: run `muster host` or `muster join --host <address>`");
                return Ok(());
            }
        },
    };

    match command {
        Commands::Host(args) => run_host(cli.config, args, cancel).await,
        Commands::Join(args) => run_join(cli.config, args, cancel).await,
        Commands::Config { action } => match action {
            ConfigAction::Init { client, force } => {
                config_init(cli.config.as_ref(), ConfigSide::from_client_flag(client), force)
            }
            ConfigAction::Show { client } => {
                config_show(cli.config.as_ref(), ConfigSide::from_client_flag(client))
            }
            ConfigAction::Path { client } => {
                let path = ConfigSide::from_client_flag(client).resolve(cli.config.as_ref());
                println!("{}", path.display());
                Ok(())
            }
        },
    }
}

async fn run_host(config_path: Option<PathBuf>, args: HostArgs, cancel: CancellationToken) -> Result<()> {
    let path = config_path.unwrap_or_else(config::default_host_config_path);
    let mut config: HostConfig = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;

    if let Some(name) = args.name {
        config.node_name = name;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.password.is_some() {
        config.password = args.password;
    }
    if args.headless {
        config.headless = true;
        config.minimize_remote_ai = true;
    }
    if args.matches_dir.is_some() {
        config.matches_dir = args.matches_dir;
    }
    if args.initial_match.is_some() {
        config.initial_match = args.initial_match;
    }
    if args.lobby_uri.is_some() {
        config.lobby_uri = args.lobby_uri;
    }
    config.validate().context("Invalid host configuration")?;

    let catalog = match &config.matches_dir {
        Some(dir) => MatchCatalog::load_dir(dir)
            .with_context(|| format!("Failed to load matches from {:?}", dir))?,
        None => MatchCatalog::new(),
    };
    let first_match = config
        .initial_match
        .clone()
        .or_else(|| catalog.names().into_iter().next());

    let mut coordinator = HostCoordinator::new(config.clone(), catalog);
    if let Some(uri) = &config.lobby_uri {
        tracing::info!("Using lobby at {}", uri);
        coordinator = coordinator.with_lobby(Arc::new(HttpLobbyBridge::new(uri.clone())));
    }
    let host = Arc::new(coordinator);
    if !config.headless {
        host.set_listener(Some(Arc::new(ListingPrinter)));
    }

    match first_match {
        Some(name) => {
            host.change_active_match(&name)
                .with_context(|| format!("Failed to load match {}", name))?;
        }
        None => print_warning("No match definitions found; players can join but not sit"),
    }

    let info = host
        .initialize(ConnectionParams::from(&config))
        .await
        .context("Failed to start host")?;
    print_success(&format!("Hosting as {} on {}", info.node.name(), info.local_addr));
    if let Some(game_id) = &info.game_id {
        print_info(&format!("Registered with lobby as game {}", game_id));
    }

    // a lobby shutdown command ends the process too
    let host_shutdown = host.shutdown_token();
    let stop = cancel.clone();
    tokio::spawn(async move {
        host_shutdown.cancelled().await;
        stop.cancel();
    });

    if config.headless {
        cancel.cancelled().await;
    } else {
        run_host_console(Arc::clone(&host), cancel.clone()).await;
    }

    host.shutdown();
    tracing::info!("Host shutdown complete");
    Ok(())
}

async fn run_join(config_path: Option<PathBuf>, args: JoinArgs, cancel: CancellationToken) -> Result<()> {
    let path = config_path.unwrap_or_else(config::default_client_config_path);
    let mut config: ClientConfig = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    if let Some(name) = args.name {
        config.node_name = name;
    }

    let client = Arc::new(ClientCoordinator::new(config));
    tokio::spawn(print_updates(Arc::clone(&client), cancel.clone()));

    let credentials = Credentials {
        password: args.password,
    };
    let session = client
        .connect(HostAddress::new(args.host.clone(), args.port), credentials)
        .await
        .with_context(|| format!("Failed to join {}:{}", args.host, args.port))?;

    print_success(&format!("Joined as {}", session.node.name()));
    if session.host_headless {
        print_info("The host is headless; `match <name>` changes its match");
    }
    println!("{}", muster::output::format_listing(&session.listing));

    run_client_console(Arc::clone(&client), cancel.clone()).await;
    client.cancel();
    Ok(())
}

async fn print_updates(client: Arc<ClientCoordinator>, cancel: CancellationToken) {
    let mut updates = client.subscribe();
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => update,
        };
        match update {
            Ok(ClientUpdate::ListingChanged(listing)) => {
                println!("{}", muster::output::format_listing(&listing));
            }
            Ok(ClientUpdate::StateChanged(state)) => tracing::debug!("Now {}", state),
            Ok(ClientUpdate::MatchStarted {
                match_data,
                remote_seats,
                in_progress,
            }) => {
                let verb = if in_progress { "Joining running" } else { "Starting" };
                print_success(&format!(
                    "{} match {} ({} remote seats)",
                    verb,
                    match_data.name,
                    remote_seats.len()
                ));
            }
            Ok(ClientUpdate::JoinRejected(reason)) => print_warning(&reason),
            Ok(ClientUpdate::MatchReset) => print_info("Back to seat selection"),
            Ok(ClientUpdate::Disconnected) => {
                print_error("Disconnected from host");
                cancel.cancel();
                break;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Console missed {} updates", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}
