//! CLI entry point for the LAN messenger.
//!
//! This binary provides a command-line interface for the messenger library,
//! supporting key generation, configuration management, and running the
//! messenger with a line-oriented interactive front end.

use anyhow::Result;
use clap::{Parser, Subcommand};
use lan_messenger::{
    crypto::SecureTransport,
    utils::{MessengerConfig, ProcMeminfo, DEFAULT_CONFIG_FILE},
    AppEvent, Messenger,
};
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

/// LAN Messenger - encrypted peer-to-peer messaging on the local network
#[derive(Parser)]
#[command(name = "messenger")]
#[command(about = "Serverless encrypted text and file messaging between peers on a LAN")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the messenger interactively
    Run {
        /// UDP port for discovery announcements
        #[arg(long)]
        discovery_port: Option<u16>,
        /// UDP port for messages
        #[arg(long)]
        message_port: Option<u16>,
        /// Directory received files are written to
        #[arg(long, value_name = "DIR")]
        received_dir: Option<PathBuf>,
    },
    /// Print a fresh shared key for `crypto.shared_key`
    Keygen,
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include a freshly generated shared key
        #[arg(long)]
        with_key: bool,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show {
        /// Show only specific section
        #[arg(short, long)]
        section: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Keygen => {
            println!("{}", SecureTransport::generate().key_hex());
            Ok(())
        }
        Commands::Config { action } => handle_config_commands(action, cli.config).await,
        Commands::Run {
            discovery_port,
            message_port,
            received_dir,
        } => {
            let mut config = MessengerConfig::load(cli.config.as_deref())?;
            if let Some(port) = discovery_port {
                config.network.discovery_port = port;
            }
            if let Some(port) = message_port {
                config.network.message_port = port;
            }
            if let Some(dir) = received_dir {
                config.storage.received_dir = dir;
            }
            config.validate()?;
            handle_run_command(config).await
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();
}

async fn handle_run_command(config: MessengerConfig) -> Result<()> {
    config.ensure_directories()?;
    if config.crypto.shared_key.is_none() {
        warn!("No shared key configured; peers cannot read messages sealed with this session's key");
    }

    let (messenger, events) = Messenger::new(config)?;
    let addrs = match messenger.start().await {
        Ok(addrs) => addrs,
        Err(e) => {
            error!("Failed to start: {e}");
            return Err(e.into());
        }
    };
    info!(
        "Listening for peers on {} and messages on {}",
        addrs.discovery, addrs.message
    );

    println!("LAN Messenger {}", env!("CARGO_PKG_VERSION"));
    println!("Your ID: {}\n", messenger.id());
    println!("{}", messenger.network_status().await);
    println!("\nEnter command (type 'help' for available commands):");

    let result = interactive_loop(&messenger, events).await;
    println!("Shutting down...");
    messenger.shutdown().await;
    result
}

/// One line of interactive input
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Help,
    List,
    Status,
    Quit,
    Send(String),
    File(PathBuf),
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => return Self::Empty,
            "help" => return Self::Help,
            "list" => return Self::List,
            "status" => return Self::Status,
            "quit" | "exit" => return Self::Quit,
            _ => {}
        }
        if let Some(text) = line.strip_prefix("send ") {
            return Self::Send(text.trim().to_string());
        }
        if let Some(path) = line.strip_prefix("file ") {
            return Self::File(PathBuf::from(path.trim()));
        }
        Self::Unknown(line.to_string())
    }
}

async fn interactive_loop(
    messenger: &Messenger,
    mut events: mpsc::UnboundedReceiver<AppEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let probe = ProcMeminfo::new();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    prompt();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown signal received");
                return Ok(());
            }
            Some(event) = events.recv() => {
                print_event(&event);
                prompt();
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match Input::parse(&line) {
                    Input::Empty => {}
                    Input::Help => print_help(),
                    Input::List => {
                        println!("\nKnown peers:");
                        for peer in messenger.peers().await {
                            let marker = if peer.id == messenger.id() { " (you)" } else { "" };
                            println!("  {peer}{marker}");
                        }
                        println!();
                    }
                    Input::Status => {
                        println!("=== Status Report ===");
                        println!("{}", messenger.network_status().await);
                        println!("{}", messenger.statistics().await);
                        println!("Queued messages: {}", messenger.queued().await);
                        println!("Encryption: Enabled (ChaCha20-Poly1305)");
                        println!("=====================");
                    }
                    Input::Quit => return Ok(()),
                    Input::Send(text) => match messenger.send_text(&text).await {
                        Ok(outcome) => println!("{outcome}"),
                        Err(e) => println!("Error: {e}"),
                    },
                    Input::File(path) => match messenger.send_file(&path, &probe).await {
                        Ok(outcome) => println!("File {}: {outcome}", path.display()),
                        Err(e) => println!("Error: {e}"),
                    },
                    Input::Unknown(command) => {
                        println!("Unknown command '{command}'. Type 'help' for available commands.");
                    }
                }
                prompt();
            }
        }
    }
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::TextReceived { sender_id, content } => {
            println!("\nReceived from {sender_id}: {content}");
        }
        AppEvent::FileReceived { sender_id, path } => {
            println!("\nReceived file from {sender_id}: {}", path.display());
        }
        AppEvent::QueuedDelivered { kind, peers } => {
            println!("\nQueued {kind} message delivered to {peers} peer(s)");
        }
        AppEvent::QueuedDropped { kind, attempts } => {
            println!("\nGave up on queued {kind} message after {attempts} attempts");
        }
    }
}

fn print_help() {
    println!("\nAvailable commands:");
    println!("  help           - Show this help");
    println!("  list           - List known peers");
    println!("  send <message> - Send text message");
    println!("  file <path>    - Send file");
    println!("  status         - Show network and statistics");
    println!("  quit           - Exit the application");
    println!();
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn handle_config_commands(action: ConfigCommands, config_file: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigCommands::Generate { output, with_key } => {
            let mut config = MessengerConfig::default();
            if with_key {
                config.crypto.shared_key = Some(SecureTransport::generate().key_hex());
            }
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

            config.save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            match file.or(config_file) {
                Some(path) => MessengerConfig::from_file(path)?,
                None => MessengerConfig::load(None)?,
            };
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show { section } => {
            let config = MessengerConfig::load(config_file.as_deref())?;
            let rendered = config.to_toml_string()?;

            match section {
                Some(name) => {
                    let table: toml::Table = toml::from_str(&rendered)?;
                    let value = table
                        .get(&name)
                        .ok_or_else(|| anyhow::anyhow!("No such section: {name}"))?;
                    println!("[{name}]");
                    println!("{}", toml::to_string_pretty(value)?);
                }
                None => println!("{rendered}"),
            }
        }
    }
    Ok(())
}
