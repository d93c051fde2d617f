//! NOTCH CLI
//!
//! Interactive command-line client for a NOTCH console on a serial port.
//!
//! # Usage
//!
//! ```bash
//! # Connect and open the console prompt
//! notch --port /dev/ttyACM0
//!
//! # Use a configuration file
//! notch --config ~/.config/notch.toml
//!
//! # Execute single command, print the reply as JSON
//! notch --port /dev/ttyACM0 --json -c "memory"
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use notch_protocol::{
    ConsoleInfo, ConsoleSnapshot, Failure, MemoryInfo, ProtocolError, ProtocolHandler, Reply,
    Settings, Stats,
};
use notch_transport::{LinkSettings, SerialProvider, Transport, TransportError, TransportEvent};

use crate::config::Config;

/// NOTCH Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "notch")]
#[command(author, version, about = "NOTCH CLI - talk to a NOTCH console over serial")]
struct Args {
    /// Serial port the console is attached to
    #[arg(short, long, env = "NOTCH_PORT")]
    port: Option<String>,

    /// Baud rate (default 9600)
    #[arg(short, long, env = "NOTCH_BAUD")]
    baud: Option<u32>,

    /// Configuration file path
    #[arg(long, env = "NOTCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "NOTCH_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Execute command and exit
    #[arg(short, long)]
    command: Option<String>,

    /// Print replies as JSON
    #[arg(long)]
    json: bool,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,
}

/// What the prompt loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Done,
    Failed,
    Quit,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let port = args
        .port
        .clone()
        .or(config.port.clone())
        .context("No serial port given; pass --port or set `port` in the config file")?;
    let settings = LinkSettings {
        baud_rate: args.baud.unwrap_or(config.baud_rate),
    };

    let runtime = Runtime::new().context("Failed to start async runtime")?;
    let transport = Transport::with_settings(Arc::new(SerialProvider::new(port.clone())), settings);
    let handler = ProtocolHandler::with_config(transport, config.timeouts);

    info!(port = %port, baud = settings.baud_rate, "Starting NOTCH CLI");

    // Single command mode
    if let Some(cmd) = args.command {
        runtime
            .block_on(handler.open_session())
            .map_err(|e| anyhow!(describe(&e)))?;
        let flow = runtime
            .block_on(execute(&handler, &cmd, args.json))
            .map_err(|e| anyhow!(describe(&e)));
        runtime.block_on(handler.transport().disconnect());
        if flow? == Flow::Failed {
            bail!("Command failed: {}", cmd);
        }
        return Ok(());
    }

    if !args.quiet {
        print_banner(&port);
    }

    spawn_event_printer(&runtime, handler.transport());

    match runtime.block_on(handler.establish()) {
        Ok(snapshot) => print_snapshot(&snapshot, args.json),
        Err(e) => {
            eprintln!("{}", describe(&e).red());
            if e.is_unsupported() {
                return Ok(());
            }
            println!("{}", "Type 'reconnect' to try again.".yellow());
        }
    }

    // Interactive mode
    let mut rl = DefaultEditor::new()?;
    let history_path = home::dir()
        .map(|p| p.join(".notch_history"))
        .unwrap_or_default();

    let _ = rl.load_history(&history_path);

    loop {
        let prompt = format!("{}> ", "notch".green());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match runtime.block_on(execute(&handler, line, args.json)) {
                    Ok(Flow::Quit) => break,
                    Ok(_) => {}
                    Err(e) => eprintln!("{}", describe(&e).red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    runtime.block_on(handler.transport().disconnect());
    Ok(())
}

async fn execute(handler: &ProtocolHandler, line: &str, json: bool) -> Result<Flow, ProtocolError> {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let ok = match word.to_lowercase().as_str() {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => {
            print_help();
            true
        }
        "clear" => {
            print!("\x1B[2J\x1B[1;1H");
            true
        }
        "status" => {
            let transport = handler.transport();
            println!(
                "{} {} @ {} baud",
                "Link:".cyan(),
                transport.state(),
                transport.settings().baud_rate
            );
            true
        }
        "reconnect" => {
            let snapshot = handler.establish().await?;
            println!("{}", "Reconnected.".green());
            print_snapshot(&snapshot, json);
            true
        }
        "ping" => show(&handler.ping().await?, json, |_| println!("{}", "PONG".green())),
        "info" => show(&handler.get_info().await?, json, print_info),
        "settings" => show(&handler.get_settings().await?, json, print_settings),
        "memory" => show(&handler.get_memory().await?, json, print_memory),
        "stats" => show(&handler.get_stats().await?, json, print_stats),
        "menu" => show(&handler.open_menu().await?, json, |_| {
            println!("{}", "Menu opened.".green())
        }),
        "set" => {
            let Some((key, value)) = rest.split_once(char::is_whitespace) else {
                eprintln!("{} set <key> <value>", "Usage:".yellow());
                return Ok(Flow::Failed);
            };
            let reply = handler.update_setting(key, value.trim()).await?;
            show(&reply, json, |_| println!("{}", "OK".green()))
        }
        "raw" => {
            if rest.is_empty() {
                eprintln!("{} raw <line>", "Usage:".yellow());
                return Ok(Flow::Failed);
            }
            show(&handler.send_raw(rest).await?, json, |reply| println!("{}", reply))
        }
        _ => {
            eprintln!(
                "{} unknown command {:?}, type 'help' for commands",
                "Error:".red(),
                word
            );
            false
        }
    };

    Ok(if ok { Flow::Done } else { Flow::Failed })
}

/// Print a reply; returns whether it succeeded
fn show<T: Serialize>(reply: &Reply<T>, json: bool, render: impl FnOnce(&T)) -> bool {
    if json {
        match serde_json::to_string_pretty(reply) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("{} {}", "Error:".red(), e),
        }
        return reply.is_success();
    }

    match reply {
        Reply::Success(payload) => {
            render(payload);
            true
        }
        Reply::Failure(failure) => {
            report_failure(failure);
            false
        }
    }
}

fn report_failure(failure: &Failure) {
    match failure {
        Failure::ConnectionLost(reason) => eprintln!(
            "{} {}. Type 'reconnect' to try again.",
            "Console lost:".red(),
            reason
        ),
        Failure::Timeout(_) => eprintln!("{} {}", "Timeout:".yellow(), failure),
        Failure::Rejected(_) => eprintln!("{}", failure.to_string().red()),
        _ => eprintln!("{} {}", "Error:".red(), failure),
    }
}

/// Operator-facing message for a raised error
fn describe(err: &ProtocolError) -> String {
    match err {
        e if e.is_unsupported() => {
            "Serial ports are not supported on this platform.".to_string()
        }
        ProtocolError::Handshake(failure) => format!(
            "Console did not complete the handshake ({}). Check the port and that the console is switched on.",
            failure
        ),
        ProtocolError::Transport(TransportError::Connection(e)) => {
            format!("Could not open the serial port: {}", e)
        }
        ProtocolError::Transport(TransportError::NotConnected) => {
            "Not connected. Type 'reconnect' to connect.".to_string()
        }
        ProtocolError::Transport(TransportError::Busy) => {
            "Another command is still waiting for its reply.".to_string()
        }
        other => format!("Error: {}", other),
    }
}

fn spawn_event_printer(runtime: &Runtime, transport: &Transport) {
    let mut events = transport.subscribe();
    runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(TransportEvent::Unsolicited(line)) => println!("{} {}", "<<".dimmed(), line),
                Ok(TransportEvent::Disconnected) => println!("{}", "Console disconnected.".yellow()),
                Ok(TransportEvent::Error(e)) if e.is_connection_loss() => eprintln!(
                    "{} {}. Type 'reconnect' to try again.",
                    "Device lost:".red(),
                    e
                ),
                // Everything else is raised to whoever issued the command
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_snapshot(snapshot: &ConsoleSnapshot, json: bool) {
    if json {
        match serde_json::to_string_pretty(snapshot) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("{} {}", "Error:".red(), e),
        }
        return;
    }

    match &snapshot.info {
        Some(info) => print_info(info),
        None => println!("{}", "Console info unavailable".dimmed()),
    }
    if let Some(memory) = &snapshot.memory {
        print_memory(memory);
    }
    if let Some(settings) = &snapshot.settings {
        print_settings(settings);
    }
    if let Some(stats) = &snapshot.stats {
        print_stats(stats);
    }
}

fn print_info(info: &ConsoleInfo) {
    println!("{} {} (firmware {})", "Console:".cyan(), info.model, info.firmware);
    for (key, value) in &info.extra {
        println!("  {}: {}", key, value);
    }
}

fn print_settings(settings: &Settings) {
    println!("{}", "Settings".yellow().bold());
    if settings.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (key, value) in settings.iter() {
        println!("  {} = {}", key, value);
    }
}

fn print_memory(memory: &MemoryInfo) {
    println!(
        "{} sram {} B free, flash {} B, eeprom {} B",
        "Memory:".cyan(),
        memory.sram,
        memory.flash,
        memory.eeprom
    );
}

fn print_stats(stats: &Stats) {
    println!("{}", "Stats".yellow().bold());
    for (key, value) in stats.iter() {
        println!("  {}: {}", key, value);
    }
}

fn print_banner(port: &str) {
    println!(
        "{}",
        format!(
            r#"
  ╔╗╔╔═╗╔╦╗╔═╗╦ ╦    CLI {}
  ║║║║ ║ ║ ║  ╠═╣    Port {}
  ╝╚╝╚═╝ ╩ ╚═╝╩ ╩    Type 'help' for commands, 'quit' to exit
"#,
            env!("CARGO_PKG_VERSION"),
            port
        )
        .cyan()
    );
}

fn print_help() {
    println!(
        r#"
{}

{}
  ping                 Check the console answers
  info                 Model and firmware
  settings             Current settings
  memory               Free SRAM, flash and EEPROM size
  stats                Usage counters
  menu                 Open the on-device menu
  set <key> <value>    Change a setting
  raw <line>           Send a line as-is and show the reply

{}
  status               Link state
  reconnect            Reconnect and handshake again

{}
  help                 Show this help
  clear                Clear screen
  quit/exit            Exit CLI
"#,
        "NOTCH Commands".cyan().bold(),
        "Console".yellow().bold(),
        "Link".yellow().bold(),
        "Local".yellow().bold(),
    );
}

// Minimal home directory lookup for the history file
mod home {
    use std::path::PathBuf;

    pub fn dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
