//! chat-memory: conversation memory command line
//!
//! Usage:
//!   chat-memory history <user> [--json]   - Show stored history, most recent first
//!   chat-memory add <user> <message>      - Append one message
//!   chat-memory reset <user>              - Start a new session (delete history)
//!   chat-memory count <user>              - Show stored message count
//!   chat-memory --cli [--user <id>]       - Interactive REPL
//!   chat-memory --help                    - Show help

mod cli;

use cm_core::{ChatService, Config};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    History { user: String, json: bool },
    Add { user: String, message: String },
    Reset { user: String },
    Count { user: String },
    /// Interactive CLI mode
    Cli { user: String },
    Help,
    Version,
}

const DEFAULT_CLI_USER: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("chat-memory {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log.level))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let service = ChatService::open(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open chat store: {}", e))?;

    let outcome = run(mode, &service).await;

    if let Err(e) = service.shutdown().await {
        tracing::warn!("Error while closing chat store: {}", e);
    }
    outcome
}

async fn run(mode: RunMode, service: &ChatService) -> anyhow::Result<()> {
    match mode {
        RunMode::History { user, json } => {
            if json {
                let messages = service.messages(&user).await?;
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                for line in service.history(&user).await? {
                    println!("{}", line);
                }
            }
        }
        RunMode::Add { user, message } => {
            let added = service.add_message(&user, &message).await?;
            println!("Added message {} at {}", added.message_id, added.timestamp);
        }
        RunMode::Reset { user } => {
            let deleted = service.new_session(&user).await?;
            println!("New session started. Removed {} messages.", deleted);
        }
        RunMode::Count { user } => {
            println!("{}", service.message_count(&user).await?);
        }
        RunMode::Cli { user } => {
            tracing::info!("Running in CLI mode");
            cli::run_cli(service, &user).await?;
        }
        RunMode::Help | RunMode::Version => {}
    }
    Ok(())
}

/// Parse command line arguments (program name excluded)
fn parse_args(args: &[String]) -> anyhow::Result<RunMode> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        [] | ["--help"] | ["-h"] => Ok(RunMode::Help),
        ["--version"] | ["-v"] => Ok(RunMode::Version),
        ["--cli"] | ["-c"] => Ok(RunMode::Cli {
            user: DEFAULT_CLI_USER.to_string(),
        }),
        ["--cli" | "-c", "--user" | "-u", user] => Ok(RunMode::Cli {
            user: user_arg(user)?,
        }),
        ["history", user] => Ok(RunMode::History {
            user: user_arg(user)?,
            json: false,
        }),
        ["history", user, "--json"] => Ok(RunMode::History {
            user: user_arg(user)?,
            json: true,
        }),
        ["add", user, message @ ..] if !message.is_empty() => Ok(RunMode::Add {
            user: user_arg(user)?,
            message: message.join(" "),
        }),
        ["reset", user] => Ok(RunMode::Reset {
            user: user_arg(user)?,
        }),
        ["count", user] => Ok(RunMode::Count {
            user: user_arg(user)?,
        }),
        _ => anyhow::bail!("Invalid arguments: {}. Run with --help for usage.", args.join(" ")),
    }
}

fn user_arg(raw: &str) -> anyhow::Result<String> {
    cm_core::normalize_user_id(raw)
        .ok_or_else(|| anyhow::anyhow!("User id '{}' has no letters or digits", raw))
}

/// Print help message
fn print_help() {
    println!("chat-memory - retention-bounded conversation memory");
    println!();
    println!("Usage:");
    println!("  chat-memory history <user> [--json]  Show history, most recent first");
    println!("  chat-memory add <user> <message>     Append one message");
    println!("  chat-memory reset <user>             Start a new session");
    println!("  chat-memory count <user>             Show stored message count");
    println!("  chat-memory --cli [--user <id>]      Interactive mode");
    println!("  chat-memory --help                   Show this help message");
    println!("  chat-memory --version                Show version");
    println!();
    println!("Configuration: chat-memory.toml (+ chat-memory.<APP_PROFILE>.toml)");
    println!();
    println!("Environment Variables:");
    println!("  APP_PROFILE             Config profile overlay");
    println!("  CHAT_MEMORY_DIR         Data directory (default: data)");
    println!("  CHAT_MEMORY_DB_FILE     Database file stem (default: chat_messages)");
    println!("  CHAT_MEMORY_DB_PATH     Full database path");
    println!("  CHAT_MEMORY_RETENTION   Messages kept per user (default: 5)");
    println!("  CHAT_MEMORY_LOG_LEVEL   Log level when RUST_LOG is unset (default: info)");
}
