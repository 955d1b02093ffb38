//! opsdesk CLI — the main entry point.
//!
//! Commands:
//! - `ask`      — Answer one question for a user
//! - `chat`     — Interactive session for one user
//! - `history`  — Print a user's stored conversation
//! - `status`   — Show configuration and model tiers
//! - `onboard`  — Write a default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "opsdesk",
    about = "opsdesk — role-aware assistant over incidents, tickets and datasets",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Onboard,

    /// Answer a single question
    Ask {
        /// Authenticated user id
        #[arg(short, long, env = "OPSDESK_USER")]
        user: String,

        /// Role of the user (admin, security_analyst, it_support, data_analyst, viewer)
        #[arg(short, long, env = "OPSDESK_ROLE")]
        role: String,

        /// Context mode (full or minimal)
        #[arg(short, long)]
        mode: Option<String>,

        /// Data snapshot (JSON); defaults to ~/.opsdesk/data.json
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Answer from local rules only
        #[arg(long)]
        offline: bool,

        /// The question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Interactive session
    Chat {
        #[arg(short, long, env = "OPSDESK_USER")]
        user: String,

        #[arg(short, long, env = "OPSDESK_ROLE")]
        role: String,

        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Print a user's conversation history
    History {
        #[arg(short, long, env = "OPSDESK_USER")]
        user: String,

        /// Only the last N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show configuration and model tiers
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Ask {
            user,
            role,
            mode,
            data,
            offline,
            question,
        } => {
            let request = commands::ask::AskArgs {
                user,
                role,
                mode,
                data,
                offline,
                question: question.join(" "),
            };
            commands::ask::run(request).await?
        }
        Commands::Chat { user, role, data } => commands::chat::run(user, role, data).await?,
        Commands::History { user, limit } => commands::history::run(user, limit).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
