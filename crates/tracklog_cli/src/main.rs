//! Tracklog CLI
//!
//! Operator tools for the tracklog workout tracker.
//!
//! # Commands
//!
//! - `token issue|verify|refresh` - Work with signed identity tokens
//! - `user new` - Generate a user id
//! - `check-config` - Validate the server environment
//! - `inspect` - Summarize a file-backed data directory
//!
//! Token commands read the signing secret from `TRACKLOG_TOKEN_SECRET` and
//! refuse to run without a usable one.

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracklog_server::ServerConfig;

/// Tracklog command-line tools.
#[derive(Parser)]
#[command(name = "tracklog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value = "text")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue, verify or refresh identity tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Manage user identifiers
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Validate the configuration read from the environment
    CheckConfig,

    /// Summarize a file-backed data directory
    Inspect {
        /// Path to the data directory
        #[arg(short, long)]
        path: PathBuf,

        /// Only show this user's documents, with contents
        #[arg(short, long)]
        user: Option<String>,

        /// List every document
        #[arg(short, long)]
        documents: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a token
    Issue {
        /// User id; a new one is generated when omitted
        #[arg(short, long)]
        user: Option<String>,

        /// Lifetime in days (defaults to the configured TTL)
        #[arg(long)]
        ttl_days: Option<u64>,
    },

    /// Verify a token and print its identity
    Verify {
        /// The token
        token: String,
    },

    /// Exchange a valid token for a new one
    Refresh {
        /// The token
        token: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Generate a new user id
    New,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Token { action } => {
            let config = ServerConfig::from_env()?;
            match action {
                TokenAction::Issue { user, ttl_days } => {
                    let ttl = commands::token::ttl_arg(ttl_days)?;
                    commands::token::issue(&config, user.as_deref(), ttl, cli.format)?;
                }
                TokenAction::Verify { token } => {
                    commands::token::verify(&config, &token, cli.format)?;
                }
                TokenAction::Refresh { token } => {
                    commands::token::refresh(&config, &token, cli.format)?;
                }
            }
        }
        Commands::User {
            action: UserAction::New,
        } => {
            println!("{}", tracklog_core::UserId::generate());
        }
        Commands::CheckConfig => {
            let config = ServerConfig::from_env()?;
            commands::config::run(&config, cli.format)?;
        }
        Commands::Inspect {
            path,
            user,
            documents,
        } => {
            commands::inspect::run(&path, user.as_deref(), documents, cli.format)?;
        }
        Commands::Version => {
            println!("tracklog CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
