//! Main entry point for the Gramline CLI client.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::error::Error;

use client::commands::{chat, history, inbox};

/// Gramline command-line client
#[derive(Parser)]
#[command(name = "gramline")]
#[command(about = "Command-line client for the Gramline inbox", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the workspace's conversations
    Inbox(inbox::InboxArgs),
    /// Print a conversation's history
    History(history::HistoryArgs),
    /// Chat in a conversation with live updates
    Chat(chat::ChatArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inbox(args) => inbox::handle_inbox(args).await?,
        Commands::History(args) => history::handle_history(args).await?,
        Commands::Chat(args) => chat::handle_chat(args).await?,
    }

    Ok(())
}
