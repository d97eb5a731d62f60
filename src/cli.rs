//! Command-line surface
//!
//! Flags map one-to-one onto command inputs; validation beyond what `clap`
//! checks lives with the command implementations.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Read, search, send, and organize mail from the terminal
#[derive(Debug, Parser)]
#[command(name = "mail-gmail-cli", version, about)]
pub struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the saved authorization
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// List recent messages
    List(ListArgs),
    /// Search messages with structured filters
    Search(SearchArgs),
    /// Show one message or its whole thread
    Get(GetArgs),
    /// Send a message or save it as a draft
    Send(SendArgs),
    /// Change labels, read state, or trash state of a message
    Modify(ModifyArgs),
    /// List labels
    Labels,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum AuthAction {
    /// Authorize in the browser and save the token
    Login,
    /// Show the saved token state
    Status,
    /// Delete the saved token
    Logout,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Maximum messages to show
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max: u32,
    /// Label name or id (defaults to the inbox)
    #[arg(long)]
    pub label: Option<String>,
    /// Only unread messages
    #[arg(long)]
    pub unread: bool,
    /// Continue from a previous page
    #[arg(long)]
    pub page_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Free-text query, search operators allowed
    pub query: Option<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub unread: bool,
    #[arg(long)]
    pub has_attachment: bool,
    /// On or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub after: Option<String>,
    /// Before this date (YYYY-MM-DD)
    #[arg(long)]
    pub before: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
    /// Minimum size, e.g. 500K or 5M
    #[arg(long)]
    pub larger: Option<String>,
    /// Maximum size, e.g. 500K or 5M
    #[arg(long)]
    pub smaller: Option<String>,
    /// Attachment filename or extension
    #[arg(long)]
    pub filename: Option<String>,
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max: u32,
    #[arg(long)]
    pub page_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Message id
    pub id: String,
    /// Show every message in the thread
    #[arg(long)]
    pub thread: bool,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Recipient; repeat for several
    #[arg(long, required = true)]
    pub to: Vec<String>,
    #[arg(long)]
    pub cc: Vec<String>,
    #[arg(long)]
    pub bcc: Vec<String>,
    /// Subject; defaults to `Re: <original>` with --reply-to
    #[arg(long)]
    pub subject: Option<String>,
    /// Plain-text body
    #[arg(long)]
    pub body: String,
    /// Id of the message being answered
    #[arg(long)]
    pub reply_to: Option<String>,
    /// Save as a draft instead of sending
    #[arg(long)]
    pub draft: bool,
}

#[derive(Debug, Args)]
pub struct ModifyArgs {
    /// Message id
    pub id: String,
    /// Label name or id to add; repeatable
    #[arg(long)]
    pub add_label: Vec<String>,
    /// Label name or id to remove; repeatable
    #[arg(long)]
    pub remove_label: Vec<String>,
    #[arg(long, conflicts_with = "mark_unread")]
    pub mark_read: bool,
    #[arg(long)]
    pub mark_unread: bool,
    #[arg(long, conflicts_with = "unstar")]
    pub star: bool,
    #[arg(long)]
    pub unstar: bool,
    /// Remove from the inbox
    #[arg(long)]
    pub archive: bool,
    #[arg(long, conflicts_with = "untrash")]
    pub trash: bool,
    #[arg(long)]
    pub untrash: bool,
}
