//! mail-gmail-cli: read, search, send, and organize Gmail from the terminal
//!
//! Authorizes with the OAuth2 authorization-code flow over a loopback
//! callback, keeps the token fresh on disk, and renders provider message
//! payloads as plain text or JSON.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, logging, and exit codes
//! - [`cli`]: `clap` command definitions
//! - [`commands`]: Command orchestration and output envelopes
//! - [`config`]: Environment-driven configuration
//! - [`errors`]: Application error model with hints and exit codes
//! - [`credentials`]: OAuth client credential bundle
//! - [`token`]: Token record and owner-only token file
//! - [`oauth`]: Authorization URL, code exchange, refresh
//! - [`callback`]: Loopback callback listener with CSRF check
//! - [`authorizer`]: Interactive flow and refresh-on-demand
//! - [`gmail`]: Authenticated mail REST client
//! - [`query`]: Search operator assembly
//! - [`compose`]: Outgoing RFC 2822 messages
//! - [`mime`]: Payload decoding and HTML flattening
//! - [`format`]: Text rendering helpers
//! - [`models`]: Provider wire types and output DTOs

mod authorizer;
mod callback;
mod cli;
mod commands;
mod compose;
mod config;
mod credentials;
mod errors;
mod format;
mod gmail;
mod mime;
mod models;
mod oauth;
mod query;
mod token;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::AppConfig;
use errors::AppResult;

/// Application entry point
///
/// Logs go to stderr (`RUST_LOG` controls verbosity) so stdout carries only
/// command output, which is written once the command has fully succeeded.
///
/// # Environment Variables
///
/// See [`AppConfig::load_from_env`] for full configuration options.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> AppResult<String> {
    let config = AppConfig::load_from_env()?;
    commands::run(cli, config).await
}
