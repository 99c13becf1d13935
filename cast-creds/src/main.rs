//! cast-creds - Platform account management for Castline
//!
//! Stores, lists and deactivates the per-user platform tokens that the
//! publishing worker uses. Token values are written but never printed.

use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libcastline::scheduling::parse_schedule;
use libcastline::{CastError, CastlineService, NewCredential, PlatformId};
use tracing::debug;

#[derive(Parser)]
#[command(name = "cast-creds")]
#[command(version)]
#[command(about = "Manage Castline platform credentials")]
#[command(long_about = "\
cast-creds - Manage Castline platform credentials

DESCRIPTION:
    Each owner has at most one active credential per platform. A post can
    only be created or scheduled for platforms where its owner has one.

USAGE EXAMPLES:
    cast-creds set alice twitter --token \"$TWITTER_TOKEN\"
    echo \"$IG_TOKEN\" | cast-creds set alice instagram --stdin --account-id 1784
    cast-creds list alice --format json
    cast-creds deactivate alice linkedin

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input or credential not found
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store (or replace) the credential for a platform and activate it
    Set {
        /// Owner the credential belongs to
        user: String,

        /// Platform name (twitter, linkedin, instagram)
        platform: String,

        /// Access token
        #[arg(long, conflicts_with = "stdin")]
        token: Option<String>,

        /// Read the access token from stdin (for automation)
        #[arg(long)]
        stdin: bool,

        /// Refresh token, if the platform issued one
        #[arg(long)]
        refresh_token: Option<String>,

        /// When the access token expires (e.g. "60d", "2026-12-31T00:00:00Z")
        #[arg(long, value_name = "WHEN")]
        expires_at: Option<String>,

        /// Platform-side account id (Instagram business account, LinkedIn member)
        #[arg(long)]
        account_id: Option<String>,
    },

    /// Deactivate a stored credential without deleting it
    Deactivate {
        user: String,
        platform: String,
    },

    /// List a user's credentials (without token values)
    List {
        user: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libcastline::logging::init_from_env(cli.verbose, "warn");

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<CastError>()
        .map(CastError::exit_code)
        .unwrap_or(1)
}

async fn run(command: Commands) -> Result<()> {
    let service = CastlineService::new().await?;
    let result = run_command(&service, command).await;
    service.close().await;
    result
}

async fn run_command(service: &CastlineService, command: Commands) -> Result<()> {
    match command {
        Commands::Set {
            user,
            platform,
            token,
            stdin,
            refresh_token,
            expires_at,
            account_id,
        } => {
            let platform: PlatformId = platform.parse()?;
            let token = read_token(token, stdin)?;
            let expires_at = expires_at
                .as_deref()
                .map(parse_schedule)
                .transpose()?
                .map(|at| at.timestamp());

            service
                .credentials()
                .upsert_credential(NewCredential {
                    user_id: user.clone(),
                    platform,
                    access_token: token,
                    refresh_token,
                    expires_at,
                    external_account_id: account_id,
                })
                .await?;
            debug!(user = %user, platform = %platform, "Credential stored");
            println!("Stored {} credential for {}", platform, user);
            Ok(())
        }
        Commands::Deactivate { user, platform } => {
            let platform: PlatformId = platform.parse()?;
            if !service
                .credentials()
                .deactivate_credential(&user, platform)
                .await?
            {
                return Err(CastError::NotFound(format!(
                    "no {} credential stored for {}",
                    platform, user
                ))
                .into());
            }
            println!("Deactivated {} credential for {}", platform, user);
            Ok(())
        }
        Commands::List { user, format } => {
            let credentials = service.credentials().list_credentials(&user).await?;
            match format.as_str() {
                "json" => {
                    println!("{}", serde_json::to_string_pretty(&credentials)?);
                }
                "text" => {
                    for c in &credentials {
                        let expires = c
                            .expires_at
                            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                            .map(|dt| dt.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string());
                        println!(
                            "{:<10} {:<8} expires {} account {}",
                            c.platform.as_str(),
                            if c.active { "active" } else { "inactive" },
                            expires,
                            c.external_account_id.as_deref().unwrap_or("-")
                        );
                    }
                }
                other => {
                    return Err(CastError::Validation(format!(
                        "Invalid format '{}'. Must be 'text' or 'json'",
                        other
                    ))
                    .into());
                }
            }
            Ok(())
        }
    }
}

/// Token from --token, else from stdin when --stdin is given
fn read_token(token: Option<String>, use_stdin: bool) -> Result<String> {
    let token = match token {
        Some(token) => token,
        None if use_stdin => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read token from stdin")?;
            buffer
        }
        None => {
            return Err(CastError::Validation(
                "Provide the token with --token or --stdin".to_string(),
            )
            .into())
        }
    };

    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(CastError::Validation("Token must not be empty".to_string()).into());
    }
    Ok(token)
}
