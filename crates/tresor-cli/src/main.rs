// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tresor: key management, file encryption and audit log tooling.
//
// Entry point. Initialises logging, loads the configuration and dispatches
// to the command handlers. Diagnostics go to stderr, results to stdout.

mod commands;
mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tresor_audit::LogQuery;
use tresor_core::error::Result;
use tresor_core::types::{AuditLevel, EncryptionAlgorithm};

use commands::keys::KeyKind;
use services::Services;

/// Tresor - encrypted storage and tamper-evident audit logs
#[derive(Parser)]
#[command(name = "tresor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to <data dir>/config.json)
    #[arg(short, long, global = true, env = "TRESOR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(long, global = true, env = "TRESOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage symmetric keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Encrypt a file into the chunked container format
    Encrypt {
        input: PathBuf,
        output: PathBuf,

        /// aes-gcm or aes-cbc (defaults to the configured algorithm)
        #[arg(short, long)]
        algorithm: Option<EncryptionAlgorithm>,

        /// Encrypt directly under the active key instead of a per-file key
        #[arg(long)]
        no_envelope: bool,

        /// Plaintext bytes per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Decrypt a file produced by `encrypt`
    Decrypt { input: PathBuf, output: PathBuf },

    /// Write, query and verify audit logs
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// List key metadata
    List,
    /// Generate a key without activating it
    Generate {
        #[arg(long, value_enum, default_value = "data")]
        kind: KeyKind,
    },
    /// Replace the active key
    Rotate,
    /// Delete an inactive key
    Delete { id: String },
    /// Report whether the rotation policy is due, rotating with --apply
    Check {
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Record an event
    Log {
        #[arg(long, default_value = "info")]
        level: AuditLevel,
        #[arg(long)]
        event_type: String,
        message: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        resource: Option<String>,
        /// Extra JSON attached to the event
        #[arg(long)]
        details: Option<Value>,
    },
    /// Print stored events as JSON lines, newest first
    Query {
        /// RFC 3339 lower bound (inclusive)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound (inclusive)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        level: Option<AuditLevel>,
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        resource: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Verify the persisted hash chain
    Verify,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut services = Services::init(cli.config.as_deref(), cli.data_dir)?;

    // `false` when the command ran but reports a negative outcome.
    let succeeded = match cli.command {
        Commands::Keys { command } => match command {
            KeyCommands::List => {
                commands::keys::list(&services)?;
                true
            }
            KeyCommands::Generate { kind } => {
                commands::keys::generate(&mut services, kind)?;
                true
            }
            KeyCommands::Rotate => {
                commands::keys::rotate(&mut services)?;
                true
            }
            KeyCommands::Delete { id } => commands::keys::delete(&mut services, &id)?,
            KeyCommands::Check { apply } => {
                commands::keys::check(&mut services, apply)?;
                true
            }
        },
        Commands::Encrypt {
            input,
            output,
            algorithm,
            no_envelope,
            chunk_size,
        } => {
            let options = commands::files::options(algorithm, !no_envelope, chunk_size);
            commands::files::encrypt(&mut services, &input, &output, &options)?;
            true
        }
        Commands::Decrypt { input, output } => {
            commands::files::decrypt(&mut services, &input, &output)?;
            true
        }
        Commands::Audit { command } => match command {
            AuditCommands::Log {
                level,
                event_type,
                message,
                user,
                resource,
                details,
            } => {
                commands::audit::log(
                    &mut services,
                    level,
                    &event_type,
                    &message,
                    user.as_deref(),
                    resource.as_deref(),
                    details,
                )?;
                true
            }
            AuditCommands::Query {
                since,
                until,
                level,
                event_type,
                user,
                resource,
                limit,
            } => {
                let mut query = LogQuery::new();
                query.start = since;
                query.end = until;
                query.level = level;
                query.event_type = event_type;
                query.user_id = user;
                query.resource = resource;
                query.max_entries = limit;
                commands::audit::query(&mut services, &query)?;
                true
            }
            AuditCommands::Verify => commands::audit::verify(&mut services)?,
        },
    };

    services.shutdown()?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
