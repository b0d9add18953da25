//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Form catalog commands.
#[derive(Debug, Subcommand)]
pub enum FormsCommand {
    /// List the forms in the catalog
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Load a form and show its blank rendering
    Show {
        /// Catalog key of the form; defaults to the last form opened
        key: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

/// Submit command arguments.
#[derive(Debug, Args)]
pub struct SubmitCommand {
    /// Catalog key of the form
    pub form: String,

    /// Field value, repeatable
    #[arg(short = 's', long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
    pub values: Vec<(String, String)>,

    /// Keep the record locally instead of submitting it
    #[arg(long)]
    pub save_offline: bool,
}

/// Pending submission commands.
#[derive(Debug, Subcommand)]
pub enum PendingCommand {
    /// List queued submissions
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one queued submission as JSON
    Show {
        /// Submission id
        id: String,
    },

    /// Change fields of a queued submission
    Edit {
        /// Submission id
        id: String,

        /// New field value, repeatable
        #[arg(short = 's', long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
        values: Vec<(String, String)>,

        /// Keep the record locally instead of submitting it
        #[arg(long)]
        save_offline: bool,
    },

    /// Delete a queued submission
    Delete {
        /// Submission id
        id: String,

        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Session commands.
#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Show the stored identity
    Show,

    /// Store an identity
    Set {
        /// User id
        user: String,

        /// Role
        #[arg(long)]
        role: Option<String>,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove the stored identity
    Clear,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration file
    Validate {
        /// Path to config file (uses default if not specified)
        file: Option<PathBuf>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text
    #[default]
    Table,
    /// JSON
    Json,
}

/// Parse a `FIELD=VALUE` argument. The value may be empty or contain `=`.
fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got '{raw}'")),
    }
}
