//! Command-line interface for fieldsync.
//!
//! This module provides the CLI structure for the `fieldsync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, FormsCommand, OutputFormat, PendingCommand, SessionCommand, StatusCommand,
    SubmitCommand,
};

use crate::logging::Verbosity;

/// fieldsync - Collect form data offline, sync it when online
///
/// Renders forms from JSON definitions, keeps submissions in a local queue
/// and posts them in batches to a remote endpoint.
#[derive(Debug, Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for info, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Behave as if the network is unavailable
    #[arg(long, global = true)]
    pub offline: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Browse the form catalog
    #[command(subcommand)]
    Forms(FormsCommand),

    /// Fill in and submit a form
    Submit(SubmitCommand),

    /// Inspect and manage queued submissions
    #[command(subcommand)]
    Pending(PendingCommand),

    /// Sync every queued submission
    Sync,

    /// Show queue, endpoint and session status
    Status(StatusCommand),

    /// Manage the stored user identity
    #[command(subcommand)]
    Session(SessionCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }

    /// Whether the network should be treated as available.
    #[must_use]
    pub fn online(&self) -> bool {
        !self.offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "fieldsync");
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["fieldsync", "-vv", "--offline", "-c", "/tmp/f.toml", "sync"]);
        assert_eq!(cli.verbosity(), Verbosity::Trace);
        assert!(!cli.online());
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/f.toml")));
        assert!(matches!(cli.command, Command::Sync));
    }

    #[test]
    fn test_quiet_wins() {
        let cli = parse(&["fieldsync", "-q", "-v", "status"]);
        assert_eq!(cli.verbosity(), Verbosity::Quiet);
        assert!(cli.online());
    }

    #[test]
    fn test_parse_submit() {
        let cli = parse(&[
            "fieldsync",
            "submit",
            "health",
            "--set",
            "patientId=abc",
            "-s",
            "notes=",
            "--save-offline",
        ]);
        let Command::Submit(cmd) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(cmd.form, "health");
        assert!(cmd.save_offline);
        assert_eq!(
            cmd.values,
            vec![
                ("patientId".to_string(), "abc".to_string()),
                ("notes".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_submit_rejects_bad_assignment() {
        assert!(Cli::try_parse_from(["fieldsync", "submit", "health", "--set", "oops"]).is_err());
    }

    #[test]
    fn test_parse_pending_delete() {
        let cli = parse(&["fieldsync", "pending", "delete", "sub-1-a", "--yes"]);
        assert!(matches!(
            cli.command,
            Command::Pending(PendingCommand::Delete { yes: true, .. })
        ));
    }

    #[test]
    fn test_parse_forms_list_json() {
        let cli = parse(&["fieldsync", "forms", "list", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Forms(FormsCommand::List {
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn test_parse_forms_show_key_optional() {
        let cli = parse(&["fieldsync", "forms", "show"]);
        assert!(matches!(
            cli.command,
            Command::Forms(FormsCommand::Show { key: None, .. })
        ));

        let cli = parse(&["fieldsync", "forms", "show", "health"]);
        let Command::Forms(FormsCommand::Show { key, .. }) = cli.command else {
            panic!("expected forms show");
        };
        assert_eq!(key.as_deref(), Some("health"));
    }

    #[test]
    fn test_parse_session_set() {
        let cli = parse(&["fieldsync", "session", "set", "u42", "--name", "Amina"]);
        let Command::Session(SessionCommand::Set { user, role, name }) = cli.command else {
            panic!("expected session set");
        };
        assert_eq!(user, "u42");
        assert!(role.is_none());
        assert_eq!(name.as_deref(), Some("Amina"));
    }
}
