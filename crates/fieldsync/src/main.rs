//! `fieldsync` - CLI for the offline-first form client
//!
//! Drives the controller from the command line: fill in forms, manage the
//! pending queue and sync it to the configured endpoint.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::collections::HashMap;

use anyhow::{bail, Context};
use clap::Parser;

use fieldsync::cli::{
    Cli, Command, ConfigCommand, FormsCommand, OutputFormat, PendingCommand, SessionCommand,
};
use fieldsync::{init_logging, Config, Controller, Event, FormView, Notice, NoticeLevel, View};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    if let Command::Config(config_cmd) = cli.command {
        return handle_config(cli.config, config_cmd);
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;
    let online = cli.online();

    match cli.command {
        Command::Forms(FormsCommand::List { format }) => list_forms(&config, format),
        Command::Forms(FormsCommand::Show { key, format }) => {
            let mut controller = open(&config, online)?;
            let restoring = key.is_none();
            let notices = match key {
                Some(key) => controller.handle(Event::Navigate(key)).await?,
                None => controller.startup().await?,
            };
            print_notices(&notices);
            match controller.form() {
                Some(form) => print_form(form, format),
                None if restoring => bail!("no form key given and no last active form to restore"),
                None => bail!("form could not be loaded"),
            }
        }
        Command::Submit(cmd) => {
            let mut controller = open(&config, online)?;
            let notices = controller.handle(Event::Navigate(cmd.form)).await?;
            print_notices(&notices);
            if controller.form().is_none() {
                bail!("form could not be loaded");
            }
            let notices = controller
                .handle(Event::Submit {
                    values: into_map(cmd.values),
                    save_offline: cmd.save_offline,
                })
                .await?;
            finish(&notices)
        }
        Command::Pending(cmd) => handle_pending(&config, online, cmd).await,
        Command::Sync => {
            let mut controller = open(&config, online)?;
            let notices = controller.handle(Event::SyncAll).await?;
            finish(&notices)
        }
        Command::Status(status_cmd) => handle_status(&config, online, status_cmd.json),
        Command::Session(cmd) => handle_session(&config, online, cmd),
        Command::Config(_) => Ok(()),
    }
}

fn open(config: &Config, online: bool) -> anyhow::Result<Controller> {
    Controller::from_config(config, online).with_context(|| {
        format!(
            "opening local store at {}",
            config.database_path().display()
        )
    })
}

fn into_map(values: Vec<(String, String)>) -> HashMap<String, String> {
    values.into_iter().collect()
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        println!("{notice}");
    }
}

/// Print notices and fail if any of them is an error.
fn finish(notices: &[Notice]) -> anyhow::Result<()> {
    print_notices(notices);
    if notices.iter().any(|n| n.level == NoticeLevel::Error) {
        bail!("operation did not complete");
    }
    Ok(())
}

fn list_forms(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config.forms.catalog)?);
        }
        OutputFormat::Table => {
            println!("{:<18} {:<24} FILE", "KEY", "TITLE");
            for entry in &config.forms.catalog {
                println!("{:<18} {:<24} {}", entry.key, entry.title, entry.file);
            }
        }
    }
    Ok(())
}

fn print_form(form: &FormView, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(form)?),
        OutputFormat::Table => {
            println!("{}", form.heading);
            println!();
            for field in &form.fields {
                let flags = if field.readonly { " (read-only)" } else { "" };
                println!(
                    "  {:<20} {:<10} {}{}",
                    field.label,
                    field.kind.to_string(),
                    field.value,
                    flags
                );
                if let fieldsync::form::Widget::Select { options } = &field.widget {
                    let choices: Vec<&str> = options
                        .iter()
                        .filter(|o| !o.value.is_empty())
                        .map(|o| o.value.as_str())
                        .collect();
                    println!("  {:<20} {:<10} [{}]", "", "", choices.join(", "));
                }
            }
        }
    }
    Ok(())
}

async fn handle_pending(config: &Config, online: bool, cmd: PendingCommand) -> anyhow::Result<()> {
    let mut controller = open(config, online)?;

    match cmd {
        PendingCommand::List { format } => {
            let list = controller.pending_list();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list)?),
                OutputFormat::Table => {
                    println!("{}", list.heading);
                    if list.items.is_empty() {
                        println!("No pending submissions found.");
                    }
                    for item in &list.items {
                        println!(
                            "  {}  {} - {}  (saved {})",
                            item.id,
                            item.title,
                            item.label,
                            item.saved_local()
                        );
                    }
                }
            }
            Ok(())
        }
        PendingCommand::Show { id } => {
            let record = controller.queue().lock().get(&id).cloned();
            match record {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(())
                }
                None => bail!("no pending submission with id '{id}'"),
            }
        }
        PendingCommand::Edit {
            id,
            values,
            save_offline,
        } => {
            let notices = controller.handle(Event::Edit(id)).await?;
            print_notices(&notices);
            if !matches!(controller.view(), View::Form { .. }) {
                bail!("submission could not be opened for editing");
            }
            let notices = controller
                .handle(Event::Submit {
                    values: into_map(values),
                    save_offline,
                })
                .await?;
            finish(&notices)
        }
        PendingCommand::Delete { id, yes } => {
            if !yes {
                println!("Deleting a pending submission cannot be undone. Use --yes to confirm.");
            }
            let notices = controller
                .handle(Event::Delete { id, confirmed: yes })
                .await?;
            finish(&notices)
        }
    }
}

fn handle_status(config: &Config, online: bool, json: bool) -> anyhow::Result<()> {
    let controller = open(config, online)?;
    let session = controller.session().info()?;
    let pending = controller.pending_count();
    let endpoint = controller.sync_engine().endpoint().map(str::to_string);
    let stats = controller.store().stats()?;

    if json {
        let status = serde_json::json!({
            "online": online,
            "pending": pending,
            "endpoint": endpoint,
            "database_path": config.database_path(),
            "database_size_bytes": stats.db_size_bytes,
            "stored_keys": stats.total_keys,
            "session": session,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("fieldsync status");
        println!("----------------");
        println!("Network:       {}", if online { "online" } else { "offline" });
        println!("Pending:       {pending}");
        println!(
            "Endpoint:      {}",
            endpoint.as_deref().unwrap_or("(not configured)")
        );
        println!(
            "Database:      {} ({} bytes, {} keys)",
            config.database_path().display(),
            stats.db_size_bytes,
            stats.total_keys
        );
        println!(
            "User:          {}",
            session
                .user_name_display
                .as_deref()
                .or(session.logged_in_user.as_deref())
                .unwrap_or("(not logged in)")
        );
    }
    Ok(())
}

fn handle_session(config: &Config, online: bool, cmd: SessionCommand) -> anyhow::Result<()> {
    let controller = open(config, online)?;
    let session = controller.session();

    match cmd {
        SessionCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&session.info()?)?);
        }
        SessionCommand::Set { user, role, name } => {
            session.set(&user, role.as_deref(), name.as_deref())?;
            println!("Session set for {user}.");
        }
        SessionCommand::Clear => {
            session.clear()?;
            println!("Session cleared.");
        }
    }
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Sync]");
                println!(
                    "  Endpoint:           {}",
                    config.endpoint().unwrap_or("(not configured)")
                );
                println!();
                println!("[Forms]");
                println!("  Base directory:     {}", config.forms_dir().display());
                println!("  Catalog entries:    {}", config.forms.catalog.len());
                println!();
                println!("[Notices]");
                for level in [
                    NoticeLevel::Info,
                    NoticeLevel::Success,
                    NoticeLevel::Warning,
                    NoticeLevel::Error,
                ] {
                    println!(
                        "  {:<20}{:?}",
                        format!("{level}:"),
                        config.notice_duration(level)
                    );
                }
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                path.unwrap_or_else(Config::default_config_path).display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
