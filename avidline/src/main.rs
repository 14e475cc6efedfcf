#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use avidbase::types::{CreateUser, Identity, Patch, UpdateUser, UserData};
use avidbase::{AvidbaseClient, Environment, Error as AvidbaseError};
use avidconfig::AvidConfig;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use colored::{Color, Colorize};
use std::fmt::Write;
use std::io::{self, IsTerminal, Write as _};
use std::process;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing_subscriber::EnvFilter;
mod backup;
mod edit;

#[derive(Parser)]
#[command(name = "avidline", about = "A CLI for the Avidbase identity API")]
struct Cli {
    /// Use this environment instead of the configured one (production/development)
    #[arg(long, global = true)]
    environment: Option<Environment>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in as an end user and show their permissions
    Login {
        /// Email address or username
        identifier: String,
    },
    /// List all users
    List,
    /// Show a single user as JSON
    Show {
        /// The user id
        id: String,
    },
    /// Create a user
    Create {
        #[command(flatten)]
        fields: UserFields,
    },
    /// Update selected fields of a user
    Update {
        /// The user id
        id: String,
        #[command(flatten)]
        fields: UserFields,
        /// Clear a field (repeatable)
        #[arg(long, value_enum)]
        clear: Vec<ClearableField>,
    },
    /// Edit a user's fields in $EDITOR
    Edit {
        /// The user id
        id: String,
    },
    /// Backup all users to a JSON file
    Backup {
        /// Output file name
        #[arg(default_value = "avidbase-users.json")]
        filename: String,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions {
        /// The shell to generate completions for
        shell: Shell,
    },
    /// List user ids (for shell completion)
    #[command(hide = true)]
    ListIds,
}

#[derive(Args)]
struct UserFields {
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// Read the password from the first line of stdin
    #[arg(long)]
    password_stdin: bool,
    /// Data entry; the value is parsed as JSON and falls back to a string
    #[arg(long = "data", value_name = "KEY=VALUE", value_parser = parse_data_entry)]
    data: Vec<(String, serde_json::Value)>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClearableField {
    FirstName,
    LastName,
    Username,
    Email,
    Data,
}

fn parse_data_entry(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), edit::parse_data_value(value)))
}

fn data_map(entries: Vec<(String, serde_json::Value)>) -> Option<UserData> {
    if entries.is_empty() {
        None
    } else {
        Some(entries.into_iter().collect())
    }
}

fn read_password() -> Result<String> {
    if io::stdin().is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut password = String::new();
    io::stdin()
        .read_line(&mut password)
        .with_context(|| "Failed to read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(anyhow::anyhow!("Password must not be empty"));
    }
    Ok(password)
}

impl UserFields {
    fn into_create(self) -> Result<CreateUser> {
        let password = if self.password_stdin {
            Some(read_password()?)
        } else {
            None
        };
        Ok(CreateUser {
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            email: self.email,
            password,
            data: data_map(self.data),
        })
    }

    fn into_update(self, clear: &[ClearableField]) -> Result<UpdateUser> {
        let patch = |value: Option<String>, field: ClearableField| -> Result<Patch<String>> {
            match (value, clear.contains(&field)) {
                (Some(_), true) => {
                    let name = field
                        .to_possible_value()
                        .map_or_else(String::new, |v| v.get_name().to_string());
                    Err(anyhow::anyhow!("Cannot both set and clear --{name}"))
                }
                (Some(value), false) => Ok(Patch::Set(value)),
                (None, true) => Ok(Patch::Clear),
                (None, false) => Ok(Patch::Unchanged),
            }
        };

        let mut update = UpdateUser {
            first_name: patch(self.first_name, ClearableField::FirstName)?,
            last_name: patch(self.last_name, ClearableField::LastName)?,
            username: patch(self.username, ClearableField::Username)?,
            email: patch(self.email, ClearableField::Email)?,
            ..UpdateUser::default()
        };
        update.data = match (data_map(self.data), clear.contains(&ClearableField::Data)) {
            (Some(_), true) => return Err(anyhow::anyhow!("Cannot both set and clear --data")),
            (Some(data), false) => Patch::Set(data),
            (None, true) => Patch::Clear,
            (None, false) => Patch::Unchanged,
        };
        if self.password_stdin {
            update.password = Patch::Set(read_password()?);
        }
        Ok(update)
    }
}

fn created_date(user: &Identity) -> String {
    const DATE: &[time::format_description::FormatItem<'_>] =
        format_description!("[year]-[month]-[day]");
    user.created_at
        .map(|created| {
            let local = UtcOffset::current_local_offset()
                .map_or(created, |offset| created.to_offset(offset));
            local.format(DATE).unwrap_or_default()
        })
        .unwrap_or_default()
}

fn format_user(user: &Identity) -> String {
    let status = user.status.as_deref().unwrap_or("");
    let color = match status {
        "active" => Color::Green,
        "disabled" | "suspended" | "deleted" => Color::Red,
        "" => Color::White,
        _ => Color::Yellow,
    };

    format!(
        "{:24} {:20} {:32} {:10} [{}]",
        user.id,
        user.username,
        user.email,
        created_date(user),
        status
    )
    .color(color)
    .to_string()
}

fn format_login(user: &Identity, permissions: &[(&String, &bool)]) -> String {
    let mut output = format!("Logged in as {} ({})", user.display_name(), user.id);
    for (name, granted) in permissions {
        let line = if **granted {
            format!("  ✓ {name}").green()
        } else {
            format!("  ✗ {name}").red()
        };
        let _ = write!(output, "\n{line}");
    }
    output
}

fn get_client(environment: Option<Environment>) -> Result<AvidbaseClient> {
    let mut config =
        AvidConfig::load_or_onboard().with_context(|| "Failed to load avidbase config")?;
    if let Some(environment) = environment {
        config.environment = environment;
    }
    config
        .client()
        .with_context(|| "Incomplete avidbase config")
}

fn format_http_error(status: u16, reason: &str, body: &str) -> String {
    let reason = if reason.is_empty() {
        "HTTP error"
    } else {
        reason
    };
    let mut output = format!("Avidbase API error ({status} {reason}):");

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            let _ = write!(output, " {}", message.replace('\n', " "));
            return output;
        }

        if let Some(errors) = value.get("errors").and_then(|v| v.as_object()) {
            let mut lines = Vec::new();
            for (key, val) in errors {
                if let Some(arr) = val.as_array() {
                    for item in arr {
                        if let Some(text) = item.as_str() {
                            lines.push(format!("{key}: {}", text.replace('\n', " ")));
                        } else {
                            lines.push(format!("{key}: {item}"));
                        }
                    }
                } else if let Some(text) = val.as_str() {
                    lines.push(format!("{key}: {}", text.replace('\n', " ")));
                } else {
                    lines.push(format!("{key}: {val}"));
                }
            }
            if !lines.is_empty() {
                output.push('\n');
                for line in lines {
                    let _ = writeln!(output, "  - {line}");
                }
                return output;
            }
        }

        if let Ok(pretty) = serde_json::to_string_pretty(&value) {
            output.push('\n');
            output.push_str(&pretty);
            return output;
        }
    }

    if !body.trim().is_empty() {
        output.push('\n');
        output.push_str(body);
    }

    output
}

fn handle_error(err: &anyhow::Error) -> ! {
    if let Some(AvidbaseError::HttpStatus {
        status,
        reason,
        body,
    }) = err.downcast_ref::<AvidbaseError>()
    {
        eprintln!("{}", format_http_error(*status, reason, body));
        process::exit(1);
    }

    eprintln!("{err:#}");
    process::exit(1);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("AVIDLINE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = run(cli).await {
        handle_error(&err);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "avidline", &mut io::stdout());
        }
        Command::Login { identifier } => {
            let client = get_client(cli.environment)?;
            let password = read_password()?;
            let output = client.login(&identifier, &password).await?;
            let mut permissions: Vec<_> = output.permissions.iter().collect();
            permissions.sort();
            println!("{}", format_login(&output.user, &permissions));
        }
        Command::ListIds => {
            let client = get_client(cli.environment)?;
            for user in client.list_users().await? {
                println!("{}", user.id);
            }
        }
        Command::List => {
            let client = get_client(cli.environment)?;
            let users = client.list_users().await?;
            if users.is_empty() {
                println!("No users.");
            }
            for user in &users {
                println!("{}", format_user(user));
            }
        }
        Command::Show { id } => {
            let client = get_client(cli.environment)?;
            let user = client.get_user(&id).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Create { fields } => {
            let user = fields.into_create()?;
            let client = get_client(cli.environment)?;
            let created = client.create_user(&user).await?;
            println!("{}", created.id);
        }
        Command::Update { id, fields, clear } => {
            let update = fields.into_update(&clear)?;
            if update.is_empty() {
                return Err(anyhow::anyhow!("Nothing to update; pass a field or --clear"));
            }
            let client = get_client(cli.environment)?;
            let updated = client.update_user(&id, &update).await?;
            println!("{}", updated.id);
        }
        Command::Edit { id } => {
            let client = get_client(cli.environment)?;
            edit::edit_user(&client, &id).await?;
        }
        Command::Backup { filename } => {
            let client = get_client(cli.environment)?;
            backup::backup_users(&client, &filename, OffsetDateTime::now_utc()).await?;
        }
    }

    Ok(())
}
