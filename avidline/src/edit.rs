use anyhow::{Context, Result};
use avidbase::types::{Identity, Patch, UpdateUser, UserData};
use avidbase::AvidbaseClient;
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::Command as ProcessCommand;
use tempfile::NamedTempFile;

const DATA_PREFIX: &str = "data.";

/// Field values as left in the editor. `None` means the line was removed.
#[derive(Debug, Default)]
pub struct EditableUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub data: UserData,
}

/// Parses a data value as JSON, falling back to a plain string.
pub fn parse_data_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub fn write_user_tsv(writer: &mut impl Write, user: &Identity) -> Result<()> {
    writeln!(writer, "FIELD\tVALUE")?;
    writeln!(writer, "first_name\t{}", user.first_name)?;
    writeln!(writer, "last_name\t{}", user.last_name)?;
    writeln!(writer, "username\t{}", user.username)?;
    writeln!(writer, "email\t{}", user.email)?;
    for (key, value) in &user.data {
        writeln!(writer, "{DATA_PREFIX}{key}\t{}", serde_json::to_string(value)?)?;
    }
    Ok(())
}

pub fn read_user_tsv(reader: impl BufRead) -> Result<EditableUser> {
    let mut lines = reader.lines();

    // Skip header
    lines.next();

    let mut user = EditableUser::default();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        // Values are kept verbatim; only the field name is trimmed.
        let (field, value) = line.split_once('\t').unwrap_or((line.as_str(), ""));
        let value = value.to_string();
        match field.trim() {
            "first_name" => user.first_name = Some(value),
            "last_name" => user.last_name = Some(value),
            "username" => user.username = Some(value),
            "email" => user.email = Some(value),
            other => {
                let key = other
                    .strip_prefix(DATA_PREFIX)
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("Unknown field '{other}'"))?;
                user.data.insert(key.to_string(), parse_data_value(&value));
            }
        }
    }

    Ok(user)
}

fn field_patch(original: &str, edited: Option<String>) -> Patch<String> {
    match edited {
        None => Patch::Unchanged,
        Some(value) if value == original => Patch::Unchanged,
        Some(value) if value.is_empty() => Patch::Clear,
        Some(value) => Patch::Set(value),
    }
}

/// Builds an update carrying only the fields that differ from `original`.
/// A blank value clears the field.
pub fn diff_user(original: &Identity, edited: EditableUser) -> UpdateUser {
    let data = if edited.data == original.data {
        Patch::Unchanged
    } else {
        Patch::Set(edited.data)
    };
    UpdateUser {
        first_name: field_patch(&original.first_name, edited.first_name),
        last_name: field_patch(&original.last_name, edited.last_name),
        username: field_patch(&original.username, edited.username),
        email: field_patch(&original.email, edited.email),
        password: Patch::Unchanged,
        data,
    }
}

fn run_editor(editor: &str, path: &Path) -> Result<()> {
    let status = ProcessCommand::new(editor)
        .arg(path)
        .status()
        .context("Failed to open editor")?;
    if !status.success() {
        anyhow::bail!("Editor '{editor}' exited with {status}; user not updated");
    }
    Ok(())
}

pub async fn edit_user(client: &AvidbaseClient, user_id: &str) -> Result<()> {
    let user = client.get_user(user_id).await?;

    // Create temp file with the user and let user edit it
    let mut temp = NamedTempFile::new()?;
    write_user_tsv(&mut temp, &user)?;
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    run_editor(&editor, temp.path())?;

    let reader = std::io::BufReader::new(File::open(temp.path())?);
    let update = diff_user(&user, read_user_tsv(reader)?);
    if update.is_empty() {
        println!("No changes.");
        return Ok(());
    }

    println!("Updating user '{user_id}'.");
    client.update_user(user_id, &update).await?;
    Ok(())
}
