use anyhow::{Context, Result};
use avidbase::types::Identity;
use avidbase::AvidbaseClient;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use time::OffsetDateTime;

#[derive(Serialize)]
pub struct BackupData {
    metadata: BackupMetadata,
    users: Vec<Identity>,
}

#[derive(Serialize)]
struct BackupMetadata {
    #[serde(with = "time::serde::rfc3339")]
    backup_timestamp: OffsetDateTime,
    avidline_version: String,
    account_id: String,
    user_count: usize,
}

impl BackupData {
    fn new(account_id: &str, users: Vec<Identity>, now: OffsetDateTime) -> Self {
        Self {
            metadata: BackupMetadata {
                backup_timestamp: now,
                avidline_version: env!("CARGO_PKG_VERSION").to_string(),
                account_id: account_id.to_string(),
                user_count: users.len(),
            },
            users,
        }
    }
}

pub async fn backup_users(
    client: &AvidbaseClient,
    filename: &str,
    now: OffsetDateTime,
) -> Result<()> {
    println!("Starting backup...");

    println!("Fetching users...");
    let users = client
        .list_users()
        .await
        .with_context(|| "Failed to fetch users")?;
    println!("Found {} users", users.len());

    let backup_data = BackupData::new(client.account_id(), users, now);

    println!("Writing backup to file: {filename}");
    let json_data = serde_json::to_string_pretty(&backup_data)
        .with_context(|| "Failed to serialize backup data to JSON")?;
    let mut file = File::create(filename)
        .with_context(|| format!("Failed to create backup file: {filename}"))?;
    file.write_all(json_data.as_bytes())
        .with_context(|| format!("Failed to write backup data to file: {filename}"))?;

    println!("Backup completed successfully! Saved to: {filename}");
    Ok(())
}
