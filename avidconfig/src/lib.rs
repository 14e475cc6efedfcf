#![allow(clippy::multiple_crate_versions)]

use avidbase::{AvidbaseClient, Environment};
use serde::{Deserialize, Serialize};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::Command;

pub const APP_NAME: &str = "avidbase";

/// Where the API key comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiKey {
    Literal(String),
    Env { env: String },
    Cmd { cmd: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvidConfig {
    /// Tenant identifier scoping every API call
    #[serde(default)]
    pub account_id: String,
    pub api_key: ApiKey,
    #[serde(default)]
    pub environment: Environment,
    /// Overrides the environment's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for AvidConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            api_key: ApiKey::Literal(String::new()),
            environment: Environment::default(),
            base_url: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AvidConfigError {
    #[error("config error: {0}")]
    Confy(#[from] confy::ConfyError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("missing api key in config; set `api_key` in the avidbase config file")]
    MissingApiKey,
    #[error("missing account id in config; set `account_id` in the avidbase config file")]
    MissingAccountId,
    #[error("environment variable '{env}' not found")]
    MissingEnv { env: String },
    #[error("api key command failed: {cmd}: {message}")]
    CommandFailed { cmd: String, message: String },
    #[error("failed to execute api key command '{cmd}': {source}")]
    CommandExec { cmd: String, source: io::Error },
    #[error("api key command returned empty output: {cmd}")]
    CommandEmpty { cmd: String },
    #[error(
        "account id and api key required but stdin is not interactive; set them in {path} (example: account_id = \"acme\" and api_key = \"YOUR_KEY\" or api_key = {{ cmd = \"...\" }})",
        path = .path.display()
    )]
    NonInteractive { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, AvidConfigError>;

impl AvidConfig {
    /// Loads the config file from the standard OS location.
    ///
    /// # Errors
    /// Returns an error if the config file cannot be read or deserialized.
    pub fn load() -> Result<Self> {
        Ok(confy::load(APP_NAME, None)?)
    }

    /// Loads config or walks the user through entering the account id and
    /// API key.
    ///
    /// # Errors
    /// Returns an error if the config cannot be loaded, the API key cannot be
    /// resolved, or onboarding fails (including non-interactive stdin).
    pub fn load_or_onboard() -> Result<Self> {
        let config = Self::load()?;
        if config.is_complete() {
            config.api_key.resolve()?;
            return Ok(config);
        }
        config.onboard()
    }

    /// Stores the config to the standard OS location.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn store(&self) -> Result<()> {
        confy::store(APP_NAME, None, self)?;
        Ok(())
    }

    /// Resolves the API key from the configured source.
    ///
    /// # Errors
    /// Returns an error if the API key cannot be resolved or is empty.
    pub fn api_key(&self) -> Result<String> {
        self.api_key.resolve()
    }

    /// Builds a client for the configured account, environment and base URL.
    ///
    /// # Errors
    /// Returns an error if the account id is empty or the API key cannot be
    /// resolved.
    pub fn client(&self) -> Result<AvidbaseClient> {
        let account_id = self.account_id.trim();
        if account_id.is_empty() {
            return Err(AvidConfigError::MissingAccountId);
        }
        let mut client = AvidbaseClient::new(account_id, self.api_key()?, self.environment);
        if let Some(base_url) = &self.base_url {
            tracing::debug!("Using base URL override: {}", base_url);
            client = client.with_base_url(base_url.as_str());
        }
        Ok(client)
    }

    fn is_complete(&self) -> bool {
        let has_key = match &self.api_key {
            ApiKey::Literal(value) => !value.trim().is_empty(),
            ApiKey::Env { .. } | ApiKey::Cmd { .. } => true,
        };
        has_key && !self.account_id.trim().is_empty()
    }

    fn onboard(mut self) -> Result<Self> {
        let config_path = confy::get_configuration_file_path(APP_NAME, None)?;
        if !io::stdin().is_terminal() {
            return Err(AvidConfigError::NonInteractive { path: config_path });
        }

        if !config_path.as_os_str().is_empty() {
            eprintln!(
                "Avidbase config not found or incomplete. It will be stored at: {}",
                config_path.display()
            );
        }

        if self.account_id.trim().is_empty() {
            let account_id = prompt("Enter your Avidbase account id: ")?;
            if account_id.is_empty() {
                return Err(AvidConfigError::MissingAccountId);
            }
            self.account_id = account_id;
        }

        if let ApiKey::Literal(value) = &self.api_key {
            if value.trim().is_empty() {
                let api_key = prompt("Enter your Avidbase API key: ")?;
                if api_key.is_empty() {
                    return Err(AvidConfigError::MissingApiKey);
                }
                self.api_key = ApiKey::Literal(api_key);
            }
        }

        self.store()?;
        Ok(self)
    }
}

fn prompt(message: &str) -> Result<String> {
    eprint!("{message}");
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

impl ApiKey {
    fn resolve(&self) -> Result<String> {
        match self {
            Self::Literal(value) => non_empty(value),
            Self::Env { env } => {
                let value = std::env::var(env)
                    .map_err(|_| AvidConfigError::MissingEnv { env: env.clone() })?;
                non_empty(&value)
            }
            Self::Cmd { cmd } => {
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(cmd)
                    .output()
                    .map_err(|e| AvidConfigError::CommandExec {
                        cmd: cmd.clone(),
                        source: e,
                    })?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(AvidConfigError::CommandFailed {
                        cmd: cmd.clone(),
                        message: stderr.trim().to_string(),
                    });
                }

                let stdout = String::from_utf8_lossy(&output.stdout);
                let trimmed = stdout.trim();
                if trimmed.is_empty() {
                    return Err(AvidConfigError::CommandEmpty { cmd: cmd.clone() });
                }
                Ok(trimmed.to_string())
            }
        }
    }
}

fn non_empty(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AvidConfigError::MissingApiKey);
    }
    Ok(trimmed.to_string())
}
