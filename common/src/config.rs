// Configuration management with layered configuration (file, env)

use crate::errors::UserError;
use crate::models::TimingWindow;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub tableau: TableauConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub export: ExportFormats,
    /// Ordered; later windows win when several contain the current hour
    #[serde(default)]
    pub timing: Vec<TimingWindow>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableauConfig {
    pub server: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub site: String,
    pub token_name: String,
    #[serde(default)]
    pub token_secret: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl TableauConfig {
    /// REST API root, e.g. `https://bi.example.com/api/3.23`
    pub fn base_url(&self) -> String {
        format!(
            "{}/api/{}",
            self.server.trim_end_matches('/'),
            self.api_version
        )
    }
}

fn default_api_version() -> String {
    "3.23".to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_timeout_seconds() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Sender address, also the SMTP login
    pub address: String,
    #[serde(default)]
    pub password: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

/// Google service account key, used to post chat messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Authorized user credentials, used for Drive uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUserToken {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_api_base")]
    pub chat_api_base: String,
    #[serde(default = "default_drive_api_base")]
    pub drive_api_base: String,
    #[serde(default = "default_drive_api_base")]
    pub upload_api_base: String,
    /// Drive folder for uploads; empty uploads to the drive root
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub service_account: Option<ServiceAccountKey>,
    #[serde(default)]
    pub user_token: Option<AuthorizedUserToken>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_chat_api_base() -> String {
    "https://chat.googleapis.com".to_string()
}

fn default_drive_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            chat_api_base: default_chat_api_base(),
            drive_api_base: default_drive_api_base(),
            upload_api_base: default_drive_api_base(),
            folder_id: String::new(),
            service_account: None,
            user_token: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default)]
    pub incremental: bool,
    /// Fire only this EMAIL_ID (periodicity `run`), ignoring timing
    #[serde(default)]
    pub run_specific_email: String,
}

impl RunConfig {
    pub fn override_email_id(&self) -> Option<&str> {
        let id = self.run_specific_email.trim();
        (!id.is_empty()).then_some(id)
    }

    /// Directory holding the CSV input tables
    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("in").join("tables")
    }

    /// Scratch directory for exported parts and merged reports
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("out")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

/// Timezone rules are evaluated in
pub fn default_timezone() -> Tz {
    chrono_tz::Europe::Prague
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            timezone: default_timezone(),
            incremental: false,
            run_specific_email: String::new(),
        }
    }
}

/// Export formats each object type may be requested in
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFormats {
    #[serde(default)]
    pub allowed_workbook_format: BTreeSet<String>,
    #[serde(default)]
    pub allowed_view_format: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: default_json_logs(),
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: file → env
    ///
    /// The directory is taken from `APP_CONFIG_DIR`, defaulting to `config`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("APP_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from_path(config_dir)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), UserError> {
        let invalid = |message: &str| Err(UserError::InvalidConfig(message.to_string()));

        if self.tableau.server.trim().is_empty() {
            return invalid("Tableau server cannot be empty");
        }
        if self.tableau.site.trim().is_empty() {
            return invalid("Tableau site cannot be empty");
        }
        if self.tableau.token_name.trim().is_empty() {
            return invalid("Tableau token_name cannot be empty");
        }
        if self.tableau.page_size == 0 {
            return invalid("Tableau page_size must be greater than 0");
        }

        if self.mail.address.trim().is_empty() {
            return invalid("Mail sender address cannot be empty");
        }

        for window in &self.timing {
            if window.start > 23 || window.end > 24 {
                return Err(UserError::InvalidConfig(format!(
                    "Timing window '{}' must start at 0-23 and end at 0-24, got [{}, {})",
                    window.label, window.start, window.end
                )));
            }
        }

        Ok(())
    }
}
