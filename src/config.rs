//! Configuration loader and validator for the booking analytics tool.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub bookeo: Bookeo,
    #[serde(default)]
    pub cache: Cache,
    pub roster: Roster,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub database_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Booking provider credentials and sync parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookeo {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    pub sync_start: NaiveDate,
    /// Days per bookings search. Each cached booking records the window that
    /// loaded it; after changing this or `sync_start`, the next complete sync
    /// re-keys every booking still returned and drops the rest.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,
    #[serde(default = "default_pid_field")]
    pub pid_field: String,
}

/// Longest accepted TTL: ten years.
pub const MAX_TTL_SECONDS: u64 = 10 * 366 * 24 * 60 * 60;

/// Time-to-live per refresh source, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub bookings_ttl_seconds: u64,
    pub settings_ttl_seconds: u64,
    pub roster_ttl_seconds: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            bookings_ttl_seconds: 60 * 60,
            settings_ttl_seconds: 60 * 60,
            roster_ttl_seconds: 12 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RosterSourceKind {
    /// Newest matching message in an IMAP mailbox.
    Imap,
    /// A saved RFC 822 message on disk.
    Eml,
    /// The CSV attachment itself, already on disk.
    Csv,
}

/// Where the campus roster comes from and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roster {
    pub source: RosterSourceKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub imap: Option<Imap>,
    #[serde(default)]
    pub columns: Option<RosterColumns>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Imap {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    pub sender: String,
    pub subject: String,
}

/// Explicit roster header names. When absent, headers are sniffed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterColumns {
    pub pid: String,
    pub first_name: String,
    pub last_name: String,
}

fn default_user_agent() -> String {
    "CTE Sales Report Engine v0.1".to_string()
}

fn default_base_url() -> String {
    "https://api.bookeo.com/v2/".to_string()
}

fn default_window_days() -> u32 {
    31
}

fn default_items_per_page() -> u32 {
    100
}

fn default_pid_field() -> String {
    "PID".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

/// Load configuration from a YAML file, apply environment overrides and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Secrets and the database location may come from the environment instead of the file.
pub fn apply_overrides<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(url) = non_empty("DATABASE_URL") {
        cfg.app.database_url = url;
    }
    if let Some(key) = non_empty("BOOKEO_API_KEY") {
        cfg.bookeo.api_key = key;
    }
    if let Some(key) = non_empty("BOOKEO_SECRET_KEY") {
        cfg.bookeo.secret_key = key;
    }
    if let (Some(password), Some(imap)) = (non_empty("EMAIL_PASSWORD"), cfg.roster.imap.as_mut()) {
        imap.password = password;
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_url must be non-empty"));
    }

    let b = &cfg.bookeo;
    if b.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("bookeo.base_url must be non-empty"));
    }
    if b.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("bookeo.api_key must be non-empty"));
    }
    if b.secret_key.trim().is_empty() {
        return Err(ConfigError::Invalid("bookeo.secret_key must be non-empty"));
    }
    // The provider rejects searches spanning more than 31 days.
    if b.window_days == 0 || b.window_days > 31 {
        return Err(ConfigError::Invalid("bookeo.window_days must be within 1..=31"));
    }
    if b.items_per_page == 0 || b.items_per_page > 100 {
        return Err(ConfigError::Invalid("bookeo.items_per_page must be within 1..=100"));
    }
    if b.pid_field.trim().is_empty() {
        return Err(ConfigError::Invalid("bookeo.pid_field must be non-empty"));
    }

    let r = &cfg.roster;
    match r.source {
        RosterSourceKind::Imap => {
            let Some(imap) = &r.imap else {
                return Err(ConfigError::Invalid("roster.imap is required for the imap source"));
            };
            if imap.server.trim().is_empty() {
                return Err(ConfigError::Invalid("roster.imap.server must be non-empty"));
            }
            if imap.email.trim().is_empty() {
                return Err(ConfigError::Invalid("roster.imap.email must be non-empty"));
            }
            if imap.sender.trim().is_empty() || imap.subject.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "roster.imap.sender and roster.imap.subject must be non-empty",
                ));
            }
        }
        RosterSourceKind::Eml | RosterSourceKind::Csv => {
            if r.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid("roster.path is required for file sources"));
            }
        }
    }
    let c = &cfg.cache;
    if [c.bookings_ttl_seconds, c.settings_ttl_seconds, c.roster_ttl_seconds]
        .iter()
        .any(|ttl| *ttl > MAX_TTL_SECONDS)
    {
        return Err(ConfigError::Invalid("cache TTLs must not exceed ten years"));
    }

    if let Some(cols) = &r.columns {
        if cols.pid.trim().is_empty()
            || cols.first_name.trim().is_empty()
            || cols.last_name.trim().is_empty()
        {
            return Err(ConfigError::Invalid("roster.columns entries must be non-empty"));
        }
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  database_url: "sqlite://./data/analytics.db"
  user_agent: "CTE Sales Report Engine v0.1"

bookeo:
  api_key: "YOUR_BOOKEO_API_KEY"
  secret_key: "YOUR_BOOKEO_SECRET_KEY"
  sync_start: "2023-01-01"
  window_days: 31
  items_per_page: 100
  pid_field: "PID"

cache:
  bookings_ttl_seconds: 3600
  settings_ttl_seconds: 3600
  roster_ttl_seconds: 43200

roster:
  source: imap
  imap:
    server: "imap.example.edu"
    port: 993
    email: "frontdesk@example.edu"
    password: "YOUR_EMAIL_PASSWORD"
    mailbox: "INBOX"
    sender: "housing@example.edu"
    subject: "On-Campus Roster"
"#
}
