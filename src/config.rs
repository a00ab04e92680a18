//! Configuration loader and validator for the attendance scanner.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub server: Server,
    pub sheets: Sheets,
    pub client: Client,
}

/// App-level settings shared by the server and the scanning devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub sync_interval_secs: u64,
    pub display_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub debounce_ms: u64,
}

/// HTTP listener for the marking service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

/// Spreadsheet access and range mappings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheets {
    pub spreadsheet_id: String,
    pub access_token: String,
    pub api_base: String,
    pub roster: Roster,
    pub logs: Logs,
}

/// Roster sheet mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roster {
    /// A1 range holding the registration rows, e.g. `Form responses 1!A2:L1000`.
    pub range: String,
    /// Numeric sheet id used by formatting requests.
    pub sheet_id: i64,
    /// Last column (letter) painted when a row is highlighted.
    pub highlight_through: String,
    pub columns: RosterColumns,
}

/// Column letters within the roster sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterColumns {
    pub name: String,
    pub email: String,
    pub roll_number: String,
    pub section: String,
    pub code: String,
    pub status: String,
}

/// Audit log sheet mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Logs {
    pub append_range: String,
    pub read_range: String,
}

/// Scanning-device settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub server_url: String,
    pub operator_id: String,
    pub operator_name: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL of the device-local offline queue; `DATABASE_URL` wins when set.
    pub fn queue_database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/offline-queue.db", self.app.data_dir))
    }

    /// Spreadsheet token; `SHEETS_ACCESS_TOKEN` wins when set.
    pub fn sheets_token(&self) -> String {
        std::env::var("SHEETS_ACCESS_TOKEN").unwrap_or_else(|_| self.sheets.access_token.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.app.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.app.sync_interval_secs)
    }

    pub fn display_timeout(&self) -> Duration {
        Duration::from_millis(self.app.display_timeout_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.app.debounce_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn is_column(letters: &str) -> bool {
    !letters.is_empty() && letters.len() <= 3 && letters.bytes().all(|b| b.is_ascii_uppercase())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.sync_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.sync_interval_secs must be > 0"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_secs must be > 0"));
    }
    // display_timeout_ms and debounce_ms may be 0 (no hold / no debounce)

    if cfg.server.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind must be non-empty"));
    }

    if cfg.sheets.spreadsheet_id.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.spreadsheet_id must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.sheets.api_base).is_err() {
        return Err(ConfigError::Invalid("sheets.api_base must be a valid URL"));
    }
    if cfg.sheets.roster.range.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.roster.range must be non-empty"));
    }
    if !is_column(&cfg.sheets.roster.highlight_through) {
        return Err(ConfigError::Invalid("sheets.roster.highlight_through must be a column letter"));
    }
    let c = &cfg.sheets.roster.columns;
    if !is_column(&c.name) {
        return Err(ConfigError::Invalid("sheets.roster.columns.name must be a column letter"));
    }
    if !is_column(&c.email) {
        return Err(ConfigError::Invalid("sheets.roster.columns.email must be a column letter"));
    }
    if !is_column(&c.roll_number) {
        return Err(ConfigError::Invalid("sheets.roster.columns.roll_number must be a column letter"));
    }
    if !is_column(&c.section) {
        return Err(ConfigError::Invalid("sheets.roster.columns.section must be a column letter"));
    }
    if !is_column(&c.code) {
        return Err(ConfigError::Invalid("sheets.roster.columns.code must be a column letter"));
    }
    if !is_column(&c.status) {
        return Err(ConfigError::Invalid("sheets.roster.columns.status must be a column letter"));
    }
    if cfg.sheets.logs.append_range.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.logs.append_range must be non-empty"));
    }
    if cfg.sheets.logs.read_range.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.logs.read_range must be non-empty"));
    }

    if reqwest::Url::parse(&cfg.client.server_url).is_err() {
        return Err(ConfigError::Invalid("client.server_url must be a valid URL"));
    }
    if cfg.client.operator_id.trim().is_empty() {
        return Err(ConfigError::Invalid("client.operator_id must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  sync_interval_secs: 30
  display_timeout_ms: 3000
  request_timeout_secs: 15
  debounce_ms: 2000

server:
  bind: "127.0.0.1:8080"

sheets:
  spreadsheet_id: "GOOGLE_SHEETS_ID"
  access_token: "YOUR_SHEETS_ACCESS_TOKEN"
  api_base: "https://sheets.googleapis.com/"
  roster:
    range: "Form responses 1!A2:L1000"
    sheet_id: 0
    highlight_through: "F"
    columns:
      name: "B"
      email: "D"
      roll_number: "E"
      section: "F"
      code: "I"
      status: "K"
  logs:
    append_range: "Logs!A:F"
    read_range: "Logs!A2:F1000"

client:
  server_url: "http://127.0.0.1:8080/"
  operator_id: "volunteer@example.org"
  operator_name: "Volunteer"
"#
}
