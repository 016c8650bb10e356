//! Ingestion configuration
//!
//! Loaded from `INGEST_*` and `SHEETS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;

use crate::config::env_or;
use formsync_common::FormsyncError;

/// Default poll interval (one minute)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default Sheets v4 API base URL
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Default OAuth2 token endpoint for service accounts
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth2 scope granting read/write access to spreadsheets
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// When the source range is cleared relative to the batch transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClearMode {
    /// Clear once, after the batch committed
    #[default]
    AfterCommit,
    /// Clear after every inserted row, inside the open transaction
    PerRow,
}

impl std::str::FromStr for ClearMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "after_commit" | "after-commit" => Ok(ClearMode::AfterCommit),
            "per_row" | "per-row" => Ok(ClearMode::PerRow),
            other => Err(format!(
                "Invalid INGEST_CLEAR_MODE: {}. Must be 'after_commit' or 'per_row'",
                other
            )),
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Whether the background poller runs
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Delay before the first poll after startup
    pub initial_delay_secs: u64,
    pub clear_mode: ClearMode,
    pub download: DownloadConfig,
    pub sheets: SheetsConfig,
}

/// Attachment download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
    /// Total attempts per URL, including the first
    pub max_retries: u32,
    /// Backoff before the second attempt; doubled for each further attempt
    pub backoff_ms: u64,
}

/// Spreadsheet source settings
#[derive(Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub client_email: String,
    pub private_key: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// First column read (column A holds the form timestamp)
    pub read_start_column: String,
    /// First column cleared
    pub clear_start_column: String,
    pub end_column: String,
    /// First row below the header
    pub first_data_row: u32,
    pub api_base: String,
    pub token_uri: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for SheetsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsConfig")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("sheet_name", &self.sheet_name)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let clear_mode = match std::env::var("INGEST_CLEAR_MODE") {
            Ok(raw) => raw.parse::<ClearMode>().map_err(|e: String| anyhow::anyhow!(e))?,
            Err(_) => ClearMode::default(),
        };

        let config = Self {
            enabled: env_or("INGEST_ENABLED", false),
            poll_interval_secs: env_or("INGEST_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS),
            initial_delay_secs: env_or("INGEST_INITIAL_DELAY_SECS", 5),
            clear_mode,
            download: DownloadConfig {
                timeout_secs: env_or("INGEST_DOWNLOAD_TIMEOUT_SECS", 60),
                max_retries: env_or("INGEST_DOWNLOAD_MAX_RETRIES", 3),
                backoff_ms: env_or("INGEST_DOWNLOAD_BACKOFF_MS", 1000),
            },
            sheets: SheetsConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("INGEST_POLL_INTERVAL_SECS must be greater than 0");
        }
        self.download.validate()?;
        if self.enabled {
            self.sheets.validate()?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("INGEST_DOWNLOAD_TIMEOUT_SECS must be greater than 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("INGEST_DOWNLOAD_MAX_RETRIES must be at least 1");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl SheetsConfig {
    /// Load spreadsheet settings; credentials default to empty and are
    /// checked by [`SheetsConfig::validate`]
    pub fn from_env() -> formsync_common::Result<Self> {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };

        let config = Self {
            client_email: var("SHEETS_CLIENT_EMAIL", ""),
            // Keys pasted into .env files usually carry literal "\n" sequences
            private_key: var("SHEETS_PRIVATE_KEY", "").replace("\\n", "\n"),
            spreadsheet_id: var("SHEETS_SPREADSHEET_ID", ""),
            sheet_name: var("SHEETS_SHEET_NAME", "Hoja1"),
            read_start_column: var("SHEETS_READ_START_COLUMN", "B"),
            clear_start_column: var("SHEETS_CLEAR_START_COLUMN", "A"),
            end_column: var("SHEETS_END_COLUMN", "P"),
            first_data_row: env_or("SHEETS_FIRST_DATA_ROW", 2),
            api_base: var("SHEETS_API_BASE", DEFAULT_SHEETS_API_BASE),
            token_uri: var("SHEETS_TOKEN_URI", DEFAULT_TOKEN_URI),
            timeout_secs: env_or("SHEETS_TIMEOUT_SECS", 30),
        };

        if config.first_data_row < 2 {
            return Err(FormsyncError::Config(
                "SHEETS_FIRST_DATA_ROW must leave room for the header row".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn validate(&self) -> formsync_common::Result<()> {
        for (name, value) in [
            ("SHEETS_CLIENT_EMAIL", &self.client_email),
            ("SHEETS_PRIVATE_KEY", &self.private_key),
            ("SHEETS_SPREADSHEET_ID", &self.spreadsheet_id),
            ("SHEETS_SHEET_NAME", &self.sheet_name),
        ] {
            if value.trim().is_empty() {
                return Err(FormsyncError::missing_env(name));
            }
        }
        if self.timeout_secs == 0 {
            return Err(FormsyncError::Config(
                "SHEETS_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// A1 range read each poll, e.g. `Hoja1!B2:P`
    pub fn read_range(&self) -> String {
        format!(
            "{}!{}{}:{}",
            quote_sheet_name(&self.sheet_name),
            self.read_start_column,
            self.first_data_row,
            self.end_column
        )
    }

    /// A1 range covering the first `rows` data rows, e.g. `Hoja1!A2:P4`
    pub fn clear_range(&self, sheet: &str, rows: usize) -> String {
        let last_row = self.first_data_row as usize + rows.max(1) - 1;
        format!(
            "{}!{}{}:{}{}",
            quote_sheet_name(sheet),
            self.clear_start_column,
            self.first_data_row,
            self.end_column,
            last_row
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sheet name as it must appear in A1 notation
///
/// Plain identifiers pass through; anything else is wrapped in single quotes
/// with embedded quotes doubled, e.g. `Form 'A'` becomes `'Form ''A'''`.
fn quote_sheet_name(name: &str) -> Cow<'_, str> {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("'{}'", name.replace('\'', "''")))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            initial_delay_secs: 5,
            clear_mode: ClearMode::default(),
            download: DownloadConfig::default(),
            sheets: SheetsConfig::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 3,
            backoff_ms: 1000,
        }
    }
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            client_email: String::new(),
            private_key: String::new(),
            spreadsheet_id: String::new(),
            sheet_name: "Hoja1".to_string(),
            read_start_column: "B".to_string(),
            clear_start_column: "A".to_string(),
            end_column: "P".to_string(),
            first_data_row: 2,
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            timeout_secs: 30,
        }
    }
}
