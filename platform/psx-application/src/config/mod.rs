use crate::extraction::ExtractionTimeouts;
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use psx_domain::repositories::rendering::DEFAULT_USER_AGENT;
use psx_domain::repositories::snapshots::validate_table_name;
use psx_domain::services::window::ActiveWindow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SOURCE_URL: &str = "https://dps.psx.com.pk/market-watch";
pub const DEFAULT_TABLE: &str = "psx_data";
const DEFAULT_DBNAME: &str = "psx_data";

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub source: SourceConfig,
    pub window: WindowConfig,
    pub extraction: ExtractionConfig,
    pub browser: BrowserConfig,
    pub db: DbConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct SourceConfig {
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct WindowConfig {
    pub timezone: String,
    pub open: String,
    pub close: String,
    pub closed_weekdays: Vec<String>,
    pub interval_minutes: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Karachi".to_string(),
            open: "09:30".to_string(),
            close: "15:30".to_string(),
            closed_weekdays: vec!["sat".to_string(), "sun".to_string()],
            interval_minutes: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct ExtractionConfig {
    pub primary_wait_secs: u64,
    pub settle_ms: u64,
    pub secondary_wait_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            primary_wait_secs: 20,
            settle_ms: 2000,
            secondary_wait_secs: 25,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct BrowserConfig {
    pub executable: Option<String>,
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub launch_timeout_secs: u64,
    pub page_load_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_width: 1920,
            window_height: 1080,
            launch_timeout_secs: 30,
            page_load_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct DbConfig {
    pub url: Option<String>,
    pub table: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    pub fn active_window(&self) -> Result<ActiveWindow, String> {
        let timezone = self
            .window
            .timezone
            .parse::<Tz>()
            .map_err(|err| format!("invalid window.timezone '{}': {err}", self.window.timezone))?;
        let open = parse_time_of_day(&self.window.open)
            .map_err(|err| format!("invalid window.open: {err}"))?;
        let close = parse_time_of_day(&self.window.close)
            .map_err(|err| format!("invalid window.close: {err}"))?;
        let closed_weekdays = self
            .window
            .closed_weekdays
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<Weekday>()
                    .map_err(|_| format!("invalid window.closed_weekdays entry '{raw}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        ActiveWindow::new(
            timezone,
            open,
            close,
            closed_weekdays,
            self.window.interval_minutes,
        )
        .map_err(|err| format!("invalid [window]: {err}"))
    }

    pub fn extraction_timeouts(&self) -> ExtractionTimeouts {
        ExtractionTimeouts {
            primary_wait: Duration::from_secs(self.extraction.primary_wait_secs),
            settle_delay: Duration::from_millis(self.extraction.settle_ms),
            secondary_wait: Duration::from_secs(self.extraction.secondary_wait_secs),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.source.url.trim().is_empty() {
            return Err("source.url is empty".to_string());
        }
        self.active_window()?;
        validate_table_name(&self.db.table).map_err(|err| format!("db.table: {err}"))?;
        Ok(())
    }

    pub fn resolve_db_url(&self) -> Result<String, String> {
        resolve_db_url_with(self.db.url.as_deref(), |key| std::env::var(key).ok())
    }
}

/// `db.url`, then `PSX_DB_URL`, then a URL assembled from the libpq
/// `PG*` variables with local defaults.
pub fn resolve_db_url_with<F>(configured: Option<&str>, env: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = configured.filter(|url| !url.trim().is_empty()) {
        return Ok(url.to_string());
    }
    if let Some(url) = env("PSX_DB_URL").filter(|url| !url.trim().is_empty()) {
        return Ok(url);
    }

    let var = |key: &str, default: &str| {
        env(key)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    };
    let host = var("PGHOST", "localhost");
    let port = var("PGPORT", "5432");
    let user = var("PGUSER", "postgres");
    let dbname = var("PGDATABASE", DEFAULT_DBNAME);
    let password = env("PGPASSWORD").unwrap_or_default();

    if port.parse::<u16>().is_err() {
        return Err(format!("invalid PGPORT '{port}'"));
    }

    let mut url = format!("host={host} port={port} user={user} dbname={dbname}");
    if !password.is_empty() {
        let escaped = password.replace('\\', "\\\\").replace('\'', "\\'");
        url.push_str(&format!(" password='{escaped}'"));
    }
    Ok(url)
}

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, String> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| format!("expected HH:MM, got '{raw}'"))
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    config
        .validate()
        .map_err(|err| format!("invalid config {}: {}", path.display(), err))?;
    Ok(config)
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}
