use psx_application::config::{self, Config};
use psx_application::extraction::ExtractionChain;
use psx_application::orchestrator::RunOrchestrator;
use psx_application::scheduler::{Clock, SystemClock};
use psx_infrastructure::persistence::postgres_snapshots::PostgresSnapshotRepository;
use psx_infrastructure::rendering::chromium::{ChromiumEngine, ChromiumOptions};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_ENV: &str = "PSX_CONFIG";

pub fn resolve_config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    resolve_config_path_with(cli_path, |key| env::var(key).ok())
}

pub fn resolve_config_path_with<F>(cli_path: Option<PathBuf>, env: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    cli_path.or_else(|| {
        env(CONFIG_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
}

/// Without a file the built-in defaults apply (PSX hours, Asia/Karachi).
pub fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub fn chromium_options(config: &Config) -> ChromiumOptions {
    let browser = &config.browser;
    ChromiumOptions {
        executable: browser
            .executable
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from),
        headless: browser.headless,
        user_agent: browser.user_agent.clone(),
        window_width: browser.window_width,
        window_height: browser.window_height,
        launch_timeout: Duration::from_secs(browser.launch_timeout_secs),
        navigation_timeout: Duration::from_secs(browser.page_load_timeout_secs),
    }
}

pub fn build_repository(config: &Config) -> Result<PostgresSnapshotRepository, String> {
    let db_url = config.resolve_db_url()?;
    PostgresSnapshotRepository::new(&db_url, config.db.table.clone())
}

pub async fn migrate(config: &Config) -> Result<(), String> {
    let repository = build_repository(config)?;
    repository.apply_schema().await
}

/// Wires the production adapters and makes sure the schema exists.
pub async fn prepare_orchestrator(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<RunOrchestrator, String> {
    let window = config.active_window()?;
    let repository = build_repository(config)?;
    repository
        .apply_schema()
        .await
        .map_err(|err| format!("startup failed while preparing schema: {err}"))?;

    tracing::info!(
        url = %config.source.url,
        table = %repository.table(),
        "harvester ready"
    );

    Ok(RunOrchestrator::new(
        Arc::new(ChromiumEngine::new(chromium_options(config))),
        Arc::new(repository),
        window,
        config.source.url.clone(),
        ExtractionChain::new(config.extraction_timeouts()),
        clock,
    ))
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
