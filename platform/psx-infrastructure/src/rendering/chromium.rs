use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use psx_domain::repositories::rendering::{
    PageSession, RenderError, RenderingEngine, TableRow, DEFAULT_USER_AGENT,
};
use psx_domain::value_objects::record::RawRecord;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const TABLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromiumOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub launch_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_width: 1920,
            window_height: 1080,
            launch_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(60),
        }
    }
}

impl ChromiumOptions {
    /// Explicit executable first, then `CHROME_BIN`; `None` lets chromiumoxide
    /// search the usual install locations.
    pub fn resolve_executable<F>(&self, env: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.executable.clone().or_else(|| {
            env("CHROME_BIN")
                .filter(|bin| !bin.trim().is_empty())
                .map(PathBuf::from)
        })
    }

    pub fn launch_args(&self) -> Vec<String> {
        vec![
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--blink-settings=imagesEnabled=false".to_string(),
            format!("--user-agent={}", self.user_agent),
        ]
    }

    fn browser_config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(self.window_width, self.window_height)
            .args(self.launch_args());
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = self.resolve_executable(|key| std::env::var(key).ok()) {
            builder = builder.chrome_executable(executable);
        }
        builder.build().map_err(RenderError::Launch)
    }
}

/// Launches a fresh headless Chromium per page load; the browser lives
/// exactly as long as the returned session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumEngine {
    options: ChromiumOptions,
}

impl ChromiumEngine {
    pub fn new(options: ChromiumOptions) -> Self {
        Self { options }
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), RenderError> {
        let config = self.options.browser_config()?;
        let launched = tokio::time::timeout(self.options.launch_timeout, Browser::launch(config))
            .await
            .map_err(|_| {
                RenderError::Launch(format!(
                    "browser did not start within {}s",
                    self.options.launch_timeout.as_secs()
                ))
            })?;
        let (browser, mut handler) = launched.map_err(|err| RenderError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(error = %err, "browser handler stopped");
                    break;
                }
            }
        });
        Ok((browser, handler_task))
    }
}

#[async_trait]
impl RenderingEngine for ChromiumEngine {
    async fn load_page(&self, url: &str) -> Result<Box<dyn PageSession>, RenderError> {
        let start = Instant::now();
        let (mut browser, handler_task) = self.launch().await?;
        metrics::histogram!("psx.browser.launch_ms").record(start.elapsed().as_secs_f64() * 1000.0);

        let navigated = tokio::time::timeout(self.options.navigation_timeout, browser.new_page(url)).await;
        let page = match navigated {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => {
                if let Err(err) = shutdown_browser(&mut browser, Some(handler_task)).await {
                    tracing::warn!(error = %err, "failed to close browser");
                }
                return Err(RenderError::Navigation(format!("{url}: {err}")));
            }
            Err(_) => {
                if let Err(err) = shutdown_browser(&mut browser, Some(handler_task)).await {
                    tracing::warn!(error = %err, "failed to close browser");
                }
                return Err(RenderError::Navigation(format!(
                    "{url}: no response within {}s",
                    self.options.navigation_timeout.as_secs()
                )));
            }
        };
        metrics::histogram!("psx.browser.load_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(url, elapsed_ms = start.elapsed().as_millis() as u64, "page loaded");

        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            page: Some(page),
            handler_task: Some(handler_task),
        }))
    }
}

/// Awaits `fut` for at most `limit`; `None` means it timed out.
async fn bounded<F: std::future::Future>(limit: Duration, step: &str, fut: F) -> Option<F::Output> {
    match tokio::time::timeout(limit, fut).await {
        Ok(output) => Some(output),
        Err(_) => {
            tracing::warn!(step, timeout_secs = limit.as_secs(), "browser shutdown step timed out");
            None
        }
    }
}

/// Closes the browser and reaps its process, each bounded by
/// [`CLOSE_TIMEOUT`]. The handler task is always aborted.
async fn shutdown_browser(
    browser: &mut Browser,
    handler_task: Option<JoinHandle<()>>,
) -> Result<(), RenderError> {
    let closed = match bounded(CLOSE_TIMEOUT, "close", browser.close()).await {
        Some(Ok(_)) => Ok(()),
        Some(Err(err)) => Err(RenderError::Shutdown(err.to_string())),
        None => Err(RenderError::Shutdown(format!(
            "browser did not close within {}s",
            CLOSE_TIMEOUT.as_secs()
        ))),
    };
    if let Some(Err(err)) = bounded(CLOSE_TIMEOUT, "wait", browser.wait()).await {
        tracing::debug!(error = %err, "failed to reap browser process");
    }
    if let Some(handler_task) = handler_task {
        handler_task.abort();
    }
    closed
}

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page, RenderError> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Shutdown("session already closed".to_string()))
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn wait_for_table(&mut self, timeout: Duration) -> bool {
        let Ok(page) = self.page() else {
            return false;
        };
        let poll = async {
            loop {
                if page.find_element("table").await.is_ok() {
                    return;
                }
                tokio::time::sleep(TABLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    async fn evaluate_records(
        &mut self,
        script: &str,
    ) -> Result<Option<Vec<RawRecord>>, RenderError> {
        let page = self.page()?;
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .build()
            .map_err(RenderError::Script)?;
        let result = page
            .evaluate_expression(params)
            .await
            .map_err(|err| RenderError::Script(err.to_string()))?;
        result
            .into_value::<Option<Vec<RawRecord>>>()
            .map_err(|err| RenderError::Script(format!("unexpected script result: {err}")))
    }

    async fn query_rows(&mut self) -> Result<Vec<Box<dyn TableRow>>, RenderError> {
        let page = self.page()?;
        let table = page
            .find_element("table")
            .await
            .map_err(|err| RenderError::Element(err.to_string()))?;
        let rows = table
            .find_elements("tr")
            .await
            .map_err(|err| RenderError::Element(err.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(ChromiumRow(row)) as Box<dyn TableRow>)
            .collect())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        if let Some(page) = self.page.take() {
            if let Some(Err(err)) = bounded(CLOSE_TIMEOUT, "page", page.close()).await {
                tracing::debug!(error = %err, "failed to close page");
            }
        }
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        shutdown_browser(&mut browser, self.handler_task.take()).await
    }
}

struct ChromiumRow(Element);

#[async_trait]
impl TableRow for ChromiumRow {
    async fn cell_texts(&self) -> Result<Vec<String>, RenderError> {
        let cells = self
            .0
            .find_elements("td")
            .await
            .map_err(|err| RenderError::Element(err.to_string()))?;
        let mut texts = Vec::with_capacity(cells.len());
        for cell in cells {
            let text = cell
                .inner_text()
                .await
                .map_err(|err| RenderError::Element(err.to_string()))?;
            texts.push(text.unwrap_or_default());
        }
        Ok(texts)
    }
}
