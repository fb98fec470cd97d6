use crate::value_objects::record::RawRecord;
use async_trait::async_trait;
use std::time::Duration;

/// Desktop Chrome user agent presented to the market-watch site.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    Launch(String),
    Navigation(String),
    Script(String),
    Element(String),
    Shutdown(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Launch(msg) => write!(f, "browser launch: {msg}"),
            RenderError::Navigation(msg) => write!(f, "navigation: {msg}"),
            RenderError::Script(msg) => write!(f, "script: {msg}"),
            RenderError::Element(msg) => write!(f, "element: {msg}"),
            RenderError::Shutdown(msg) => write!(f, "shutdown: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {}

#[async_trait]
pub trait RenderingEngine: Send + Sync {
    async fn load_page(&self, url: &str) -> Result<Box<dyn PageSession>, RenderError>;
}

/// One loaded page. Implementations must not mutate the page while
/// extracting from it.
#[async_trait]
pub trait PageSession: Send {
    async fn wait_for_table(&mut self, timeout: Duration) -> bool;

    async fn evaluate_records(
        &mut self,
        script: &str,
    ) -> Result<Option<Vec<RawRecord>>, RenderError>;

    async fn query_rows(&mut self) -> Result<Vec<Box<dyn TableRow>>, RenderError>;

    async fn close(&mut self) -> Result<(), RenderError>;
}

#[async_trait]
pub trait TableRow: Send + Sync {
    async fn cell_texts(&self) -> Result<Vec<String>, RenderError>;
}
