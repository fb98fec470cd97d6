use std::net::SocketAddr;

pub const LOG_ENV: &str = "PSX_LOG";
pub const METRICS_ADDR_ENV: &str = "PSX_METRICS_ADDR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unsupported logging.format '{other}' (text|json)")),
        }
    }
}

/// A non-blank `PSX_LOG` wins over the configured level.
pub fn log_filter(configured: &str, env_override: Option<String>) -> String {
    env_override
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

pub fn init_tracing(log_level: &str, log_format: &str) -> Result<(), String> {
    let format = LogFormat::parse(log_format)?;
    let filter = log_filter(log_level, std::env::var(LOG_ENV).ok());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .map_err(|err| format!("invalid log filter '{filter}': {err}"))?;

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

/// Blank or unset means no exporter; anything else must be `host:port`.
pub fn parse_metrics_addr(raw: Option<&str>) -> Result<Option<SocketAddr>, String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|err| format!("invalid {METRICS_ADDR_ENV} '{raw}' (expected host:port): {err}"))
}

/// Serves Prometheus metrics over HTTP at `PSX_METRICS_ADDR` (for example
/// `0.0.0.0:9464`). Returns the bound address, or `None` when the variable is
/// unset or blank. Must run inside a tokio runtime context because the
/// listener is spawned onto it.
#[cfg(feature = "prometheus")]
pub fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(addr) = parse_metrics_addr(metrics_addr)? else {
        return Ok(None);
    };
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter on {addr}: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

/// Without the `prometheus` feature a configured `PSX_METRICS_ADDR` is an
/// error rather than silently ignored.
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    match parse_metrics_addr(metrics_addr)? {
        Some(_) => Err(format!("{METRICS_ADDR_ENV} requires the `prometheus` feature")),
        None => Ok(None),
    }
}
