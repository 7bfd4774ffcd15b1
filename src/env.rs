use crate::utils::sse::DEFAULT_MAX_LINE_BYTES;
use eyre::{eyre, Result, WrapErr};
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_API_KEY_VAR: &str = "UPSTREAM_API_KEY";

#[derive(Debug, Clone)]
pub struct Env {
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    /// Name of the variable the credential store reads the upstream key from.
    pub api_key_var: String,
    pub upstream_proxy: Option<String>,
    pub upstream_referer: Option<String>,
    pub upstream_title: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Total deadline for buffered (non-streaming) chat calls.
    pub chat_timeout: Duration,
    pub dedup_window: Duration,
    /// Longest upstream stream line accepted before the stream is cut off.
    pub max_stream_line: usize,
    pub notify_throttle: Duration,
    pub catalog_ttl: Duration,
    pub models_aliases: Vec<String>,
    pub capabilities_file: Option<PathBuf>,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8765,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_owned(),
            api_key_var: DEFAULT_API_KEY_VAR.to_owned(),
            upstream_proxy: None,
            upstream_referer: None,
            upstream_title: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            chat_timeout: Duration::from_secs(120),
            dedup_window: Duration::from_millis(2000),
            max_stream_line: DEFAULT_MAX_LINE_BYTES,
            notify_throttle: Duration::from_secs(300),
            catalog_ttl: Duration::from_secs(600),
            models_aliases: vec!["/models".to_owned(), "/api/v1/models".to_owned()],
            capabilities_file: None,
        }
    }
}

impl Env {
    pub fn new() -> Result<Self> {
        let defaults = Self::default();
        let env = Self {
            host: var_or("RELAY_HOST", defaults.host)?,
            port: var_or("RELAY_PORT", defaults.port)?,
            upstream_base_url: var_or("UPSTREAM_BASE_URL", defaults.upstream_base_url)?,
            api_key_var: var_or("UPSTREAM_API_KEY_VAR", defaults.api_key_var)?,
            upstream_proxy: optional_var("UPSTREAM_PROXY"),
            upstream_referer: optional_var("UPSTREAM_REFERER"),
            upstream_title: optional_var("UPSTREAM_TITLE"),
            connect_timeout: secs_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            read_timeout: secs_or("READ_TIMEOUT_SECS", defaults.read_timeout)?,
            chat_timeout: secs_or("CHAT_TIMEOUT_SECS", defaults.chat_timeout)?,
            dedup_window: Duration::from_millis(var_or(
                "DEDUP_WINDOW_MS",
                defaults.dedup_window.as_millis() as u64,
            )?),
            max_stream_line: var_or("STREAM_MAX_LINE_BYTES", defaults.max_stream_line)?,
            notify_throttle: secs_or("NOTIFY_THROTTLE_SECS", defaults.notify_throttle)?,
            catalog_ttl: secs_or("CATALOG_TTL_SECS", defaults.catalog_ttl)?,
            models_aliases: match optional_var("MODELS_ALIASES") {
                Some(raw) => parse_aliases(&raw)?,
                None => defaults.models_aliases,
            },
            capabilities_file: optional_var("CAPABILITIES_FILE").map(PathBuf::from),
        };
        tracing::info!("Environment Loaded");
        Ok(env)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .wrap_err_with(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| eyre!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn secs_or(key: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(var_or(key, default.as_secs())?))
}

fn parse_aliases(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .map(|alias| {
            if alias.starts_with('/') {
                Ok(alias.to_owned())
            } else {
                Err(eyre!("model list alias must start with '/': {}", alias))
            }
        })
        .collect()
}
