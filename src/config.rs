//! Runtime configuration from the process environment, optionally seeded from a
//! `.env` file. Defaults target a backend on localhost.

use crate::services::health::DEFAULT_FAILURE_THRESHOLD;
use crate::services::realtime::{MAX_INTERVAL, TransportConfig};
use crate::services::websocket;
use crate::utils::{env_bool, env_u64, env_string};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

pub const DEFAULT_API_URL: &str = "http://localhost:8123/api/heating";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8123/api/heating/ws";
pub const DEFAULT_PREFERENCES_FILE: &str = "dashboard-preferences.json";
pub const DEFAULT_POLL_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    /// Static bearer token sent to both the REST API and the push channel.
    pub api_token: Option<String>,
    pub preferences_file: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Bound on the push channel's TCP connect and upgrade handshake.
    pub connect_timeout: Duration,
    /// Consecutive push failures before falling back to polling.
    pub failure_threshold: NonZeroU32,
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
    /// `None` disables probing the push channel while polling.
    pub push_probe_interval: Option<Duration>,
    pub show_hidden: bool,
    pub viewport_rows: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Prefer env var; fallback to token.txt in working directory
        let api_token = match env_string("DASHBOARD_TOKEN") {
            Some(v) => Some(v),
            None => match fs::read_to_string("token.txt") {
                Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            },
        };

        let failure_threshold = env_u64("PUSH_FAILURE_THRESHOLD")?
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD as u64);
        let failure_threshold = u32::try_from(failure_threshold)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| "PUSH_FAILURE_THRESHOLD must be a positive integer".to_string())?;

        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECS")?.unwrap_or(DEFAULT_POLL_SECS));
        let poll_interval = positive("POLL_INTERVAL_SECS", bounded("POLL_INTERVAL_SECS", poll_interval)?)?;
        let connect_timeout =
            Duration::from_secs(env_u64("CONNECT_TIMEOUT_SECS")?.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS));
        let connect_timeout = positive("CONNECT_TIMEOUT_SECS", bounded("CONNECT_TIMEOUT_SECS", connect_timeout)?)?;

        let push_probe_interval = match env_u64("PUSH_PROBE_SECS")?.unwrap_or(60) {
            0 => None,
            secs => Some(bounded("PUSH_PROBE_SECS", Duration::from_secs(secs))?),
        };

        let ws_url = env_string("DASHBOARD_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        websocket::supported_url(&ws_url).map_err(|e| format!("DASHBOARD_WS_URL: {}", e))?;

        Ok(Config {
            api_url: env_string("DASHBOARD_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            ws_url,
            api_token,
            preferences_file: env_string("PREFERENCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFERENCES_FILE)),
            poll_interval,
            request_timeout: bounded(
                "REQUEST_TIMEOUT_SECS",
                Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS")?.unwrap_or(10)),
            )?,
            connect_timeout,
            failure_threshold,
            reconnect_backoff: bounded(
                "RECONNECT_BACKOFF_MS",
                Duration::from_millis(env_u64("RECONNECT_BACKOFF_MS")?.unwrap_or(1000)),
            )?,
            reconnect_backoff_max: bounded(
                "RECONNECT_BACKOFF_MAX_SECS",
                Duration::from_secs(env_u64("RECONNECT_BACKOFF_MAX_SECS")?.unwrap_or(30)),
            )?,
            push_probe_interval,
            show_hidden: env_bool("SHOW_HIDDEN").unwrap_or(false),
            viewport_rows: env_u64("VIEWPORT_ROWS")?.unwrap_or(20).max(1) as usize,
        })
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            failure_threshold: self.failure_threshold,
            poll_interval: self.poll_interval,
            backoff_base: self.reconnect_backoff,
            backoff_max: self.reconnect_backoff_max.max(self.reconnect_backoff),
            probe_interval: self.push_probe_interval,
            connect_timeout: self.connect_timeout,
            ..TransportConfig::default()
        }
    }
}

/// Reject durations past one day; they can only be typos and would overflow deadlines.
fn bounded(name: &str, value: Duration) -> Result<Duration, String> {
    if value > MAX_INTERVAL {
        return Err(format!(
            "{} is too large ({}s); the maximum is {}s",
            name,
            value.as_secs(),
            MAX_INTERVAL.as_secs()
        ));
    }
    Ok(value)
}

fn positive(name: &str, value: Duration) -> Result<Duration, String> {
    if value.is_zero() {
        return Err(format!("{} must be greater than zero", name));
    }
    Ok(value)
}

/// Load `KEY=value` lines into the process environment. Variables that are already
/// set keep their value.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => format!("env file not found: {}", path.display()),
        _ => format!("failed to read {}: {}", path.display(), e),
    })?;

    let mut applied = 0;
    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets;
            // this runs before any other thread is started.
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parse one `.env` line. Blank lines and comments yield `None`.
pub fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    Ok(Some((key.to_string(), parse_env_value(raw.trim())?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let (quote, body) = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => (q, &raw[1..]),
        _ => {
            let unquoted = raw.split('#').next().unwrap_or_default();
            return Ok(unquoted.trim_end().to_string());
        }
    };

    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((i, ch)) = chars.next() {
        if ch == quote {
            let rest = body[i + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err(format!("unexpected characters after closing {} quote", quote));
            }
            return Ok(value);
        }
        if ch == '\\' && quote == '"' {
            let (_, escaped) = chars
                .next()
                .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
            value.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            continue;
        }
        value.push(ch);
    }
    Err(format!("unterminated {} quoted value", quote))
}
