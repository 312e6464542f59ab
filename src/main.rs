pub mod models {
    pub mod zone;
}

pub mod client;
pub mod config;
pub mod utils;
pub mod services {
    pub mod commands;
    pub mod dashboard;
    pub mod health;
    pub mod merge;
    pub mod preferences;
    pub mod realtime;
    pub mod scroll;
    pub mod store;
    pub mod websocket;
}

#[cfg(test)]
mod testing;

use crate::client::DashboardClient;
use crate::config::Config;
use crate::services::commands;
use crate::services::dashboard::{self, TerminalViewport};
use crate::services::preferences::FilePreferenceStore;
use crate::services::realtime::{CancelHandle, RealtimeClient};
use crate::services::store::ZoneStore;
use crate::services::websocket::WebSocketChannel;
use log::{error, info, warn};
use std::path::PathBuf;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (api={}, ws={}, poll_interval={}s, connect_timeout={}s, failure_threshold={}, backoff={}ms..{}s, probe={}, token={})",
        cfg.api_url,
        cfg.ws_url,
        cfg.poll_interval.as_secs(),
        cfg.connect_timeout.as_secs(),
        cfg.failure_threshold,
        cfg.reconnect_backoff.as_millis(),
        cfg.reconnect_backoff_max.as_secs(),
        cfg.push_probe_interval
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "off".to_string()),
        if cfg.api_token.is_some() { "set" } else { "-" }
    );

    // 2) Cancellation on SIGINT/SIGTERM
    let cancel = CancelHandle::new();
    register_signals(&cancel)?;

    // 3) Store with persisted ordering and the data client
    let client = DashboardClient::new(cfg.api_url.clone(), cfg.api_token.clone(), cfg.request_timeout);
    let prefs = FilePreferenceStore::open(&cfg.preferences_file);
    info!("Using preferences file {}", prefs.path().display());
    let mut store = ZoneStore::new(
        client.clone(),
        prefs,
        TerminalViewport::new(cfg.viewport_rows),
        cfg.failure_threshold.get(),
    );
    store.set_show_hidden(cfg.show_hidden);

    // 4) Initial foreground load; failure leaves an empty list, updates may still arrive
    if let Err(e) = store.load() {
        warn!("Initial load failed, waiting for realtime updates: {}", e);
    }

    // 5) Realtime transport loop, with typed commands from stdin
    let channel = WebSocketChannel::new(cfg.ws_url.clone(), cfg.api_token.clone());
    let mut transport = RealtimeClient::new(channel, client, cfg.transport(), cancel.clone());
    let commands = commands::spawn_stdin_reader()?;
    info!("{}", commands::HELP);
    dashboard::run_loop(&mut store, &mut transport, &commands, &cancel)
}

#[cfg(unix)]
fn register_signals(cancel: &CancelHandle) -> Result<(), String> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())
            .map_err(|e| format!("failed to register signal {}: {}", signal, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_signals(_cancel: &CancelHandle) -> Result<(), String> {
    Ok(())
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let value = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            Some(s) if s.starts_with("--env-file=") => match &s["--env-file=".len()..] {
                "" => return Err("`--env-file` requires a path argument".to_string()),
                path => PathBuf::from(path),
            },
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        if env_file.replace(value).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }

    let (path, explicit) = match env_file {
        Some(path) => (path, true),
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = config::load_env_file(&path)?;
    Ok(Some(LoadedEnvFile {
        path,
        explicit,
        applied,
    }))
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "zone-dashboard {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
