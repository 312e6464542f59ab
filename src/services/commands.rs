//! Line commands typed into the running dashboard.
//!
//! A reader thread forwards stdin lines over a channel; the dashboard loop drains it
//! between transport steps so user actions never wait on a blocking read.

use crate::client::ZoneSource;
use crate::models::zone::ZoneId;
use crate::services::dashboard::TerminalViewport;
use crate::services::preferences::PreferenceStore;
use crate::services::realtime::CancelHandle;
use crate::services::scroll::ScrollContainer;
use crate::services::store::ZoneStore;
use log::{debug, info, warn};
use std::io::{self, BufRead};
use std::sync::mpsc;
use std::thread;

pub const HELP: &str = "commands: refresh | dismiss | hidden on|off | move <zone> <position> | \
                        cards <zone> [a,b,..] | scroll <rows> | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Refresh,
    Dismiss,
    ShowHidden(bool),
    /// Drag `zone` to the 1-based list `position`.
    Move { zone: ZoneId, position: usize },
    /// Show the area's card order, or save a new one when `order` is given.
    Cards { zone: ZoneId, order: Option<Vec<String>> },
    Scroll(i64),
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args = words.collect::<Vec<_>>();

    let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("refresh" | "r", []) => Command::Refresh,
        ("dismiss", []) => Command::Dismiss,
        ("hidden", [flag]) => match flag.to_ascii_lowercase().as_str() {
            "on" | "show" => Command::ShowHidden(true),
            "off" | "hide" => Command::ShowHidden(false),
            other => return Err(format!("hidden expects on or off, got {:?}", other)),
        },
        ("move", [zone, position]) => {
            let position = position
                .parse::<usize>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| format!("position must be a number from 1, got {:?}", position))?;
            Command::Move {
                zone: ZoneId::from(*zone),
                position,
            }
        }
        ("cards", [zone]) => Command::Cards {
            zone: ZoneId::from(*zone),
            order: None,
        },
        ("cards", [zone, order]) => Command::Cards {
            zone: ZoneId::from(*zone),
            order: Some(
                order
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        },
        ("scroll", [rows]) => Command::Scroll(
            rows.parse::<i64>()
                .map_err(|_| format!("scroll expects a row count, got {:?}", rows))?,
        ),
        ("help" | "?", []) => Command::Help,
        ("quit" | "q" | "exit", []) => Command::Quit,
        _ => return Err(format!("unrecognised command {:?}; {}", line.trim(), HELP)),
    };
    Ok(Some(command))
}

/// Forward stdin lines until EOF.
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>, String> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("Command input closed");
        })
        .map_err(|e| format!("failed to start command reader: {}", e))?;
    Ok(rx)
}

/// Apply a command. Returns whether the list must be redrawn even though the store
/// revision did not change, as after scrolling.
pub fn apply<S, P>(command: Command, store: &mut ZoneStore<S, P, TerminalViewport>, cancel: &CancelHandle) -> bool
where
    S: ZoneSource,
    P: PreferenceStore,
{
    match command {
        Command::Refresh => {
            store.request_load();
            false
        }
        Command::Dismiss => {
            store.dismiss_transport_notice();
            false
        }
        Command::ShowHidden(show) => {
            store.set_show_hidden(show);
            false
        }
        Command::Move { zone, position } => {
            match store.zones().iter().position(|z| z.id == zone) {
                Some(from) => {
                    store.move_zone(from, position - 1);
                    info!("Moved {} to position {}", zone, position.min(store.zones().len()));
                }
                None => warn!("No zone {}", zone),
            }
            false
        }
        Command::Cards { zone, order } => {
            let Some(sections) = store
                .zones()
                .iter()
                .find(|z| z.id == zone)
                .map(|z| z.attributes.keys().cloned().collect::<Vec<_>>())
            else {
                warn!("No zone {}", zone);
                return false;
            };
            if let Some(order) = order {
                store.reorder_cards(&zone, &order);
            }
            info!("Cards for {}: {}", zone, store.card_order(&zone, &sections).join(", "));
            false
        }
        Command::Scroll(rows) => {
            let viewport = store.viewport_mut();
            let offset = viewport.scroll_offset() + rows as f64;
            viewport.set_scroll_offset(offset);
            true
        }
        Command::Help => {
            info!("{}", HELP);
            false
        }
        Command::Quit => {
            cancel.cancel();
            false
        }
    }
}
