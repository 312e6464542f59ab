//! Single-threaded dashboard loop and a log-based list view.
//!
//! Order per iteration: transport step, queued user load, queued background refresh,
//! typed commands, render on change, scroll restore, then idle until the transport's
//! next deadline.

use crate::client::ZoneSource;
use crate::services::commands::{self, parse_command};
use crate::services::preferences::PreferenceStore;
use crate::services::realtime::{CancelHandle, PushChannel, RealtimeClient};
use crate::services::scroll::ScrollContainer;
use crate::services::store::ZoneStore;
use log::{info, warn};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

const MAX_IDLE: Duration = Duration::from_millis(500);

/// Row-based viewport over the rendered zone list. Rendering a list shorter than the
/// current offset clamps it, the way a browser clamps `scrollTop`.
#[derive(Debug, Clone)]
pub struct TerminalViewport {
    offset: f64,
    rows: usize,
    content_rows: usize,
}

impl TerminalViewport {
    pub fn new(rows: usize) -> Self {
        TerminalViewport {
            offset: 0.0,
            rows: rows.max(1),
            content_rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn max_offset(&self) -> f64 {
        self.content_rows.saturating_sub(self.rows) as f64
    }

    /// Record the height of freshly rendered content.
    pub fn content_rendered(&mut self, content_rows: usize) {
        self.content_rows = content_rows;
        self.offset = self.offset.min(self.max_offset());
    }

    /// Index range of the rows currently on screen.
    pub fn window(&self) -> std::ops::Range<usize> {
        let start = (self.offset.max(0.0) as usize).min(self.content_rows);
        start..(start + self.rows).min(self.content_rows)
    }
}

impl ScrollContainer for TerminalViewport {
    fn scroll_offset(&self) -> f64 {
        self.offset
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.offset = offset.clamp(0.0, self.max_offset().max(0.0));
    }
}

/// Draw the visible slice of the list to the log.
pub fn render<S, P>(store: &mut ZoneStore<S, P, TerminalViewport>, mode_line: &str)
where
    S: ZoneSource,
    P: PreferenceStore,
{
    let rows = store.visible_zones().cloned().collect::<Vec<_>>();
    store.viewport_mut().content_rendered(rows.len());
    let window = store.viewport().window();

    info!("── zones {}-{} of {} · {} ──", window.start + 1, window.end, rows.len(), mode_line);
    if store.is_loading() {
        info!("… loading zones");
    }
    if let Some(notice) = store.transport_notice() {
        info!("! {}", notice);
    }
    if store.safety_alert_active() {
        info!("! Safety alert active");
    }
    if let Some(err) = store.load_error() {
        info!("! Unable to load zones: {}", err);
    }
    for zone in &rows[window] {
        let state = zone.attributes.get("state").and_then(|v| v.as_str()).unwrap_or("-");
        let target = zone
            .attributes
            .get("target_temperature")
            .and_then(|v| v.as_f64())
            .map(|t| format!("{:.1}°C", t))
            .unwrap_or_else(|| "-".to_string());
        let marker = if zone.hidden { "·" } else { " " };
        info!("{} {:<24} {:<8} {}", marker, zone.display_name(), state, target);
    }
}

pub fn run_loop<C, S, P>(
    store: &mut ZoneStore<S, P, TerminalViewport>,
    transport: &mut RealtimeClient<C, S>,
    input: &Receiver<String>,
    cancel: &CancelHandle,
) -> Result<(), String>
where
    C: PushChannel,
    S: ZoneSource + Sync,
    P: PreferenceStore,
{
    let mut rendered: Option<u64> = None;

    while !cancel.is_cancelled() {
        let wait = transport.step(Instant::now(), store);
        if let Some(Err(e)) = store.run_requested_load() {
            warn!("Refresh failed: {}", e);
        }
        store.run_pending_refresh();

        for line in input.try_iter() {
            match parse_command(&line) {
                Ok(Some(command)) => {
                    if commands::apply(command, store, cancel) {
                        rendered = None;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }

        if rendered != Some(store.revision()) {
            let metrics = transport.metrics();
            let mode_line = format!(
                "{} mode, reconnects={}, last event {}",
                transport.mode(),
                metrics.reconnect_count,
                metrics
                    .last_event_at
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            render(store, &mode_line);
            store.frame_rendered();
            rendered = Some(store.revision());
        }

        if !wait.is_zero() && !cancel.is_cancelled() {
            thread::sleep(wait.min(MAX_IDLE));
        }
    }

    transport.shutdown();
    info!("Dashboard loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::zone::Zone;
    use crate::services::preferences::MemoryPreferenceStore;
    use crate::services::realtime::{RealtimeEvent, TransportConfig};
    use crate::testing::{FakeSource, ScriptedChannel};
    use std::sync::mpsc;

    fn zones(n: usize) -> Vec<Zone> {
        (0..n).map(|i| Zone::new(format!("z{i}"))).collect()
    }

    #[test]
    fn viewport_clamps_to_content() {
        let mut viewport = TerminalViewport::new(5);
        viewport.content_rendered(20);
        viewport.set_scroll_offset(12.0);
        assert_eq!(viewport.window(), 12..17);

        viewport.content_rendered(8);
        assert_eq!(viewport.scroll_offset(), 3.0);
        assert_eq!(viewport.window(), 3..8);
    }

    #[test]
    fn snapshot_keeps_scroll_position_across_render() {
        let source = FakeSource::new();
        let mut store = ZoneStore::new(source, MemoryPreferenceStore::new(), TerminalViewport::new(5), 3);
        store.apply_snapshot(zones(20));
        render(&mut store, "push");
        store.frame_rendered();
        store.viewport_mut().set_scroll_offset(10.0);

        // a shorter list would clamp the offset during render
        store.handle_event(RealtimeEvent::ZonesSnapshot(zones(12)));
        render(&mut store, "push");
        store.frame_rendered();
        assert_eq!(store.viewport().scroll_offset(), 7.0);

        store.handle_event(RealtimeEvent::ZonesSnapshot(zones(30)));
        store.viewport_mut().content_rendered(5);
        render(&mut store, "push");
        store.frame_rendered();
        assert_eq!(store.viewport().scroll_offset(), 7.0);
    }

    #[test]
    fn loop_stops_and_tears_down_on_cancel() {
        let channel = ScriptedChannel::new();
        channel.accept_connect();
        let source = FakeSource::new();
        let mut store = ZoneStore::new(source.clone(), MemoryPreferenceStore::new(), TerminalViewport::new(5), 3);
        let cancel = CancelHandle::new();
        let mut transport = RealtimeClient::new(channel.clone(), source, TransportConfig::default(), cancel.clone());

        let (_tx, commands) = mpsc::channel();
        cancel.cancel();
        run_loop(&mut store, &mut transport, &commands, &cancel).expect("loop exits cleanly");
        assert_eq!(channel.connect_attempts(), 0);
        assert!(!store.is_connected());
    }

    #[test]
    fn typed_refresh_and_move_reach_the_store() {
        let channel = ScriptedChannel::new();
        channel.accept_connect();
        let source = FakeSource::new();
        source.set_zones(zones(3));
        let mut store = ZoneStore::new(source.clone(), MemoryPreferenceStore::new(), TerminalViewport::new(5), 3);
        let cancel = CancelHandle::new();
        let mut transport = RealtimeClient::new(channel, source.clone(), TransportConfig::default(), cancel.clone());

        let (tx, commands) = mpsc::channel();
        tx.send("refresh".to_string()).unwrap();
        let quitter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            tx.send("move z2 1".to_string()).unwrap();
            tx.send("quit".to_string()).unwrap();
        });
        run_loop(&mut store, &mut transport, &commands, &cancel).expect("loop exits cleanly");
        quitter.join().unwrap();

        assert!(!store.is_loading());
        assert_eq!(source.zone_fetches(), 1);
        let ids = store.zones().iter().map(|z| z.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["z2", "z0", "z1"]);
    }
}
