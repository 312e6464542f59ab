//! The authoritative zone list and the view flags around it.
//!
//! Every change to the list is a full-value replace committed through `commit`, which
//! is wrapped by scroll preservation. The loading flag belongs to foreground loads only.

use crate::client::{ClientError, ZoneSource};
use crate::models::zone::{SafetyAlertStatus, Zone, ZoneId};
use crate::services::health::TransportMode;
use crate::services::merge::{merge_ordered, merge_zones, order_ids_json, reorder_by_ids};
use crate::services::preferences::{PreferenceStore, ZONE_ORDER_KEY, area_card_order_key};
use crate::services::realtime::{EventSink, RealtimeEvent};
use crate::services::scroll::{ScrollContainer, ScrollPreserver};
use log::{debug, error, info, warn};
use std::thread;

/// Dismissible, non-blocking banner about the realtime link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportNotice {
    Degraded { failures: u32 },
}

impl core::fmt::Display for TransportNotice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportNotice::Degraded { failures } => write!(
                f,
                "Real-time connection failed {} times; updates now arrive by polling",
                failures
            ),
        }
    }
}

pub struct ZoneStore<S: ZoneSource, P: PreferenceStore, V: ScrollContainer> {
    source: S,
    prefs: P,
    viewport: V,
    scroll: ScrollPreserver,
    zones: Vec<Zone>,
    revision: u64,
    loading_depth: u32,
    load_error: Option<String>,
    safety_alert: bool,
    connected: bool,
    transport_mode: TransportMode,
    notice: Option<TransportNotice>,
    failure_threshold: u32,
    refresh_pending: bool,
    load_requested: bool,
    show_hidden: bool,
}

impl<S: ZoneSource, P: PreferenceStore, V: ScrollContainer> ZoneStore<S, P, V> {
    pub fn new(source: S, prefs: P, viewport: V, failure_threshold: u32) -> Self {
        ZoneStore {
            source,
            prefs,
            viewport,
            scroll: ScrollPreserver::new(),
            zones: Vec::new(),
            revision: 0,
            loading_depth: 0,
            load_error: None,
            safety_alert: false,
            connected: false,
            transport_mode: TransportMode::Push,
            notice: None,
            failure_threshold,
            refresh_pending: false,
            load_requested: false,
            show_hidden: false,
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Zones the list should draw, honouring the `hidden` flag.
    pub fn visible_zones(&self) -> impl Iterator<Item = &Zone> {
        let show_hidden = self.show_hidden;
        self.zones.iter().filter(move |z| show_hidden || !z.hidden)
    }

    pub fn shows_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn set_show_hidden(&mut self, show: bool) {
        if self.show_hidden != show {
            self.show_hidden = show;
            self.revision += 1;
        }
    }

    /// Bumped on every change the view should re-render for.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_loading(&self) -> bool {
        self.loading_depth > 0
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn safety_alert_active(&self) -> bool {
        self.safety_alert
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.transport_mode
    }

    pub fn transport_notice(&self) -> Option<&TransportNotice> {
        self.notice.as_ref()
    }

    pub fn dismiss_transport_notice(&mut self) {
        if self.notice.take().is_some() {
            self.revision += 1;
        }
    }

    pub fn viewport(&self) -> &V {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut V {
        &mut self.viewport
    }

    /// The view calls this once a frame showing the latest commit has been drawn.
    pub fn frame_rendered(&mut self) {
        self.scroll.restore(&mut self.viewport);
    }

    pub fn handle_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Connected => {
                self.connected = true;
                debug!("Store: push channel connected");
            }
            RealtimeEvent::Disconnected => {
                self.connected = false;
                debug!("Store: push channel disconnected");
            }
            RealtimeEvent::ZonesSnapshot(zones) => self.apply_snapshot(zones),
            RealtimeEvent::ZoneUpdated(zone) => self.apply_delta(zone),
            RealtimeEvent::ZoneDeleted(zone_id) => self.apply_deletion(&zone_id),
            RealtimeEvent::TransportError(e) => debug!("Store: transport reported {}", e),
            RealtimeEvent::ModeChanged(mode) => self.apply_mode(mode),
        }
    }

    pub fn apply_snapshot(&mut self, zones: Vec<Zone>) {
        let saved_order = self.prefs.get(ZONE_ORDER_KEY);
        let merged = merge_zones(&self.zones, &zones, saved_order.as_deref());
        debug!("Store: snapshot of {} zone(s) merged", merged.len());
        self.commit(merged);
    }

    /// Replace the entry with the same id. Unknown ids are ignored: membership only
    /// changes through snapshots and deletions.
    pub fn apply_delta(&mut self, zone: Zone) {
        let Some(pos) = self.zones.iter().position(|z| z.id == zone.id) else {
            debug!("Store: dropping update for unknown zone {}", zone.id);
            return;
        };
        let mut next = self.zones.clone();
        next[pos] = zone;
        self.commit(next);
    }

    /// Remove the zone and schedule a silent refresh, since device availability for
    /// the remaining zones may have changed with it.
    pub fn apply_deletion(&mut self, zone_id: &ZoneId) {
        if self.zones.iter().any(|z| &z.id == zone_id) {
            let next = self.zones.iter().filter(|z| &z.id != zone_id).cloned().collect();
            self.commit(next);
            info!("Store: zone {} removed", zone_id);
        } else {
            debug!("Store: deletion for unknown zone {}", zone_id);
        }
        self.refresh_pending = true;
    }

    fn apply_mode(&mut self, mode: TransportMode) {
        self.transport_mode = mode;
        self.notice = match mode {
            TransportMode::Poll => Some(TransportNotice::Degraded {
                failures: self.failure_threshold,
            }),
            TransportMode::Push => None,
        };
        self.revision += 1;
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    /// Run a queued background refresh, if any.
    pub fn run_pending_refresh(&mut self) {
        if std::mem::take(&mut self.refresh_pending) {
            self.refresh_in_background();
        }
    }

    /// Queue a user-triggered foreground load. The loading flag is raised now, so a
    /// frame can show it before `run_requested_load` does the fetch.
    pub fn request_load(&mut self) {
        if !self.load_requested {
            self.load_requested = true;
            self.loading_depth += 1;
            self.revision += 1;
        }
    }

    /// Fetch and merge a snapshot without showing the loading indicator. Failures are
    /// logged and leave the current list and error state untouched.
    pub fn refresh_in_background(&mut self) {
        match self.source.fetch_zones() {
            Ok(zones) => self.apply_snapshot(zones),
            Err(e) => warn!("Background zone refresh failed: {}", e),
        }
    }

    /// Apply a drag-and-drop result: set the order directly and persist it.
    pub fn reorder(&mut self, ids: &[ZoneId]) {
        let ids = ids.iter().map(ZoneId::as_str).collect::<Vec<_>>();
        self.zones = reorder_by_ids(&self.zones, &ids);
        self.revision += 1;
        self.persist(ZONE_ORDER_KEY, order_ids_json(&self.zones));
    }

    /// Move the zone at `from` to index `to` (clamped), as a drag-and-drop would.
    pub fn move_zone(&mut self, from: usize, to: usize) {
        if from >= self.zones.len() {
            return;
        }
        let mut ids = self.zones.iter().map(|z| z.id.clone()).collect::<Vec<_>>();
        let moved = ids.remove(from);
        ids.insert(to.min(ids.len()), moved);
        self.reorder(&ids);
    }

    /// Settings-card order for one area: saved order first, then `sections` order.
    pub fn card_order(&self, zone_id: &ZoneId, sections: &[String]) -> Vec<String> {
        let saved = self.prefs.get(&area_card_order_key(zone_id));
        merge_ordered(&[], sections, saved.as_deref())
    }

    pub fn reorder_cards(&mut self, zone_id: &ZoneId, sections: &[String]) {
        self.persist(&area_card_order_key(zone_id), order_ids_json(sections));
    }

    fn persist(&mut self, key: &str, value: String) {
        if let Err(e) = self.prefs.set(key, value) {
            warn!("Unable to save preference {}: {}", key, e);
        }
    }

    fn commit(&mut self, zones: Vec<Zone>) {
        self.scroll.preserve(&self.viewport, || self.zones = zones);
        self.revision += 1;
    }
}

impl<S: ZoneSource + Sync, P: PreferenceStore, V: ScrollContainer> ZoneStore<S, P, V> {
    /// Foreground load (startup or user refresh). Zones and the safety status are
    /// fetched in parallel; a safety failure never blocks the zone commit.
    pub fn load(&mut self) -> Result<(), ClientError> {
        self.loading_depth += 1;
        let (zones, safety) = fetch_zones_and_safety(&self.source);
        self.loading_depth -= 1;

        self.safety_alert = match safety {
            Ok(status) => status.is_some_and(|s| s.alert_active),
            Err(e) => {
                warn!("Safety status unavailable, assuming no alert: {}", e);
                false
            }
        };

        match zones {
            Ok(zones) => {
                self.load_error = None;
                self.apply_snapshot(zones);
                info!("Loaded {} zone(s)", self.zones.len());
                Ok(())
            }
            Err(e) => {
                error!("Loading zones failed: {}", e);
                self.load_error = Some(e.to_string());
                self.revision += 1;
                Err(e)
            }
        }
    }

    /// Run a load queued by `request_load`. `None` when nothing was queued.
    pub fn run_requested_load(&mut self) -> Option<Result<(), ClientError>> {
        if !std::mem::take(&mut self.load_requested) {
            return None;
        }
        let result = self.load();
        self.loading_depth -= 1;
        Some(result)
    }
}

fn fetch_zones_and_safety<S: ZoneSource + Sync>(
    source: &S,
) -> (Result<Vec<Zone>, ClientError>, Result<Option<SafetyAlertStatus>, ClientError>) {
    thread::scope(|scope| {
        let safety = scope.spawn(|| source.fetch_safety_alert());
        let zones = source.fetch_zones();
        let safety = safety
            .join()
            .unwrap_or_else(|_| Err(ClientError::Transport("safety status fetch panicked".to_string())));
        (zones, safety)
    })
}

impl<S: ZoneSource, P: PreferenceStore, V: ScrollContainer> EventSink for ZoneStore<S, P, V> {
    fn deliver(&mut self, event: RealtimeEvent) {
        self.handle_event(event);
    }
}
