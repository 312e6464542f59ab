//! Realtime transport: push channel with a polling fallback.
//!
//! The client is driven cooperatively: each `step` does at most one unit of work
//! (connect attempt, one received frame, one poll fetch) and tells the caller how long
//! it may idle. Whichever strategy is active, consumers see the same `RealtimeEvent`s.

use crate::client::ZoneSource;
use crate::models::zone::{PushFrame, Zone, ZoneId};
use crate::services::health::{ConnectionHealth, TransportMode};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const BACKOFF_JITTER: f64 = 0.2;

/// Longest wait the client schedules for any deadline.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Receive(String),
    Closed,
    Decode { path: String, message: String },
    Fetch(String),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Connect(s) => write!(f, "connect failed: {}", s),
            TransportError::Receive(s) => write!(f, "receive failed: {}", s),
            TransportError::Closed => write!(f, "connection closed by peer"),
            TransportError::Decode { path, message } => write!(f, "bad frame at {}: {}", path, message),
            TransportError::Fetch(s) => write!(f, "poll fetch failed: {}", s),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connected,
    Disconnected,
    ZonesSnapshot(Vec<Zone>),
    ZoneUpdated(Zone),
    ZoneDeleted(ZoneId),
    TransportError(TransportError),
    ModeChanged(TransportMode),
}

/// Receiver of transport events.
pub trait EventSink {
    fn deliver(&mut self, event: RealtimeEvent);
}

impl EventSink for Vec<RealtimeEvent> {
    fn deliver(&mut self, event: RealtimeEvent) {
        self.push(event);
    }
}

/// A live, message-oriented push connection.
pub trait PushChannel {
    /// Open the connection, giving up after `timeout` on any single network wait.
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one text frame. `Ok(None)` means nothing arrived.
    /// An `Err` means the connection is gone.
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    fn close(&mut self);
}

/// Cancels every pending reconnect, probe and poll of a client at once.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub failure_threshold: NonZeroU32,
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How often poll mode retries the push channel. `None` never retries.
    pub probe_interval: Option<Duration>,
    /// Upper bound for one blocking receive while connected.
    pub recv_timeout: Duration,
    /// Upper bound for the TCP connect and for each read or write of the handshake.
    pub connect_timeout: Duration,
    pub jitter: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            failure_threshold: ConnectionHealth::default().threshold(),
            poll_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            probe_interval: Some(Duration::from_secs(60)),
            recv_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportMetrics {
    pub reconnect_count: u64,
    pub connect_failures: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub polls_completed: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

pub struct RealtimeClient<C: PushChannel, S: ZoneSource> {
    channel: C,
    source: S,
    config: TransportConfig,
    health: ConnectionHealth,
    metrics: TransportMetrics,
    cancel: CancelHandle,
    connected: bool,
    ever_connected: bool,
    shut_down: bool,
    next_attempt_at: Option<Instant>,
    next_poll_at: Option<Instant>,
    next_probe_at: Option<Instant>,
}

impl<C: PushChannel, S: ZoneSource> RealtimeClient<C, S> {
    pub fn new(channel: C, source: S, config: TransportConfig, cancel: CancelHandle) -> Self {
        RealtimeClient {
            channel,
            source,
            health: ConnectionHealth::new(config.failure_threshold),
            config,
            metrics: TransportMetrics::default(),
            cancel,
            connected: false,
            ever_connected: false,
            shut_down: false,
            next_attempt_at: None,
            next_poll_at: None,
            next_probe_at: None,
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.health.mode()
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_live(&self) -> bool {
        !self.shut_down && !self.cancel.is_cancelled()
    }

    /// Do one unit of work and return how long the caller may idle before the next
    /// step is due.
    pub fn step(&mut self, now: Instant, sink: &mut dyn EventSink) -> Duration {
        if !self.is_live() {
            if !self.shut_down {
                self.shutdown();
            }
            return self.config.recv_timeout;
        }
        match self.health.mode() {
            TransportMode::Push => self.step_push(now, sink),
            TransportMode::Poll => self.step_poll(now, sink),
        }
    }

    /// Close the channel and stop delivering events. Idempotent.
    pub fn shutdown(&mut self) {
        if self.connected {
            self.channel.close();
            self.connected = false;
        }
        if !self.shut_down {
            info!(
                "Realtime transport stopped (mode={}, reconnects={}, frames={}, polls={})",
                self.health.mode(),
                self.metrics.reconnect_count,
                self.metrics.frames_received,
                self.metrics.polls_completed
            );
        }
        self.shut_down = true;
    }

    fn step_push(&mut self, now: Instant, sink: &mut dyn EventSink) -> Duration {
        if self.connected {
            self.receive_one(now, sink);
            return Duration::ZERO;
        }
        if let Some(at) = self.next_attempt_at
            && now < at
        {
            return at - now;
        }
        self.try_connect(now, sink);
        self.until_next_attempt(now)
    }

    fn step_poll(&mut self, now: Instant, sink: &mut dyn EventSink) -> Duration {
        if let Some(probe_at) = self.next_probe_at
            && now >= probe_at
        {
            self.next_probe_at = self.config.probe_interval.map(|every| deadline(now, every));
            debug!("Probing push channel from poll mode");
            if self.try_connect(now, sink) {
                return Duration::ZERO;
            }
        }

        let poll_at = *self.next_poll_at.get_or_insert(now);
        if now >= poll_at {
            self.next_poll_at = Some(deadline(now, self.config.poll_interval));
            self.poll_once(sink);
        }

        let mut wait = self.next_poll_at.map_or(self.config.poll_interval, |at| at.saturating_duration_since(now));
        if let Some(probe_at) = self.next_probe_at {
            wait = wait.min(probe_at.saturating_duration_since(now));
        }
        wait
    }

    fn poll_once(&mut self, sink: &mut dyn EventSink) {
        match self.source.fetch_zones() {
            Ok(zones) => {
                self.metrics.polls_completed += 1;
                self.metrics.last_event_at = Some(Utc::now());
                debug!("Poll delivered {} zone(s)", zones.len());
                sink.deliver(RealtimeEvent::ZonesSnapshot(zones));
            }
            Err(e) => {
                warn!("Zone poll failed: {}", e);
                sink.deliver(RealtimeEvent::TransportError(TransportError::Fetch(e.to_string())));
            }
        }
    }

    /// Returns whether the channel is now connected.
    fn try_connect(&mut self, now: Instant, sink: &mut dyn EventSink) -> bool {
        match self.channel.connect(self.config.connect_timeout) {
            Ok(()) => {
                let connected_at = Utc::now();
                let transition = self.health.on_connected(connected_at);
                if self.ever_connected {
                    self.metrics.reconnect_count += 1;
                }
                self.ever_connected = true;
                self.connected = true;
                self.next_attempt_at = None;
                self.next_poll_at = None;
                self.next_probe_at = None;
                self.metrics.last_connected_at = Some(connected_at);
                info!("Push channel connected (reconnects={})", self.metrics.reconnect_count);
                sink.deliver(RealtimeEvent::Connected);
                if transition.mode_changed() {
                    info!("Realtime updates restored over push");
                    sink.deliver(RealtimeEvent::ModeChanged(TransportMode::Push));
                }
                true
            }
            Err(e) => {
                self.metrics.connect_failures += 1;
                warn!("Push channel {}", e);
                sink.deliver(RealtimeEvent::TransportError(e));
                self.record_failure(now, sink);
                false
            }
        }
    }

    fn receive_one(&mut self, now: Instant, sink: &mut dyn EventSink) {
        match self.channel.recv(self.config.recv_timeout) {
            Ok(Some(text)) => self.dispatch_frame(&text, sink),
            Ok(None) => {}
            Err(e) => {
                warn!("Push channel dropped: {}", e);
                self.channel.close();
                self.connected = false;
                sink.deliver(RealtimeEvent::Disconnected);
                self.record_failure(now, sink);
            }
        }
    }

    fn dispatch_frame(&mut self, text: &str, sink: &mut dyn EventSink) {
        match decode_frame(text) {
            Ok(Some(event)) => {
                self.metrics.frames_received += 1;
                self.metrics.last_event_at = Some(Utc::now());
                sink.deliver(event);
            }
            Ok(None) => debug!("Ignoring push frame of unhandled type"),
            Err(e) => {
                self.metrics.decode_errors += 1;
                warn!("Dropping push frame: {}", e);
                sink.deliver(RealtimeEvent::TransportError(e));
            }
        }
    }

    fn record_failure(&mut self, now: Instant, sink: &mut dyn EventSink) {
        let transition = self.health.on_failure();
        let failures = self.health.consecutive_failures();
        self.next_attempt_at = Some(deadline(now, self.backoff(failures)));

        if transition.mode_changed() {
            warn!(
                "Push channel failed {} times; falling back to polling every {}s",
                failures,
                self.config.poll_interval.as_secs()
            );
            self.next_poll_at = Some(now);
            self.next_probe_at = self.config.probe_interval.map(|every| deadline(now, every));
            sink.deliver(RealtimeEvent::ModeChanged(TransportMode::Poll));
        }
    }

    fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let cap = self.config.backoff_max.min(MAX_INTERVAL);
        let base = self.config.backoff_base.saturating_mul(1u32 << exp).min(cap);
        if !self.config.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range(1.0..=1.0 + BACKOFF_JITTER);
        base.mul_f64(factor).min(cap)
    }

    fn until_next_attempt(&self, now: Instant) -> Duration {
        if self.connected {
            return Duration::ZERO;
        }
        match self.health.mode() {
            TransportMode::Push => self
                .next_attempt_at
                .map_or(Duration::ZERO, |at| at.saturating_duration_since(now)),
            // first poll is due immediately after a downgrade
            TransportMode::Poll => Duration::ZERO,
        }
    }
}

fn deadline(now: Instant, after: Duration) -> Instant {
    now + after.min(MAX_INTERVAL)
}

/// Decode one text frame. `Ok(None)` for frame types this client does not handle.
pub fn decode_frame(text: &str) -> Result<Option<RealtimeEvent>, TransportError> {
    let de = &mut serde_json::Deserializer::from_str(text);
    let frame: PushFrame = serde_path_to_error::deserialize(de).map_err(|e| TransportError::Decode {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })?;
    Ok(match frame {
        PushFrame::ZonesUpdated { zones } => Some(RealtimeEvent::ZonesSnapshot(zones)),
        PushFrame::ZoneUpdated { zone } => Some(RealtimeEvent::ZoneUpdated(zone)),
        PushFrame::ZoneDeleted { zone_id } => Some(RealtimeEvent::ZoneDeleted(zone_id)),
        PushFrame::Unknown => None,
    })
}
