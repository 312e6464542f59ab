//! Hand-written fakes shared by unit tests.

use crate::client::{ClientError, ZoneSource};
use crate::models::zone::{SafetyAlertStatus, Zone};
use crate::services::realtime::{PushChannel, TransportError};
use crate::services::scroll::ScrollContainer;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Recv {
    Frame(String),
    Drop,
}

#[derive(Default)]
struct ChannelScript {
    connects: VecDeque<bool>,
    frames: VecDeque<Recv>,
    connect_attempts: usize,
    last_connect_timeout: Option<Duration>,
    closed: bool,
}

/// Push channel that replays scripted connect outcomes and frames.
/// Unscripted connects are refused; an empty frame queue means "nothing arrived".
#[derive(Clone, Default)]
pub struct ScriptedChannel(Arc<Mutex<ChannelScript>>);

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_connect(&self) {
        self.0.lock().unwrap().connects.push_back(true);
    }

    pub fn refuse_connect(&self) {
        self.0.lock().unwrap().connects.push_back(false);
    }

    pub fn push_frame(&self, text: String) {
        self.0.lock().unwrap().frames.push_back(Recv::Frame(text));
    }

    pub fn drop_connection(&self) {
        self.0.lock().unwrap().frames.push_back(Recv::Drop);
    }

    pub fn connect_attempts(&self) -> usize {
        self.0.lock().unwrap().connect_attempts
    }

    pub fn last_connect_timeout(&self) -> Option<Duration> {
        self.0.lock().unwrap().last_connect_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}

impl PushChannel for ScriptedChannel {
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut script = self.0.lock().unwrap();
        script.connect_attempts += 1;
        script.last_connect_timeout = Some(timeout);
        match script.connects.pop_front() {
            Some(true) => {
                script.closed = false;
                Ok(())
            }
            _ => Err(TransportError::Connect("connection refused".to_string())),
        }
    }

    fn recv(&mut self, _timeout: Duration) -> Result<Option<String>, TransportError> {
        match self.0.lock().unwrap().frames.pop_front() {
            Some(Recv::Frame(text)) => Ok(Some(text)),
            Some(Recv::Drop) => Err(TransportError::Closed),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
struct SourceState {
    zones: Option<Result<Vec<Zone>, String>>,
    safety: Option<Result<Option<SafetyAlertStatus>, String>>,
    zone_fetches: usize,
}

/// Zone source returning whatever was last configured.
#[derive(Clone, Default)]
pub struct FakeSource(Arc<Mutex<SourceState>>);

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_zones(&self, zones: Vec<Zone>) {
        self.0.lock().unwrap().zones = Some(Ok(zones));
    }

    pub fn fail_zones(&self, message: &str) {
        self.0.lock().unwrap().zones = Some(Err(message.to_string()));
    }

    pub fn set_safety(&self, status: Option<SafetyAlertStatus>) {
        self.0.lock().unwrap().safety = Some(Ok(status));
    }

    pub fn fail_safety(&self, message: &str) {
        self.0.lock().unwrap().safety = Some(Err(message.to_string()));
    }

    pub fn zone_fetches(&self) -> usize {
        self.0.lock().unwrap().zone_fetches
    }
}

impl ZoneSource for FakeSource {
    fn fetch_zones(&self) -> Result<Vec<Zone>, ClientError> {
        let mut state = self.0.lock().unwrap();
        state.zone_fetches += 1;
        match &state.zones {
            Some(Ok(zones)) => Ok(zones.clone()),
            Some(Err(message)) => Err(ClientError::Transport(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn fetch_safety_alert(&self) -> Result<Option<SafetyAlertStatus>, ClientError> {
        match &self.0.lock().unwrap().safety {
            Some(Ok(status)) => Ok(*status),
            Some(Err(message)) => Err(ClientError::Http {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(None),
        }
    }
}

/// Scrollable list that jumps back to the top whenever its content is replaced,
/// like a browser list re-rendered from scratch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeViewport {
    pub offset: f64,
    pub writes: Vec<f64>,
}

impl FakeViewport {
    pub fn at(offset: f64) -> Self {
        FakeViewport {
            offset,
            writes: Vec::new(),
        }
    }

    pub fn content_replaced(&mut self) {
        self.offset = 0.0;
    }
}

impl ScrollContainer for FakeViewport {
    fn scroll_offset(&self) -> f64 {
        self.offset
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.offset = offset;
        self.writes.push(offset);
    }
}
