//! Blocking HTTP client for the heating backend's zone endpoints.
//!
//! - Uses `ureq` (no async); one shared agent with a global request timeout.
//! - Sends a static bearer token when configured. Token acquisition is out of scope.
//! - Non-2xx responses keep their body as the error message.

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::models::zone::{SafetyAlertStatus, Zone, ZonesResponse};

const ZONES_PATH: &str = "/zones";
const SAFETY_STATUS_PATH: &str = "/safety/status";

#[derive(Debug)]
pub enum ClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClientError::Transport(s) => write!(f, "transport error: {}", s),
            ClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            ClientError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Json(e) => Some(e.inner()),
            _ => None,
        }
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for ClientError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        ClientError::Json(value)
    }
}

/// Where full zone snapshots and auxiliary status come from.
pub trait ZoneSource {
    fn fetch_zones(&self) -> Result<Vec<Zone>, ClientError>;

    /// `Ok(None)` when the backend has no safety sensor configured.
    fn fetch_safety_alert(&self) -> Result<Option<SafetyAlertStatus>, ClientError>;
}

#[derive(Clone)]
pub struct DashboardClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl DashboardClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        DashboardClient {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GET `path` and return status plus raw body.
    fn get(&self, path: &str) -> Result<(http::StatusCode, String), ClientError> {
        let mut req = self.agent.get(&self.url(path)).header("Accept", "application/json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let mut res = req.call().map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = res.status();
        let body = res
            .body_mut()
            .read_to_string()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok((status, body))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let (status, body) = self.get(path)?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        decode_json(&body)
    }

    pub fn get_zones(&self) -> Result<Vec<Zone>, ClientError> {
        self.get_json::<ZonesResponse>(ZONES_PATH).map(ZonesResponse::into_zones)
    }

    pub fn get_safety_status(&self) -> Result<Option<SafetyAlertStatus>, ClientError> {
        let (status, body) = self.get(SAFETY_STATUS_PATH)?;
        if status == http::StatusCode::NOT_FOUND || status == http::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }
        decode_json(&body).map(Some)
    }
}

impl ZoneSource for DashboardClient {
    fn fetch_zones(&self) -> Result<Vec<Zone>, ClientError> {
        self.get_zones()
    }

    fn fetch_safety_alert(&self) -> Result<Option<SafetyAlertStatus>, ClientError> {
        self.get_safety_status()
    }
}

/// Deserialize a JSON body, keeping the path of the first mismatch.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    Ok(serde_path_to_error::deserialize(de)?)
}
