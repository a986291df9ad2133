use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::CastError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

/// Capability bits advertised by receivers in the `ca` TXT record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceCapabilities(u32);

impl DeviceCapabilities {
    pub const NONE: DeviceCapabilities = DeviceCapabilities(0);
    pub const VIDEO_OUT: DeviceCapabilities = DeviceCapabilities(1);
    pub const VIDEO_IN: DeviceCapabilities = DeviceCapabilities(2);
    pub const AUDIO_OUT: DeviceCapabilities = DeviceCapabilities(4);
    pub const AUDIO_IN: DeviceCapabilities = DeviceCapabilities(8);
    pub const MULTIZONE_GROUP: DeviceCapabilities = DeviceCapabilities(32);

    pub fn from_bits(bits: u32) -> Self {
        DeviceCapabilities(bits)
    }

    /// Parses the decimal `ca` value; garbage decodes to no capability.
    pub fn from_txt(value: &str) -> Self {
        DeviceCapabilities(value.trim().parse().unwrap_or(0))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: DeviceCapabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_group(&self) -> bool {
        self.contains(Self::MULTIZONE_GROUP)
    }
}

impl BitOr for DeviceCapabilities {
    type Output = DeviceCapabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        DeviceCapabilities(self.0 | rhs.0)
    }
}

/// A receiver as last advertised by the discovery transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub model: String,
    pub capabilities: DeviceCapabilities,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub is_nearby: bool,
    pub discovered_at: DateTime<Utc>,
}

impl Device {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: DeviceId::from(id),
            name: name.to_string(),
            model: String::new(),
            capabilities: DeviceCapabilities::VIDEO_OUT | DeviceCapabilities::AUDIO_OUT,
            host: None,
            port: None,
            is_nearby: false,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = Some(host.to_string());
        self.port = Some(port);
        self
    }

    pub fn nearby(mut self) -> Self {
        self.is_nearby = true;
        self
    }

    /// True when both describe the same advertisement, ignoring when it was seen.
    pub fn same_advertisement(&self, other: &Device) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.model == other.model
            && self.capabilities == other.capabilities
            && self.host == other.host
            && self.port == other.port
            && self.is_nearby == other.is_nearby
    }

    pub fn route_info(&self) -> RouteInfo {
        RouteInfo {
            id: self.id.0.clone(),
            name: self.name.clone(),
            description: self.model.clone(),
            is_nearby_device: self.is_nearby,
        }
    }
}

/// Application-facing projection of a [`Device`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_nearby_device: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Resuming,
    Ending,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Resuming => "resuming",
            SessionState::Ending => "ending",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session is torn down: `Stop` also stops the receiver application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EndMode {
    #[default]
    Stop,
    Leave,
}

impl EndMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndMode::Stop => "stop",
            EndMode::Leave => "leave",
        }
    }
}

impl FromStr for EndMode {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(EndMode::Stop),
            "leave" => Ok(EndMode::Leave),
            other => Err(CastError::InvalidParameter(format!(
                "unknown end mode '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEndStatus {
    Stopped,
    Error,
}

impl SessionEndStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEndStatus::Stopped => "stopped",
            SessionEndStatus::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub level: f64,
    pub muted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverInfo {
    pub friendly_name: String,
    pub label: String,
    pub volume: Volume,
}

/// Media item description, metadata keyed by application field names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub content_id: String,
    pub content_type: String,
    pub custom_data: Value,
    pub duration: Option<f64>,
    pub stream_type: String,
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatus {
    pub current_item_id: Option<i64>,
    pub current_time: f64,
    pub custom_data: Value,
    pub media_session_id: i64,
    pub playback_rate: f64,
    pub player_state: Option<String>,
    pub idle_reason: Option<String>,
    pub is_alive: bool,
    pub repeat_mode: Option<String>,
    pub volume: Volume,
    pub media: Option<MediaInfo>,
    pub session_id: String,
}

/// Last-known state of the receiver session. Replaced wholesale, never
/// edited in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub app_id: String,
    pub display_name: String,
    pub session_id: String,
    pub app_images: Vec<Image>,
    pub receiver: ReceiverInfo,
    pub media: Vec<MediaStatus>,
    pub status: String,
}

impl SessionSnapshot {
    pub fn with_status(&self, status: &str) -> SessionSnapshot {
        SessionSnapshot {
            status: status.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_decode_txt_bits() {
        let caps = DeviceCapabilities::from_txt("37");
        assert!(caps.contains(DeviceCapabilities::VIDEO_OUT));
        assert!(caps.contains(DeviceCapabilities::AUDIO_OUT));
        assert!(caps.is_group());
        assert!(!caps.contains(DeviceCapabilities::VIDEO_IN));
        assert_eq!(DeviceCapabilities::from_txt("x"), DeviceCapabilities::NONE);
    }

    #[test]
    fn route_info_serializes_camel_case() {
        let device = Device::new("d1", "Living room").with_model("Chromecast").nearby();
        let route = serde_json::to_value(device.route_info()).unwrap();
        assert_eq!(route["id"], "d1");
        assert_eq!(route["description"], "Chromecast");
        assert_eq!(route["isNearbyDevice"], true);
    }

    #[test]
    fn same_advertisement_ignores_timestamp() {
        let a = Device::new("d1", "Kitchen");
        let mut b = a.clone();
        b.discovered_at = a.discovered_at + chrono::Duration::seconds(5);
        assert!(a.same_advertisement(&b));
        b.name = "Den".to_string();
        assert!(!a.same_advertisement(&b));
    }

    #[test]
    fn end_mode_parses_case_insensitively() {
        assert_eq!("Leave".parse::<EndMode>().unwrap(), EndMode::Leave);
        assert_eq!("stop".parse::<EndMode>().unwrap(), EndMode::Stop);
        assert!("destroy".parse::<EndMode>().is_err());
    }
}
