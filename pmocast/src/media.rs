//! Media requests sent over the built-in media channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::{CastError, CastResult};
use crate::mapping;

/// Guesses a content type from a media URL.
pub trait ContentTypeSniffer: Send + Sync {
    fn sniff(&self, url: &str) -> SniffedContent;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SniffedContent {
    pub content_type: String,
    pub live: bool,
}

/// Maps well-known file extensions; everything else is assumed to be MP4.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtensionSniffer;

impl ContentTypeSniffer for ExtensionSniffer {
    fn sniff(&self, url: &str) -> SniffedContent {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();

        let (content_type, live) = if path.ends_with(".m3u8") {
            ("application/x-mpegURL", true)
        } else if path.ends_with(".mpd") {
            ("application/dash+xml", false)
        } else if path.ends_with(".webm") {
            ("video/webm", false)
        } else if path.ends_with(".mkv") {
            ("video/x-matroska", false)
        } else {
            ("video/mp4", false)
        };

        SniffedContent {
            content_type: content_type.to_string(),
            live,
        }
    }
}

/// A media item to load, in application vocabulary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadRequest {
    pub content_id: String,
    /// Sniffed from `content_id` when absent.
    pub content_type: Option<String>,
    pub custom_data: Value,
    pub duration: Option<f64>,
    /// `BUFFERED`, `LIVE` or anything else for "none". Sniffed when absent.
    pub stream_type: Option<String>,
    pub metadata: Map<String, Value>,
    pub autoplay: bool,
    pub current_time: f64,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self {
            content_id: String::new(),
            content_type: None,
            custom_data: Value::Null,
            duration: None,
            stream_type: None,
            metadata: Map::new(),
            autoplay: true,
            current_time: 0.0,
        }
    }
}

impl LoadRequest {
    pub fn new(content_id: &str) -> Self {
        Self {
            content_id: content_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_metadata(mut self, name: &str, value: Value) -> Self {
        self.metadata.insert(name.to_string(), value);
        self
    }

    /// Stores authentication data in `customData` for the receiver
    /// application to pick up.
    pub fn with_auth(mut self, headers: BTreeMap<String, String>, token: Option<String>) -> Self {
        let mut custom = match std::mem::take(&mut self.custom_data) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        custom.insert("authHeaders".to_string(), json!(headers));
        if let Some(token) = token {
            custom.insert("authToken".to_string(), Value::String(token));
        }
        self.custom_data = Value::Object(custom);
        self
    }

    /// Checks the request and fills the content and stream types.
    pub fn normalized(mut self, sniffer: &dyn ContentTypeSniffer) -> CastResult<Self> {
        if self.content_id.trim().is_empty() {
            return Err(CastError::invalid_parameter("contentId must not be empty"));
        }
        if self.current_time < 0.0 {
            return Err(CastError::invalid_parameter("currentTime must not be negative"));
        }

        let needs_sniffing = self.content_type.as_deref().is_none_or(str::is_empty)
            || self.stream_type.is_none();
        if needs_sniffing {
            let sniffed = sniffer.sniff(&self.content_id);
            if self.content_type.as_deref().is_none_or(str::is_empty) {
                self.content_type = Some(sniffed.content_type);
            }
            if self.stream_type.is_none() {
                let stream_type = if sniffed.live { "LIVE" } else { "BUFFERED" };
                self.stream_type = Some(stream_type.to_string());
            }
        }
        Ok(self)
    }

    /// The request as a receiver expects it on the media channel.
    pub fn wire_payload(&self) -> Value {
        json!({
            "contentId": self.content_id,
            "contentType": self.content_type.clone().unwrap_or_default(),
            "streamType": mapping::stream_type_to_wire(self.stream_type.as_deref().unwrap_or("")),
            "duration": self.duration,
            "customData": self.custom_data,
            "metadata": mapping::metadata_to_wire(&self.metadata),
            "autoplay": self.autoplay,
            "currentTime": self.current_time,
        })
    }
}

/// Commands for the media channel of the current session.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaCommand {
    Load(LoadRequest),
    Play,
    Pause,
    Seek(f64),
    Next,
    Prev,
    SetVolume(f64),
    SetMuted(bool),
    /// Receiver repeat mode code.
    SetRepeatMode(i64),
}

impl MediaCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MediaCommand::Load(_) => "load",
            MediaCommand::Play => "play",
            MediaCommand::Pause => "pause",
            MediaCommand::Seek(_) => "seek",
            MediaCommand::Next => "next",
            MediaCommand::Prev => "prev",
            MediaCommand::SetVolume(_) => "set_volume",
            MediaCommand::SetMuted(_) => "set_muted",
            MediaCommand::SetRepeatMode(_) => "set_repeat_mode",
        }
    }

    pub fn seek(seconds: f64) -> CastResult<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(CastError::InvalidParameter(format!(
                "invalid seek position {seconds}"
            )));
        }
        Ok(MediaCommand::Seek(seconds))
    }

    pub fn volume(level: f64) -> CastResult<Self> {
        if !(0.0..=1.0).contains(&level) {
            return Err(CastError::InvalidParameter(format!(
                "volume level {level} is outside 0.0..=1.0"
            )));
        }
        Ok(MediaCommand::SetVolume(level))
    }

    pub fn repeat_mode(mode: &str) -> CastResult<Self> {
        mapping::repeat_mode_to_wire(mode).map(MediaCommand::SetRepeatMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffer_uses_extension_and_ignores_query() {
        let sniffer = ExtensionSniffer;
        let hls = sniffer.sniff("https://cdn.example.com/LIVE/Index.M3U8?token=abc");
        assert_eq!(hls.content_type, "application/x-mpegURL");
        assert!(hls.live);
        assert_eq!(sniffer.sniff("http://h/a.mpd").content_type, "application/dash+xml");
        assert_eq!(sniffer.sniff("http://h/a.webm").content_type, "video/webm");
        assert_eq!(sniffer.sniff("http://h/a.mkv").content_type, "video/x-matroska");
        assert_eq!(sniffer.sniff("http://h/a.mp4").content_type, "video/mp4");
        assert_eq!(sniffer.sniff("http://h/stream").content_type, "video/mp4");
    }

    #[test]
    fn normalization_fills_missing_types() {
        let request = LoadRequest::new("http://h/live.m3u8")
            .normalized(&ExtensionSniffer)
            .unwrap();
        assert_eq!(request.content_type.as_deref(), Some("application/x-mpegURL"));
        assert_eq!(request.stream_type.as_deref(), Some("LIVE"));

        let request = LoadRequest::new("http://h/clip")
            .with_content_type("audio/flac")
            .normalized(&ExtensionSniffer)
            .unwrap();
        assert_eq!(request.content_type.as_deref(), Some("audio/flac"));
        assert_eq!(request.stream_type.as_deref(), Some("BUFFERED"));
    }

    #[test]
    fn empty_content_id_is_rejected() {
        assert!(LoadRequest::new(" ").normalized(&ExtensionSniffer).is_err());
    }

    #[test]
    fn auth_goes_into_custom_data() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer x".to_string());
        let request = LoadRequest::new("http://h/a.mp4").with_auth(headers, Some("tok".to_string()));
        assert_eq!(request.custom_data["authHeaders"]["Authorization"], "Bearer x");
        assert_eq!(request.custom_data["authToken"], "tok");
    }

    #[test]
    fn wire_payload_translates_metadata_and_stream_type() {
        let request = LoadRequest::new("http://h/a.mp4")
            .with_metadata("title", json!("Clip"))
            .normalized(&ExtensionSniffer)
            .unwrap();
        let wire = request.wire_payload();
        assert_eq!(wire["streamType"], 1);
        assert_eq!(wire["metadata"]["com.google.android.gms.cast.metadata.TITLE"], "Clip");
    }

    #[test]
    fn command_validation() {
        assert!(MediaCommand::volume(1.5).is_err());
        assert_eq!(MediaCommand::volume(0.3).unwrap(), MediaCommand::SetVolume(0.3));
        assert!(MediaCommand::seek(-1.0).is_err());
        assert_eq!(
            MediaCommand::repeat_mode("REPEAT_ALL_AND_SHUFFLE").unwrap(),
            MediaCommand::SetRepeatMode(3)
        );
        assert_eq!(
            MediaCommand::repeat_mode("SHUFFLE"),
            Err(CastError::InvalidRepeatMode("SHUFFLE".to_string()))
        );
    }
}
