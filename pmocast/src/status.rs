//! Decoding of receiver status pushes.
//!
//! Receivers report status in their own vocabulary (numeric player states,
//! `com.google.android.gms.cast.metadata.*` keys). Every push is decoded into
//! a brand new [`SessionSnapshot`]; fields absent from the push keep their
//! previous value, `media` is replaced as a whole when present.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::errors::{CastError, CastResult};
use crate::mapping;
use crate::model::{Image, MediaInfo, MediaStatus, ReceiverInfo, SessionSnapshot, Volume};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSessionStatus {
    app_id: Option<String>,
    display_name: Option<String>,
    app_images: Option<Vec<Image>>,
    receiver: Option<WireReceiver>,
    media: Option<Vec<WireMediaStatus>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceiver {
    friendly_name: Option<String>,
    label: Option<String>,
    volume: Option<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaStatus {
    media_session_id: i64,
    current_item_id: Option<i64>,
    #[serde(default)]
    current_time: f64,
    #[serde(default = "default_playback_rate")]
    playback_rate: f64,
    #[serde(default)]
    player_state: i64,
    #[serde(default)]
    idle_reason: i64,
    repeat_mode: Option<i64>,
    #[serde(default)]
    volume: Volume,
    #[serde(default)]
    custom_data: Value,
    media: Option<WireMediaInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaInfo {
    content_id: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    custom_data: Value,
    duration: Option<f64>,
    #[serde(default)]
    stream_type: i64,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn default_playback_rate() -> f64 {
    1.0
}

fn malformed(err: serde_json::Error) -> CastError {
    CastError::InvalidParameter(format!("malformed status payload: {err}"))
}

/// Builds the next snapshot from a receiver status push.
pub fn decode_session_status(
    payload: &Value,
    previous: &SessionSnapshot,
    status: &str,
) -> CastResult<SessionSnapshot> {
    if !payload.is_object() {
        return Err(CastError::invalid_parameter(
            "status payload is not an object",
        ));
    }
    let wire = WireSessionStatus::deserialize(payload).map_err(malformed)?;

    // The session is identified by the event carrying the push.
    let session_id = previous.session_id.clone();
    let receiver = match wire.receiver {
        Some(receiver) => ReceiverInfo {
            friendly_name: receiver
                .friendly_name
                .unwrap_or_else(|| previous.receiver.friendly_name.clone()),
            label: receiver
                .label
                .unwrap_or_else(|| previous.receiver.label.clone()),
            volume: receiver.volume.unwrap_or(previous.receiver.volume),
        },
        None => previous.receiver.clone(),
    };
    let media = match wire.media {
        Some(entries) => entries
            .into_iter()
            .map(|entry| media_from_wire(entry, &session_id))
            .collect(),
        None => previous.media.clone(),
    };

    Ok(SessionSnapshot {
        app_id: wire.app_id.unwrap_or_else(|| previous.app_id.clone()),
        display_name: wire
            .display_name
            .unwrap_or_else(|| previous.display_name.clone()),
        app_images: wire
            .app_images
            .unwrap_or_else(|| previous.app_images.clone()),
        receiver,
        media,
        status: status.to_string(),
        session_id,
    })
}

/// Decodes a single media status, as returned by a load request.
pub fn decode_media_status(payload: &Value, session_id: &str) -> CastResult<MediaStatus> {
    let wire = WireMediaStatus::deserialize(payload).map_err(malformed)?;
    Ok(media_from_wire(wire, session_id))
}

fn media_from_wire(wire: WireMediaStatus, session_id: &str) -> MediaStatus {
    MediaStatus {
        current_item_id: wire.current_item_id,
        current_time: wire.current_time,
        custom_data: wire.custom_data,
        media_session_id: wire.media_session_id,
        playback_rate: wire.playback_rate,
        player_state: mapping::player_state_to_app(wire.player_state).map(str::to_string),
        idle_reason: mapping::idle_reason_to_app(wire.idle_reason).map(str::to_string),
        is_alive: wire.player_state != mapping::PLAYER_STATE_IDLE,
        repeat_mode: wire
            .repeat_mode
            .and_then(mapping::repeat_mode_to_app)
            .map(str::to_string),
        volume: wire.volume,
        media: wire.media.map(|info| MediaInfo {
            content_id: info.content_id,
            content_type: info.content_type,
            custom_data: info.custom_data,
            duration: info.duration,
            stream_type: mapping::stream_type_to_app(info.stream_type).to_string(),
            metadata: mapping::metadata_to_app(&info.metadata),
        }),
        session_id: session_id.to_string(),
    }
}

/// Encodes a media status the way a receiver reports it.
pub fn encode_media_status(status: &MediaStatus) -> Value {
    let media = status.media.as_ref().map(|info| {
        json!({
            "contentId": info.content_id,
            "contentType": info.content_type,
            "customData": info.custom_data,
            "duration": info.duration,
            "streamType": mapping::stream_type_to_wire(&info.stream_type),
            "metadata": mapping::metadata_to_wire(&info.metadata),
        })
    });

    json!({
        "mediaSessionId": status.media_session_id,
        "currentItemId": status.current_item_id,
        "currentTime": status.current_time,
        "playbackRate": status.playback_rate,
        "playerState": status
            .player_state
            .as_deref()
            .and_then(mapping::player_state_to_wire)
            .unwrap_or(mapping::PLAYER_STATE_UNKNOWN),
        "idleReason": status
            .idle_reason
            .as_deref()
            .and_then(mapping::idle_reason_to_wire)
            .unwrap_or(mapping::IDLE_REASON_NONE),
        "repeatMode": status
            .repeat_mode
            .as_deref()
            .and_then(|mode| mapping::repeat_mode_to_wire(mode).ok()),
        "volume": status.volume,
        "customData": status.custom_data,
        "media": media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn previous() -> SessionSnapshot {
        SessionSnapshot {
            app_id: "CC1AD845".to_string(),
            display_name: "Default Media Receiver".to_string(),
            session_id: "s-1".to_string(),
            receiver: ReceiverInfo {
                friendly_name: "Living room".to_string(),
                label: "lr".to_string(),
                volume: Volume {
                    level: 0.5,
                    muted: false,
                },
            },
            status: "connected".to_string(),
            ..SessionSnapshot::default()
        }
    }

    #[test]
    fn push_is_translated_to_application_vocabulary() {
        let payload = json!({
            "receiver": { "volume": { "level": 0.8, "muted": true } },
            "media": [{
                "mediaSessionId": 4,
                "playerState": 5,
                "idleReason": 0,
                "repeatMode": 3,
                "media": {
                    "contentId": "http://host/a.m3u8",
                    "streamType": 2,
                    "metadata": { "com.google.android.gms.cast.metadata.TITLE": "Live" }
                }
            }]
        });

        let snapshot = decode_session_status(&payload, &previous(), "connected").unwrap();
        assert_eq!(snapshot.session_id, "s-1");
        assert_eq!(snapshot.receiver.friendly_name, "Living room");
        assert!(snapshot.receiver.volume.muted);

        let media = &snapshot.media[0];
        assert_eq!(media.player_state.as_deref(), Some("BUFFERING"));
        assert_eq!(media.idle_reason, None);
        assert_eq!(media.repeat_mode.as_deref(), Some("REPEAT_ALL_AND_SHUFFLE"));
        assert_eq!(media.playback_rate, 1.0);
        assert!(media.is_alive);
        let info = media.media.as_ref().unwrap();
        assert_eq!(info.stream_type, "LIVE");
        assert_eq!(info.metadata["title"], "Live");
        assert_eq!(media.session_id, "s-1");
    }

    #[test]
    fn embedded_session_id_does_not_replace_the_session() {
        let payload = json!({
            "sessionId": "someone-else",
            "media": [{ "mediaSessionId": 2, "playerState": 2 }]
        });
        let snapshot = decode_session_status(&payload, &previous(), "connected").unwrap();
        assert_eq!(snapshot.session_id, "s-1");
        assert_eq!(snapshot.media[0].session_id, "s-1");
    }

    #[test]
    fn absent_media_keeps_previous_entries() {
        let mut prev = previous();
        prev.media.push(MediaStatus {
            media_session_id: 1,
            ..MediaStatus::default()
        });
        let snapshot = decode_session_status(&json!({}), &prev, "connected").unwrap();
        assert_eq!(snapshot.media.len(), 1);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(decode_session_status(&json!("nope"), &previous(), "connected").is_err());
        assert!(decode_session_status(&json!({ "media": 3 }), &previous(), "connected").is_err());
        assert!(
            decode_session_status(&json!({ "media": [{ "playerState": 2 }] }), &previous(), "connected")
                .is_err()
        );
    }

    #[test]
    fn encoded_media_status_decodes_back() {
        let status = MediaStatus {
            media_session_id: 9,
            player_state: Some("PAUSED".to_string()),
            idle_reason: Some("FINISHED".to_string()),
            repeat_mode: Some("REPEAT_SINGLE".to_string()),
            playback_rate: 1.0,
            media: Some(MediaInfo {
                content_id: "http://host/movie.mp4".to_string(),
                content_type: "video/mp4".to_string(),
                stream_type: "BUFFERED".to_string(),
                ..MediaInfo::default()
            }),
            session_id: "s-1".to_string(),
            ..MediaStatus::default()
        };
        let decoded = decode_media_status(&encode_media_status(&status), "s-1").unwrap();
        assert_eq!(decoded.player_state.as_deref(), Some("PAUSED"));
        assert_eq!(decoded.idle_reason.as_deref(), Some("FINISHED"));
        assert_eq!(decoded.repeat_mode.as_deref(), Some("REPEAT_SINGLE"));
        assert_eq!(decoded.media.unwrap().stream_type, "BUFFERED");
    }
}
