//! Static translation tables between the receiver vocabulary and the
//! application vocabulary.
//!
//! Receivers speak in numeric codes and `com.google.android.gms.cast.metadata.*`
//! keys; applications see upper-case state names and short camelCase field
//! names. Field names that are not in the table pass through unchanged in
//! both directions, enumerations are strict.

use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{CastError, CastResult};

/// Value type the receiver expects for a metadata key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataType {
    String,
    Int,
    Double,
    Date,
    Ms,
    Custom,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::String => "string",
            MetadataType::Int => "int",
            MetadataType::Double => "double",
            MetadataType::Date => "date",
            MetadataType::Ms => "ms",
            MetadataType::Custom => "custom",
        }
    }
}

/// (application name, receiver key, type)
const METADATA_FIELDS: &[(&str, &str, MetadataType)] = &[
    ("title", "com.google.android.gms.cast.metadata.TITLE", MetadataType::String),
    ("subtitle", "com.google.android.gms.cast.metadata.SUBTITLE", MetadataType::String),
    ("artist", "com.google.android.gms.cast.metadata.ARTIST", MetadataType::String),
    ("albumName", "com.google.android.gms.cast.metadata.ALBUM_TITLE", MetadataType::String),
    ("albumArtist", "com.google.android.gms.cast.metadata.ALBUM_ARTIST", MetadataType::String),
    ("composer", "com.google.android.gms.cast.metadata.COMPOSER", MetadataType::String),
    ("seriesTitle", "com.google.android.gms.cast.metadata.SERIES_TITLE", MetadataType::String),
    ("season", "com.google.android.gms.cast.metadata.SEASON_NUMBER", MetadataType::Int),
    ("episode", "com.google.android.gms.cast.metadata.EPISODE_NUMBER", MetadataType::Int),
    ("discNumber", "com.google.android.gms.cast.metadata.DISC_NUMBER", MetadataType::Int),
    ("trackNumber", "com.google.android.gms.cast.metadata.TRACK_NUMBER", MetadataType::Int),
    ("releaseDate", "com.google.android.gms.cast.metadata.RELEASE_DATE", MetadataType::Date),
    ("broadcastDate", "com.google.android.gms.cast.metadata.BROADCAST_DATE", MetadataType::Date),
    ("creationDate", "com.google.android.gms.cast.metadata.CREATION_DATE", MetadataType::Date),
    ("studio", "com.google.android.gms.cast.metadata.STUDIO", MetadataType::String),
    ("width", "com.google.android.gms.cast.metadata.WIDTH", MetadataType::Int),
    ("height", "com.google.android.gms.cast.metadata.HEIGHT", MetadataType::Int),
    ("locationName", "com.google.android.gms.cast.metadata.LOCATION_NAME", MetadataType::String),
    ("locationLatitude", "com.google.android.gms.cast.metadata.LOCATION_LATITUDE", MetadataType::Double),
    ("locationLongitude", "com.google.android.gms.cast.metadata.LOCATION_LONGITUDE", MetadataType::Double),
    ("sectionDuration", "com.google.android.gms.cast.metadata.SECTION_DURATION", MetadataType::Ms),
    (
        "sectionStartAbsoluteTime",
        "com.google.android.gms.cast.metadata.SECTION_START_ABSOLUTE_TIME",
        MetadataType::Ms,
    ),
    (
        "sectionStartTimeInContainer",
        "com.google.android.gms.cast.metadata.SECTION_START_TIME_IN_CONTAINER",
        MetadataType::Ms,
    ),
    (
        "sectionStartTimeInMedia",
        "com.google.android.gms.cast.metadata.SECTION_START_TIME_IN_MEDIA",
        MetadataType::Ms,
    ),
];

pub const PLAYER_STATE_UNKNOWN: i64 = 0;
pub const PLAYER_STATE_IDLE: i64 = 1;
pub const PLAYER_STATE_PLAYING: i64 = 2;
pub const PLAYER_STATE_PAUSED: i64 = 3;
pub const PLAYER_STATE_BUFFERING: i64 = 4;
pub const PLAYER_STATE_LOADING: i64 = 5;

pub const IDLE_REASON_NONE: i64 = 0;
pub const IDLE_REASON_FINISHED: i64 = 1;
pub const IDLE_REASON_CANCELED: i64 = 2;
pub const IDLE_REASON_INTERRUPTED: i64 = 3;
pub const IDLE_REASON_ERROR: i64 = 4;

pub const STREAM_TYPE_NONE: i64 = 0;
pub const STREAM_TYPE_BUFFERED: i64 = 1;
pub const STREAM_TYPE_LIVE: i64 = 2;

const REPEAT_MODES: &[(&str, i64)] = &[
    ("REPEAT_OFF", 0),
    ("REPEAT_ALL", 1),
    ("REPEAT_SINGLE", 2),
    ("REPEAT_ALL_AND_SHUFFLE", 3),
];

/// Application field name to receiver metadata key.
pub fn field_to_wire(name: &str) -> String {
    METADATA_FIELDS
        .iter()
        .find(|(app, _, _)| *app == name)
        .map(|(_, wire, _)| (*wire).to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Receiver metadata key to application field name.
pub fn field_to_app(wire: &str) -> String {
    METADATA_FIELDS
        .iter()
        .find(|(_, key, _)| *key == wire)
        .map(|(app, _, _)| (*app).to_string())
        .unwrap_or_else(|| wire.to_string())
}

pub fn metadata_type(wire_key: &str) -> MetadataType {
    METADATA_FIELDS
        .iter()
        .find(|(_, key, _)| *key == wire_key)
        .map(|(_, _, kind)| *kind)
        .unwrap_or(MetadataType::Custom)
}

pub fn player_state_to_app(code: i64) -> Option<&'static str> {
    match code {
        PLAYER_STATE_UNKNOWN => Some("UNKNOWN"),
        PLAYER_STATE_IDLE => Some("IDLE"),
        PLAYER_STATE_PLAYING => Some("PLAYING"),
        PLAYER_STATE_PAUSED => Some("PAUSED"),
        PLAYER_STATE_BUFFERING | PLAYER_STATE_LOADING => Some("BUFFERING"),
        _ => None,
    }
}

pub fn player_state_to_wire(state: &str) -> Option<i64> {
    match state {
        "UNKNOWN" => Some(PLAYER_STATE_UNKNOWN),
        "IDLE" => Some(PLAYER_STATE_IDLE),
        "PLAYING" => Some(PLAYER_STATE_PLAYING),
        "PAUSED" => Some(PLAYER_STATE_PAUSED),
        "BUFFERING" => Some(PLAYER_STATE_BUFFERING),
        _ => None,
    }
}

pub fn idle_reason_to_app(code: i64) -> Option<&'static str> {
    match code {
        IDLE_REASON_FINISHED => Some("FINISHED"),
        IDLE_REASON_CANCELED => Some("CANCELLED"),
        IDLE_REASON_INTERRUPTED => Some("INTERRUPTED"),
        IDLE_REASON_ERROR => Some("ERROR"),
        _ => None,
    }
}

pub fn idle_reason_to_wire(reason: &str) -> Option<i64> {
    match reason {
        "FINISHED" => Some(IDLE_REASON_FINISHED),
        "CANCELLED" => Some(IDLE_REASON_CANCELED),
        "INTERRUPTED" => Some(IDLE_REASON_INTERRUPTED),
        "ERROR" => Some(IDLE_REASON_ERROR),
        _ => None,
    }
}

/// Fails with `InvalidRepeatMode`: receivers only accept the fixed set.
pub fn repeat_mode_to_wire(mode: &str) -> CastResult<i64> {
    REPEAT_MODES
        .iter()
        .find(|(name, _)| *name == mode)
        .map(|(_, code)| *code)
        .ok_or_else(|| CastError::InvalidRepeatMode(mode.to_string()))
}

pub fn repeat_mode_to_app(code: i64) -> Option<&'static str> {
    REPEAT_MODES
        .iter()
        .find(|(_, wire)| *wire == code)
        .map(|(name, _)| *name)
}

pub fn stream_type_to_wire(stream_type: &str) -> i64 {
    if stream_type.eq_ignore_ascii_case("buffered") {
        STREAM_TYPE_BUFFERED
    } else if stream_type.eq_ignore_ascii_case("live") {
        STREAM_TYPE_LIVE
    } else {
        STREAM_TYPE_NONE
    }
}

pub fn stream_type_to_app(code: i64) -> &'static str {
    match code {
        STREAM_TYPE_BUFFERED => "BUFFERED",
        STREAM_TYPE_LIVE => "LIVE",
        _ => "OTHER",
    }
}

/// `#aarrggbb`, lower case.
pub fn hex_color(argb: u32) -> String {
    format!("#{argb:08x}")
}

/// Renames application metadata keys and coerces numeric fields to the
/// type the receiver expects. Values that cannot be coerced are kept as is.
pub fn metadata_to_wire(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(name, value)| {
            let key = field_to_wire(name);
            let value = coerce(&key, value);
            (key, value)
        })
        .collect()
}

pub fn metadata_to_app(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(key, value)| (field_to_app(key), value.clone()))
        .collect()
}

fn coerce(key: &str, value: &Value) -> Value {
    let coerced = match (metadata_type(key), value) {
        (MetadataType::Int | MetadataType::Ms, Value::String(s)) => {
            s.trim().parse::<i64>().ok().map(Value::from)
        }
        (MetadataType::Int | MetadataType::Ms, Value::Number(n)) if !n.is_i64() => {
            n.as_f64().map(|f| Value::from(f.round() as i64))
        }
        (MetadataType::Double, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
        _ => return value.clone(),
    };

    coerced.unwrap_or_else(|| {
        warn!(key, value = %value, "Metadata value does not match its declared type");
        value.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_field_round_trips() {
        for (app, wire, _) in METADATA_FIELDS {
            assert_eq!(field_to_wire(app), *wire);
            assert_eq!(field_to_app(&field_to_wire(app)), *app);
            assert_eq!(field_to_wire(&field_to_app(wire)), *wire);
        }
    }

    #[test]
    fn unmapped_fields_pass_through() {
        assert_eq!(field_to_wire("customKey"), "customKey");
        assert_eq!(field_to_app("customKey"), "customKey");
        assert_eq!(metadata_type("customKey"), MetadataType::Custom);
    }

    #[test]
    fn metadata_types_follow_the_table() {
        assert_eq!(metadata_type(&field_to_wire("title")), MetadataType::String);
        assert_eq!(metadata_type(&field_to_wire("episode")), MetadataType::Int);
        assert_eq!(metadata_type(&field_to_wire("locationLatitude")), MetadataType::Double);
        assert_eq!(metadata_type(&field_to_wire("releaseDate")), MetadataType::Date);
        assert_eq!(metadata_type(&field_to_wire("sectionDuration")), MetadataType::Ms);
    }

    #[test]
    fn player_states() {
        assert_eq!(player_state_to_app(PLAYER_STATE_LOADING), Some("BUFFERING"));
        assert_eq!(player_state_to_app(PLAYER_STATE_PLAYING), Some("PLAYING"));
        assert_eq!(player_state_to_app(-999), None);
        for state in ["UNKNOWN", "IDLE", "PLAYING", "PAUSED", "BUFFERING"] {
            let code = player_state_to_wire(state).unwrap();
            assert_eq!(player_state_to_app(code), Some(state));
        }
    }

    #[test]
    fn idle_reasons() {
        assert_eq!(idle_reason_to_app(IDLE_REASON_CANCELED), Some("CANCELLED"));
        assert_eq!(idle_reason_to_app(IDLE_REASON_NONE), None);
        assert_eq!(idle_reason_to_app(-999), None);
        for reason in ["FINISHED", "CANCELLED", "INTERRUPTED", "ERROR"] {
            let code = idle_reason_to_wire(reason).unwrap();
            assert_eq!(idle_reason_to_app(code), Some(reason));
        }
    }

    #[test]
    fn repeat_all_and_shuffle_round_trips() {
        let code = repeat_mode_to_wire("REPEAT_ALL_AND_SHUFFLE").unwrap();
        assert_eq!(code, 3);
        assert_eq!(repeat_mode_to_app(code), Some("REPEAT_ALL_AND_SHUFFLE"));
    }

    #[test]
    fn unknown_repeat_mode_is_rejected() {
        assert_eq!(
            repeat_mode_to_wire("INVALID_MODE"),
            Err(CastError::InvalidRepeatMode("INVALID_MODE".to_string()))
        );
        assert_eq!(repeat_mode_to_app(-999), None);
    }

    #[test]
    fn stream_types() {
        assert_eq!(stream_type_to_wire("buffered"), STREAM_TYPE_BUFFERED);
        assert_eq!(stream_type_to_wire("LIVE"), STREAM_TYPE_LIVE);
        assert_eq!(stream_type_to_wire("other"), STREAM_TYPE_NONE);
        assert_eq!(stream_type_to_app(STREAM_TYPE_LIVE), "LIVE");
        assert_eq!(stream_type_to_app(STREAM_TYPE_NONE), "OTHER");
    }

    #[test]
    fn colors_are_argb_lowercase() {
        assert_eq!(hex_color(0xFF00AAFF), "#ff00aaff");
        assert_eq!(hex_color(0x0000000A), "#0000000a");
    }

    #[test]
    fn metadata_documents_translate_both_ways() {
        let app = json!({
            "title": "Big Buck Bunny",
            "episode": "3",
            "locationLatitude": "48.85",
            "vendorField": true,
        });
        let wire = metadata_to_wire(app.as_object().unwrap());
        assert_eq!(wire["com.google.android.gms.cast.metadata.TITLE"], json!("Big Buck Bunny"));
        assert_eq!(wire["com.google.android.gms.cast.metadata.EPISODE_NUMBER"], json!(3));
        assert_eq!(wire["com.google.android.gms.cast.metadata.LOCATION_LATITUDE"], json!(48.85));
        assert_eq!(wire["vendorField"], json!(true));

        let back = metadata_to_app(&wire);
        assert_eq!(back["title"], json!("Big Buck Bunny"));
        assert_eq!(back["episode"], json!(3));
        assert_eq!(back["vendorField"], json!(true));
    }
}
