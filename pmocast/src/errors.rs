use thiserror::Error;

pub type CastResult<T> = Result<T, CastError>;

/// Transport codes reported by receivers and discovery transports.
pub mod codes {
    pub const NETWORK_ERROR: i32 = 7;
    pub const INTERNAL_ERROR: i32 = 8;
    pub const TIMEOUT: i32 = 15;
    pub const AUTHENTICATION_FAILED: i32 = 2000;
    pub const INVALID_REQUEST: i32 = 2001;
    pub const CANCELED: i32 = 2002;
    pub const NOT_ALLOWED: i32 = 2003;
    pub const APPLICATION_NOT_FOUND: i32 = 2004;
    pub const APPLICATION_NOT_RUNNING: i32 = 2005;
    pub const MESSAGE_TOO_LARGE: i32 = 2006;
    pub const MESSAGE_SEND_BUFFER_TOO_FULL: i32 = 2007;
    pub const RECEIVER_APP_NOT_FOUND: i32 = 2475;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CastError {
    #[error("Another request is already in progress")]
    Busy,
    #[error("No active session")]
    NoActiveSession,
    #[error("Channel {0} has not been added")]
    ChannelNotFound(String),
    #[error("Invalid repeat mode: {0}")]
    InvalidRepeatMode(String),
    #[error("Transport error {code}: {message}")]
    Transport { code: i32, message: String },
    #[error("Request cancelled")]
    Cancelled,
    #[error("Request superseded by a newer one")]
    Superseded,
    #[error("No device matches {0}")]
    DeviceNotFound(String),
    #[error("No pending session request")]
    NoPendingRequest,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Cast controller is not running")]
    ControllerClosed,
}

impl CastError {
    /// Builds a transport error whose message comes from the code table.
    pub fn transport(code: i32) -> Self {
        CastError::Transport {
            code,
            message: error_message(code),
        }
    }

    pub fn invalid_parameter(message: &str) -> Self {
        CastError::InvalidParameter(message.to_string())
    }

    /// Stable identifier handed to the application bridge.
    pub fn bridge_code(&self) -> &'static str {
        match self {
            CastError::Busy => "busy",
            CastError::NoActiveSession => "no_session",
            CastError::ChannelNotFound(_) => "channel_not_found",
            CastError::InvalidRepeatMode(_) => "invalid_repeat_mode",
            CastError::Transport { .. } => "session_error",
            CastError::Cancelled => "cancel",
            CastError::Superseded => "superseded",
            CastError::DeviceNotFound(_) => "device_not_found",
            CastError::NoPendingRequest => "no_pending_request",
            CastError::InvalidParameter(_) => "invalid_parameter",
            CastError::ControllerClosed => "controller_closed",
        }
    }

    /// The transport code, for errors that carry one.
    pub fn code(&self) -> Option<i32> {
        match self {
            CastError::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Human readable message for a transport code.
pub fn error_message(code: i32) -> String {
    let message = match code {
        codes::NETWORK_ERROR => "Network error",
        codes::INTERNAL_ERROR => "Internal error",
        codes::TIMEOUT => "Request timeout",
        codes::AUTHENTICATION_FAILED => "Authentication failed",
        codes::INVALID_REQUEST => "Invalid request",
        codes::CANCELED => "Request cancelled",
        codes::NOT_ALLOWED => "Request not authorized",
        codes::APPLICATION_NOT_FOUND => "Application not found",
        codes::APPLICATION_NOT_RUNNING => "Application not running",
        codes::MESSAGE_TOO_LARGE => "Message too large",
        codes::MESSAGE_SEND_BUFFER_TOO_FULL => "Send buffer full",
        codes::RECEIVER_APP_NOT_FOUND => {
            "Receiver application not found - check your internet connection and App ID"
        }
        other => return format!("Unknown error (code: {other})"),
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_messages() {
        assert_eq!(error_message(7), "Network error");
        assert_eq!(error_message(15), "Request timeout");
        assert_eq!(error_message(2004), "Application not found");
        assert!(error_message(2475).starts_with("Receiver application not found"));
    }

    #[test]
    fn unknown_code_mentions_the_code() {
        assert_eq!(error_message(4242), "Unknown error (code: 4242)");
    }

    #[test]
    fn transport_error_carries_table_message() {
        let err = CastError::transport(2005);
        assert_eq!(err.code(), Some(2005));
        assert_eq!(err.bridge_code(), "session_error");
        assert_eq!(
            err.to_string(),
            "Transport error 2005: Application not running"
        );
    }

    #[test]
    fn bridge_codes_are_stable() {
        assert_eq!(CastError::Busy.bridge_code(), "busy");
        assert_eq!(CastError::NoActiveSession.bridge_code(), "no_session");
        assert_eq!(CastError::Cancelled.bridge_code(), "cancel");
        assert_eq!(CastError::Busy.code(), None);
    }
}
