//! Seam between the controller and the receiver protocol layer.
//!
//! The protocol layer (Cast v2 over TLS, a test double, ...) implements
//! [`DeviceTransport`]. Everything it learns from the receiver, including the
//! outcome of `connect`, comes back as a [`TransportEvent`] through the
//! [`TransportSink`] it was attached to.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::CastResult;
use crate::media::MediaCommand;
use crate::model::{Device, EndMode, SessionSnapshot};
use crate::tracker::Completion;

#[derive(Clone, Debug)]
pub enum TransportEvent {
    ConnectAccepted {
        attempt: u64,
        snapshot: SessionSnapshot,
    },
    ConnectRejected {
        attempt: u64,
        code: i32,
    },
    /// The receiver session is gone. `clean` is false when it did not end on
    /// our request.
    Disconnected {
        session_id: String,
        clean: bool,
    },
    /// Raw receiver status document.
    StatusUpdate {
        session_id: String,
        payload: Value,
    },
    MessageReceived {
        namespace: String,
        message: String,
    },
    AvailabilityChanged {
        available: bool,
    },
    Suspended {
        session_id: String,
    },
    TransportLost {
        code: i32,
    },
    /// A session from a previous run is still alive on a receiver.
    ResumeOffered {
        snapshot: SessionSnapshot,
    },
    ResumeConfirmed {
        session_id: String,
    },
    ResumeFailed {
        session_id: String,
    },
}

type Emit = Arc<dyn Fn(TransportEvent) -> bool + Send + Sync>;

/// Where a transport reports receiver events. Cheap to clone.
#[derive(Clone)]
pub struct TransportSink {
    emit: Emit,
}

impl TransportSink {
    pub fn new<F>(emit: F) -> Self
    where
        F: Fn(TransportEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Returns false once the controller is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        (self.emit)(event)
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportSink")
    }
}

/// The receiver protocol layer.
///
/// Calls are made from the controller thread and must not block on the
/// controller. Connect timeouts belong to the implementation, which reports
/// them as `ConnectRejected`.
pub trait DeviceTransport: Send {
    fn attach(&mut self, sink: TransportSink);

    /// Starts connecting; the outcome is reported for `attempt`.
    fn connect(&mut self, attempt: u64, device: &Device, app_id: &str) -> CastResult<()>;

    /// Confirmation arrives as `Disconnected`.
    fn disconnect(&mut self, session_id: &str, mode: EndMode) -> CastResult<()>;

    fn send_message(
        &mut self,
        session_id: &str,
        namespace: &str,
        message: &str,
        completion: Completion<()>,
    );

    /// Resolves with the receiver's media status document when it sends one.
    fn media_command(
        &mut self,
        session_id: &str,
        command: MediaCommand,
        completion: Completion<Option<Value>>,
    );
}
