use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::{Value, json};

use crate::errors::error_message;
use crate::model::{MediaStatus, SessionEndStatus, SessionSnapshot};

/// Observable events, delivered in the order the transitions happened.
///
/// `SessionStarted` and `SessionResumed` are always immediately followed by
/// a `SessionUpdate` sharing the same snapshot.
#[derive(Clone, Debug)]
pub enum CastEvent {
    SessionStarted(Arc<SessionSnapshot>),
    SessionUpdate(Arc<SessionSnapshot>),
    SessionResumed(Arc<SessionSnapshot>),
    SessionEnded {
        session: Arc<SessionSnapshot>,
        status: SessionEndStatus,
        code: Option<i32>,
    },
    SessionStartFailed {
        code: i32,
        message: String,
    },
    ReceiverListener {
        available: bool,
    },
    ReceiverMessage {
        namespace: String,
        message: String,
    },
    MediaLoaded(MediaStatus),
    MediaUpdate(MediaStatus),
}

impl CastEvent {
    pub fn session_start_failed(code: i32) -> Self {
        CastEvent::SessionStartFailed {
            code,
            message: error_message(code),
        }
    }

    /// Event name used by the application bridge.
    pub fn name(&self) -> &'static str {
        match self {
            CastEvent::SessionStarted(_) => "SESSION_STARTED",
            CastEvent::SessionUpdate(_) => "SESSION_UPDATE",
            CastEvent::SessionResumed(_) => "SESSION_RESUMED",
            CastEvent::SessionEnded { .. } => "SESSION_ENDED",
            CastEvent::SessionStartFailed { .. } => "SESSION_START_FAILED",
            CastEvent::ReceiverListener { .. } => "RECEIVER_LISTENER",
            CastEvent::ReceiverMessage { .. } => "RECEIVER_MESSAGE",
            CastEvent::MediaLoaded(_) => "MEDIA_LOAD",
            CastEvent::MediaUpdate(_) => "MEDIA_UPDATE",
        }
    }

    /// JSON document handed to the application bridge.
    pub fn payload(&self) -> Value {
        match self {
            CastEvent::SessionStarted(snapshot)
            | CastEvent::SessionUpdate(snapshot)
            | CastEvent::SessionResumed(snapshot) => to_json(snapshot.as_ref()),
            CastEvent::SessionEnded {
                session,
                status,
                code,
            } => {
                let mut payload = to_json(session.as_ref());
                if let Value::Object(map) = &mut payload {
                    map.insert("status".to_string(), json!(status.as_str()));
                    if let Some(code) = code {
                        map.insert("errorCode".to_string(), json!(code));
                        map.insert("errorMessage".to_string(), json!(error_message(*code)));
                    }
                }
                payload
            }
            CastEvent::SessionStartFailed { code, message } => {
                json!({ "code": code, "message": message })
            }
            CastEvent::ReceiverListener { available } => json!({ "isAvailable": available }),
            CastEvent::ReceiverMessage { namespace, message } => {
                json!({ "namespace": namespace, "message": message })
            }
            CastEvent::MediaLoaded(media) | CastEvent::MediaUpdate(media) => to_json(media),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[derive(Clone, Default)]
pub struct CastEventBus {
    subscribers: Arc<Mutex<Vec<Sender<CastEvent>>>>,
}

impl CastEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<CastEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Receiver<CastEvent> {
        let (tx, rx) = unbounded::<CastEvent>();
        self.lock().push(tx);
        rx
    }

    pub(crate) fn broadcast(&self, event: CastEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
