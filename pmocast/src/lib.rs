//! Client-side session management for Cast receivers.
//!
//! [`CastController`] owns one actor thread that reconciles application
//! commands, receiver events and discovery reports into a single observable
//! state: at most one route scan, at most one session, and exactly one
//! terminal outcome for every request. The receiver protocol and the
//! discovery browser are plugged in through [`DeviceTransport`] and
//! [`DiscoveryTransport`]; [`simulator`] provides in-process versions of both.

pub mod channels;
pub mod controller;
pub mod errors;
pub mod events;
pub mod mapping;
pub mod media;
pub mod model;
pub mod registry;
pub mod scan;
pub mod session;
pub mod simulator;
pub mod status;
pub mod tracker;
pub mod transport;

pub use channels::ChannelManager;
pub use controller::{CastController, ControllerOptions, DEFAULT_APP_ID};
pub use errors::{CastError, CastResult};
pub use events::{CastEvent, CastEventBus};
pub use media::{ContentTypeSniffer, ExtensionSniffer, LoadRequest, MediaCommand, SniffedContent};
pub use model::{
    Device, DeviceCapabilities, DeviceId, EndMode, Image, MediaInfo, MediaStatus, ReceiverInfo,
    RouteInfo, SessionEndStatus, SessionSnapshot, SessionState, Volume,
};
pub use registry::{DeviceFilter, DeviceRegistry, RegistryChange};
pub use scan::{DiscoveryReport, DiscoverySink, DiscoveryTransport, ScanFilter, ScanSummary};
pub use session::{SessionController, SessionView};
pub use tracker::{Completion, RequestSlot};
pub use transport::{DeviceTransport, TransportEvent, TransportSink};
