//! Clipboard group: membership, handshakes and clipboard propagation
//!
//! A single coordinator task owns all group state. Sessions, the accept
//! loop and discovery report to it over a channel; [`Coordinator`] is the
//! caller-facing handle.

mod actor;
mod coordinator;
mod history;
mod session;
mod state;

use std::sync::Arc;

use crate::device::Device;
use crate::error::{AuthError, DiscoveryError};

pub use coordinator::{Collaborators, Coordinator};
pub use history::{ClipboardHistory, ClipboardSnapshot, ContentHash, UpdateOrigin};
pub use session::Direction;

/// Notifications for whoever drives the node
#[derive(Debug, Clone)]
pub enum GroupEvent {
    DeviceJoined(Device),
    DeviceLeft(Device),
    ClipboardUpdated {
        seq: u64,
        mime_type: String,
        data: Arc<[u8]>,
        origin: UpdateOrigin,
    },
    AuthenticationFailed {
        device: Device,
        cause: AuthError,
    },
    DeviceDiscovered(Device),
    DeviceLost(Device),
    /// Discovery could not start; manual connections still work
    DiscoveryDegraded(DiscoveryError),
}
