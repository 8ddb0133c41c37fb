//! MIDI device control core for the rig controller
//!
//! This crate provides:
//! - MIDI port discovery and family classification via midir
//! - A pooled connection layer with per-port worker threads
//! - The effects-processor SysEx protocol (patch load, tuner, effect
//!   blocks, bank patch-name discovery)
//! - A pass-through encoder for the foot controller
//! - Patch activation with a durable "last activated" mirror
//! - A first-match-wins router over the active bank's mappings
//! - Input monitoring with a bounded received-event history
//!
//! # Architecture
//!
//! ```text
//! MIDI device → midir callback → flume channel → dispatcher thread
//!                                                   ├─ event history
//!                                                   ├─ mapping router
//!                                                   └─ patch activation
//! ```
//!
//! The midir callback runs on the driver's thread and only parses and
//! forwards; everything else happens on threads this crate owns. Sends go
//! through per-port worker threads, so messages to one device are delivered
//! in submission order and every hardware call is bounded by a timeout.
//!
//! The HTTP layer and the database are collaborators, not residents: the
//! service consumes storage through [`rig_core::PatchStore`] and exposes
//! plain calls plus a drainable event feed.

mod activation;
mod backend;
mod config;
mod error;
mod events;
mod footctrl;
mod monitor;
mod pool;
mod registry;
mod router;
mod service;
#[cfg(test)]
pub(crate) mod testkit;
mod wire;
mod zoom;

pub use activation::{ActivationEngine, ActivationState};
pub use backend::{InputCallback, InputConnection, MidiBackend, MidirBackend, OutputPort};
pub use config::{default_data_dir, load_config, save_config, RigConfig};
pub use error::{classify_port_error, MidiError, MidiResult, EXTERNAL_POWER_HINT};
pub use events::{MidiEvent, EVENT_LOG_CAPACITY};
pub use footctrl::FootController;
pub use monitor::{InputMonitor, MonitorMode, MonitorStatus};
pub use pool::{ConnectionPool, OutputHandle};
pub use registry::{
    classify_port, classify_ports, is_pass_through, select_default, Device, DeviceFamily,
    DeviceRegistry, DeviceStatus, PortDirection, ScanResult,
};
pub use router::Router;
pub use service::{CommandRequest, ConfigUpdate, DeviceStatusReport, MidiService};
pub use zoom::{
    effect_catalog, effect_cc, parse_identity_reply, sysex_effect_block, sysex_patch_select,
    sysex_tuner_toggle, IdentityReply, PatchInfo, ZoomController, IDENTITY_REQUEST,
    ZOOM_DEVICE_ID, ZOOM_MANUFACTURER_ID,
};
