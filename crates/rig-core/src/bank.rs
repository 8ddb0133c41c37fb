//! Banks of input→output mappings
//!
//! A bank is an ordered list of mappings evaluated against incoming MIDI
//! events. Order is significant: the router fires the first mapping that
//! matches, and only that one. Exactly one bank is active at a time; the
//! persistence collaborator enforces that.

use serde::{Deserialize, Serialize};

/// MIDI message kind used on both sides of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
}

/// A single input→output rule inside a bank
///
/// Immutable once loaded for a routing pass. `input_control` is the note
/// number, CC number or program number depending on `input_type`;
/// `input_value`, when set, additionally constrains the CC value or note
/// velocity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mapping {
    pub input_type: Option<MessageKind>,
    pub input_channel: u8,
    pub input_control: Option<u8>,
    pub input_value: Option<u8>,

    pub output_device: String,
    pub output_type: Option<MessageKind>,
    pub output_channel: u8,
    pub output_control: Option<u8>,
    pub output_value: Option<u8>,
    pub output_program: Option<u8>,

    /// Human-readable label, used in logs when the mapping fires
    pub description: Option<String>,
}

/// A named, orderable set of mappings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bank {
    pub id: Option<i64>,
    pub name: String,
    pub active: bool,
    pub mappings: Vec<Mapping>,
}
