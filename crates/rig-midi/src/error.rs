//! Error types for MIDI device operations
//!
//! Connection and send failures are surfaced as structured errors, never as
//! panics; nothing in this crate is process-fatal. The driver layer reports
//! failures as strings, so [`classify_port_error`] maps known substrings to
//! the right variant — a best-effort heuristic, not a hardware guarantee.

use thiserror::Error;

/// Hint attached to [`MidiError::DeviceNotResponding`]; several supported
/// devices only answer on the MIDI port when powered from their own supply.
pub const EXTERNAL_POWER_HINT: &str = "device may need external power";

/// Error type for MIDI core operations
#[derive(Debug, Error)]
pub enum MidiError {
    /// No port with the given name exists
    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    /// The port exists but could not be opened (in use, permission denied)
    #[error("MIDI port unavailable: {port}: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// The device did not answer within the bounded timeout
    #[error("device on '{port}' not responding: {reason} ({EXTERNAL_POWER_HINT})")]
    DeviceNotResponding { port: String, reason: String },

    /// Malformed or absent SysEx reply
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Out-of-range channel, value or program
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown patch, bank, mapping or effect id
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for MIDI core operations
pub type MidiResult<T> = std::result::Result<T, MidiError>;

impl MidiError {
    /// User-facing hint for failures the user can act on
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            MidiError::DeviceNotResponding { .. } => Some(EXTERNAL_POWER_HINT),
            _ => None,
        }
    }
}

/// Classify a driver error string for a port operation.
///
/// Matches the failure patterns observed in the field: WinMM refusing to
/// create the output port when the pedal runs on USB power alone, ALSA
/// timeouts, and permission problems on raw ALSA sequencer access.
pub fn classify_port_error(port: &str, error: &str) -> MidiError {
    let lower = error.to_lowercase();

    if lower.contains("error creating windows mm midi output port")
        || lower.contains("timeout")
        || lower.contains("not responding")
        || lower.contains("no response")
    {
        MidiError::DeviceNotResponding {
            port: port.to_string(),
            reason: error.to_string(),
        }
    } else if lower.contains("not found") || lower.contains("no such") {
        MidiError::PortNotFound(port.to_string())
    } else {
        // Permission denied, device busy, and anything unrecognized
        MidiError::PortUnavailable {
            port: port.to_string(),
            reason: error.to_string(),
        }
    }
}
