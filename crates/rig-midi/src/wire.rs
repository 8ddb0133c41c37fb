//! Raw MIDI message assembly
//!
//! Channel voice messages are built here with range validation up front, so
//! controllers never hand the driver an out-of-range status or data byte.

use crate::error::{MidiError, MidiResult};

/// Validate a MIDI channel (0–15)
pub fn validate_channel(channel: u8) -> MidiResult<()> {
    if channel > 15 {
        return Err(MidiError::Validation(format!(
            "channel {channel} out of range 0-15"
        )));
    }
    Ok(())
}

/// Validate a MIDI data byte (0–127)
pub fn validate_data(field: &str, value: u8) -> MidiResult<()> {
    if value > 127 {
        return Err(MidiError::Validation(format!(
            "{field} {value} out of range 0-127"
        )));
    }
    Ok(())
}

pub fn note_on(channel: u8, note: u8, velocity: u8) -> MidiResult<Vec<u8>> {
    validate_channel(channel)?;
    validate_data("note", note)?;
    validate_data("velocity", velocity)?;
    Ok(vec![0x90 | channel, note, velocity])
}

pub fn note_off(channel: u8, note: u8) -> MidiResult<Vec<u8>> {
    validate_channel(channel)?;
    validate_data("note", note)?;
    Ok(vec![0x80 | channel, note, 0])
}

pub fn control_change(channel: u8, cc: u8, value: u8) -> MidiResult<Vec<u8>> {
    validate_channel(channel)?;
    validate_data("cc", cc)?;
    validate_data("value", value)?;
    Ok(vec![0xB0 | channel, cc, value])
}

pub fn program_change(channel: u8, program: u8) -> MidiResult<Vec<u8>> {
    validate_channel(channel)?;
    validate_data("program", program)?;
    Ok(vec![0xC0 | channel, program])
}

/// Frame a SysEx payload, leaving already-framed payloads untouched
pub fn sysex(data: &[u8]) -> Vec<u8> {
    if data.first() == Some(&0xF0) {
        return data.to_vec();
    }
    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push(0xF0);
    frame.extend_from_slice(data);
    frame.push(0xF7);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        assert_eq!(note_on(1, 60, 100).unwrap(), vec![0x91, 60, 100]);
        assert_eq!(note_off(0, 60).unwrap(), vec![0x80, 60, 0]);
        assert_eq!(control_change(2, 7, 127).unwrap(), vec![0xB2, 7, 127]);
        assert_eq!(program_change(0, 24).unwrap(), vec![0xC0, 24]);
    }

    #[test]
    fn test_validation() {
        assert!(note_on(16, 60, 100).is_err());
        assert!(note_on(0, 128, 100).is_err());
        assert!(control_change(0, 7, 200).is_err());
        assert!(program_change(0, 130).is_err());
    }

    #[test]
    fn test_sysex_framing() {
        assert_eq!(sysex(&[0x52, 0x00]), vec![0xF0, 0x52, 0x00, 0xF7]);
        // Already framed: unchanged
        assert_eq!(sysex(&[0xF0, 0x52, 0xF7]), vec![0xF0, 0x52, 0xF7]);
    }
}
