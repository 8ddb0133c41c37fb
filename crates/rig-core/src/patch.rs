//! Patch records and effects-processor patch numbering
//!
//! A patch stores the command sequence sent to an output device when it is
//! activated. Which value fields are authoritative is decided by
//! `command_type`; [`Patch::command`] enforces that invariant.
//!
//! The effects processor addresses its 100 patches two ways: a global number
//! 0–99, or a bank letter A–J plus a local slot 0–9. The two are a total
//! bijection: `global = bank_index * 10 + local`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of patch banks on the effects processor (letters A–J)
pub const BANK_COUNT: u8 = 10;

/// Patches per bank (local slots 0–9)
pub const PATCHES_PER_BANK: u8 = 10;

/// Error type for model-level validation
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("patch '{name}' is missing the {field} field required by its command type")]
    MissingField { name: String, field: &'static str },

    #[error("value {value} for {field} is out of MIDI range 0-127")]
    OutOfRange { field: &'static str, value: u8 },
}

/// Which MIDI command a patch sends on activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Program Change
    Pc,
    /// Control Change
    Cc,
    NoteOn,
    NoteOff,
}

/// Per-effect settings stored inside a patch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    /// Whether the effect block is engaged
    pub enabled: bool,
    /// Named parameter values, 0–100 scale (normalized to 0–127 on send)
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

/// A stored patch definition
///
/// Owned by the persistence collaborator; the core only interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patch {
    pub id: Option<i64>,
    pub name: String,

    /// Logical input device that triggers this patch (e.g. via Program Change)
    pub input_device: String,
    /// Program number the input device sends to select this patch
    pub input_channel: Option<u8>,

    /// Logical output device the command sequence targets
    pub output_device: String,
    pub command_type: Option<CommandType>,

    // Value fields; which are authoritative depends on command_type
    pub program: Option<u8>,
    pub cc: Option<u8>,
    pub value: Option<u8>,
    pub note: Option<u8>,
    pub velocity: Option<u8>,

    /// Effects-processor bank index (0–9, letters A–J)
    pub zoom_bank: Option<u8>,
    /// Effects-processor global patch number (0–99)
    pub zoom_patch_global: Option<u8>,

    /// Effect-block settings applied after the primary command
    pub effects: BTreeMap<String, EffectSettings>,
}

/// The primary command a patch resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchCommand {
    ProgramChange { program: u8 },
    ControlChange { cc: u8, value: u8 },
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
}

impl Patch {
    /// Resolve the authoritative command for this patch.
    ///
    /// Exactly the field set selected by `command_type` must be populated;
    /// anything else is a [`ModelError`].
    pub fn command(&self) -> Result<PatchCommand, ModelError> {
        let missing = |field: &'static str| ModelError::MissingField {
            name: self.name.clone(),
            field,
        };

        let cmd = match self.command_type {
            Some(CommandType::Pc) => PatchCommand::ProgramChange {
                program: self.program.ok_or_else(|| missing("program"))?,
            },
            Some(CommandType::Cc) => PatchCommand::ControlChange {
                cc: self.cc.ok_or_else(|| missing("cc"))?,
                value: self.value.ok_or_else(|| missing("value"))?,
            },
            Some(CommandType::NoteOn) => PatchCommand::NoteOn {
                note: self.note.ok_or_else(|| missing("note"))?,
                // The original controller defaulted velocity to full
                velocity: self.velocity.unwrap_or(127),
            },
            Some(CommandType::NoteOff) => PatchCommand::NoteOff {
                note: self.note.ok_or_else(|| missing("note"))?,
            },
            None => return Err(missing("command_type")),
        };

        for (field, byte) in cmd.data_bytes() {
            if byte > 127 {
                return Err(ModelError::OutOfRange { field, value: byte });
            }
        }

        Ok(cmd)
    }

    /// Global effects-processor patch number, from either the explicit
    /// global field or the bank/local pair.
    pub fn global_patch_number(&self) -> Option<u8> {
        self.zoom_patch_global
            .or_else(|| global_patch_number(self.zoom_bank?, self.program?))
    }
}

impl PatchCommand {
    fn data_bytes(&self) -> Vec<(&'static str, u8)> {
        match *self {
            PatchCommand::ProgramChange { program } => vec![("program", program)],
            PatchCommand::ControlChange { cc, value } => vec![("cc", cc), ("value", value)],
            PatchCommand::NoteOn { note, velocity } => {
                vec![("note", note), ("velocity", velocity)]
            }
            PatchCommand::NoteOff { note } => vec![("note", note)],
        }
    }
}

/// A catalog entry for a toggleable effect block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub name: String,
    /// CC number addressing this block on the effects processor
    pub cc_number: u8,
}

/// Convert a bank index (0–9) to its letter (A–J)
pub fn bank_letter(index: u8) -> Option<char> {
    (index < BANK_COUNT).then(|| (b'A' + index) as char)
}

/// Convert a bank letter (A–J, case-insensitive) to its index (0–9)
pub fn bank_index(letter: char) -> Option<u8> {
    let upper = letter.to_ascii_uppercase();
    ('A'..='J')
        .contains(&upper)
        .then(|| upper as u8 - b'A')
}

/// Combine a bank index and local slot into a global patch number
pub fn global_patch_number(bank_index: u8, local: u8) -> Option<u8> {
    (bank_index < BANK_COUNT && local < PATCHES_PER_BANK)
        .then(|| bank_index * PATCHES_PER_BANK + local)
}

/// Split a global patch number (0–99) into (bank index, local slot)
pub fn split_global_patch(global: u8) -> Option<(u8, u8)> {
    (global < BANK_COUNT * PATCHES_PER_BANK)
        .then(|| (global / PATCHES_PER_BANK, global % PATCHES_PER_BANK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_numbering_round_trips() {
        for global in 0..=99u8 {
            let (bank, local) = split_global_patch(global).unwrap();
            assert_eq!(global_patch_number(bank, local), Some(global));
            let letter = bank_letter(bank).unwrap();
            assert_eq!(bank_index(letter), Some(bank));
        }
    }

    #[test]
    fn test_bank_letters() {
        assert_eq!(bank_letter(0), Some('A'));
        assert_eq!(bank_letter(9), Some('J'));
        assert_eq!(bank_letter(10), None);
        assert_eq!(bank_index('c'), Some(2));
        assert_eq!(bank_index('K'), None);
    }

    #[test]
    fn test_global_bounds() {
        assert_eq!(global_patch_number(2, 4), Some(24));
        assert_eq!(global_patch_number(9, 9), Some(99));
        assert_eq!(global_patch_number(10, 0), None);
        assert_eq!(global_patch_number(0, 10), None);
        assert_eq!(split_global_patch(100), None);
    }

    #[test]
    fn test_patch_command_pc() {
        let patch = Patch {
            name: "Lead".into(),
            command_type: Some(CommandType::Pc),
            program: Some(24),
            ..Default::default()
        };
        assert_eq!(
            patch.command(),
            Ok(PatchCommand::ProgramChange { program: 24 })
        );
    }

    #[test]
    fn test_patch_command_missing_field() {
        let patch = Patch {
            name: "Broken".into(),
            command_type: Some(CommandType::Cc),
            cc: Some(7),
            ..Default::default()
        };
        assert_eq!(
            patch.command(),
            Err(ModelError::MissingField {
                name: "Broken".into(),
                field: "value"
            })
        );
    }

    #[test]
    fn test_patch_command_note_on_default_velocity() {
        let patch = Patch {
            name: "Tap".into(),
            command_type: Some(CommandType::NoteOn),
            note: Some(60),
            ..Default::default()
        };
        assert_eq!(
            patch.command(),
            Ok(PatchCommand::NoteOn {
                note: 60,
                velocity: 127
            })
        );
    }

    #[test]
    fn test_patch_command_out_of_range() {
        let patch = Patch {
            name: "Hot".into(),
            command_type: Some(CommandType::Pc),
            program: Some(200),
            ..Default::default()
        };
        assert_eq!(
            patch.command(),
            Err(ModelError::OutOfRange {
                field: "program",
                value: 200
            })
        );
    }

    #[test]
    fn test_patch_global_from_bank_pair() {
        let patch = Patch {
            zoom_bank: Some(2),
            program: Some(4),
            ..Default::default()
        };
        assert_eq!(patch.global_patch_number(), Some(24));

        let explicit = Patch {
            zoom_patch_global: Some(57),
            ..Default::default()
        };
        assert_eq!(explicit.global_patch_number(), Some(57));
    }

    #[test]
    fn test_patch_json_round_trip() {
        let mut effects = BTreeMap::new();
        effects.insert(
            "effect_1".to_string(),
            EffectSettings {
                enabled: true,
                params: BTreeMap::from([("drive".to_string(), 80.0)]),
            },
        );
        let patch = Patch {
            id: Some(3),
            name: "Crunch".into(),
            input_device: "FootCtrl In".into(),
            input_channel: Some(2),
            output_device: "Zoom Out".into(),
            command_type: Some(CommandType::Pc),
            program: Some(12),
            effects,
            ..Default::default()
        };

        let json = serde_json::to_string(&patch).unwrap();
        let parsed: Patch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, patch);
    }
}
