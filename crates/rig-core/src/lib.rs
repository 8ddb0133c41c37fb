//! Shared data records for the rig MIDI controller
//!
//! These are the plain records exchanged with the persistence and HTTP
//! collaborators: patches, banks of input→output mappings, and the static
//! effect catalog. The MIDI core reads and interprets them; it never mutates
//! stored records (the one exception — the "last activated patch" mirror —
//! lives in `rig-midi`).

mod bank;
mod patch;
mod store;

pub use bank::{Bank, Mapping, MessageKind};
pub use patch::{
    bank_index, bank_letter, global_patch_number, split_global_patch, CommandType, Effect,
    EffectSettings, ModelError, Patch, PatchCommand, BANK_COUNT, PATCHES_PER_BANK,
};
pub use store::PatchStore;
