//! Persistence collaborator seam
//!
//! The database layer lives outside this workspace's core; the MIDI engine
//! only ever sees it through this trait. Implementations must be cheap to
//! call from the monitor's dispatcher thread (the router reads the active
//! bank on every incoming event unless it has a cached copy).

use crate::{Bank, Patch};

/// Read access to stored patches and banks
pub trait PatchStore: Send + Sync {
    /// Look up a single patch by id
    fn get_patch(&self, id: i64) -> Option<Patch>;

    /// The currently active bank, if any
    fn get_active_bank(&self) -> Option<Bank>;

    /// All banks, in storage order
    fn get_all_banks(&self) -> Vec<Bank>;

    /// All patches, in storage order
    fn get_all_patches(&self) -> Vec<Patch>;
}
