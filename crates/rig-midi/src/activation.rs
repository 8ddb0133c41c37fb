//! Patch activation engine
//!
//! Resolves a stored patch into the command sequence for its target device,
//! sends it through the matching controller, and tracks the currently
//! active patch. The active patch is mirrored to a JSON file so a process
//! restart can recover "what is currently loaded" without asking the
//! hardware.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rig_core::{Patch, PatchCommand};

use crate::error::{MidiError, MidiResult};
use crate::footctrl::FootController;
use crate::pool::ConnectionPool;
use crate::registry::{classify_port, DeviceFamily, DeviceRegistry, PortDirection};
use crate::wire;
use crate::zoom::ZoomController;

/// Where an activation cycle currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationState {
    Idle,
    Activating,
    /// Last activation completed; the patch is live on the device
    Active,
    /// Last activation failed; "last activated" was not updated
    Failed(String),
}

/// Activation engine owning the "last activated patch" state
pub struct ActivationEngine {
    registry: Arc<DeviceRegistry>,
    pool: Arc<ConnectionPool>,
    zoom: Arc<ZoomController>,
    foot: Arc<FootController>,
    mirror_path: PathBuf,
    last_activated: Mutex<Option<Patch>>,
    state: Mutex<ActivationState>,
}

impl ActivationEngine {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        pool: Arc<ConnectionPool>,
        zoom: Arc<ZoomController>,
        foot: Arc<FootController>,
        mirror_path: &Path,
    ) -> Self {
        Self {
            registry,
            pool,
            zoom,
            foot,
            mirror_path: mirror_path.to_path_buf(),
            last_activated: Mutex::new(None),
            state: Mutex::new(ActivationState::Idle),
        }
    }

    pub fn state(&self) -> ActivationState {
        self.state.lock().unwrap().clone()
    }

    /// Activate a patch. Only a fully successful send updates the
    /// last-activated record and its durable mirror.
    pub fn activate(&self, patch: &Patch) -> MidiResult<bool> {
        log::info!("MIDI: Activating patch '{}'", patch.name);
        *self.state.lock().unwrap() = ActivationState::Activating;

        match self.send_patch(patch) {
            Ok(true) => {
                *self.last_activated.lock().unwrap() = Some(patch.clone());
                if let Err(e) = self.write_mirror(patch) {
                    // The patch is live on the device; a mirror write failure
                    // only costs recovery after restart.
                    log::error!("MIDI: Failed to mirror active patch: {e:#}");
                }
                *self.state.lock().unwrap() = ActivationState::Active;
                log::info!("MIDI: Patch '{}' is active", patch.name);
                Ok(true)
            }
            Ok(false) => {
                let reason = format!("output device '{}' is not connected", patch.output_device);
                log::warn!("MIDI: Patch '{}' not activated: {}", patch.name, reason);
                *self.state.lock().unwrap() = ActivationState::Failed(reason);
                Ok(false)
            }
            Err(e) => {
                log::error!("MIDI: Patch '{}' activation failed: {}", patch.name, e);
                *self.state.lock().unwrap() = ActivationState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// The last successfully activated patch: in-memory value if present,
    /// otherwise the durable mirror from a previous run.
    pub fn last_activated(&self) -> Option<Patch> {
        if let Some(patch) = self.last_activated.lock().unwrap().clone() {
            return Some(patch);
        }
        match self.read_mirror() {
            Ok(Some(patch)) => {
                *self.last_activated.lock().unwrap() = Some(patch.clone());
                Some(patch)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("MIDI: Could not read active patch mirror: {e:#}");
                None
            }
        }
    }

    fn send_patch(&self, patch: &Patch) -> MidiResult<bool> {
        let family = classify_port(&patch.output_device);

        if family == DeviceFamily::EffectsProcessor && self.zoom.is_connected() {
            let sent = self.zoom.load_patch(patch)?;
            if sent {
                if let Some(global) = patch.global_patch_number().or(patch.program) {
                    self.registry.record_last_pc(DeviceFamily::EffectsProcessor, global);
                }
            }
            return Ok(sent);
        }

        let command = patch
            .command()
            .map_err(|e| MidiError::Validation(e.to_string()))?;

        if family == DeviceFamily::FootController && self.foot.is_connected() {
            let sent = match command {
                PatchCommand::ProgramChange { program } => {
                    let sent = self.foot.send_pc(0, program)?;
                    if sent {
                        self.registry.record_last_pc(DeviceFamily::FootController, program);
                    }
                    sent
                }
                PatchCommand::ControlChange { cc, value } => self.foot.send_cc(0, cc, value)?,
                PatchCommand::NoteOn { note, velocity } => {
                    self.foot.send_note_on(0, note, velocity)?
                }
                PatchCommand::NoteOff { note } => self.foot.send_note_off(0, note)?,
            };
            return Ok(sent);
        }

        // Generic device, or a family controller that is not connected:
        // send directly through the pool.
        let Some(port) = self
            .registry
            .resolve_port(PortDirection::Output, &patch.output_device)
        else {
            log::warn!("MIDI: Output device '{}' not found in scan", patch.output_device);
            return Ok(false);
        };

        let message = match command {
            PatchCommand::ProgramChange { program } => wire::program_change(0, program)?,
            PatchCommand::ControlChange { cc, value } => wire::control_change(0, cc, value)?,
            PatchCommand::NoteOn { note, velocity } => wire::note_on(0, note, velocity)?,
            PatchCommand::NoteOff { note } => wire::note_off(0, note)?,
        };
        self.pool.send_to(&port, &message)?;

        if let PatchCommand::ProgramChange { program } = command {
            self.registry.record_last_pc(family, program);
        }
        Ok(true)
    }

    fn write_mirror(&self, patch: &Patch) -> anyhow::Result<()> {
        if let Some(parent) = self.mirror_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory: {parent:?}"))?;
        }
        let json = serde_json::to_string_pretty(patch).context("failed to serialize patch")?;
        std::fs::write(&self.mirror_path, json)
            .with_context(|| format!("failed to write mirror: {:?}", self.mirror_path))?;
        Ok(())
    }

    fn read_mirror(&self) -> anyhow::Result<Option<Patch>> {
        if !self.mirror_path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.mirror_path)
            .with_context(|| format!("failed to read mirror: {:?}", self.mirror_path))?;
        let patch = serde_json::from_str(&contents).context("mirror is not a valid patch")?;
        Ok(Some(patch))
    }
}
