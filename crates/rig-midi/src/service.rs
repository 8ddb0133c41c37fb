//! Service facade for the API collaborator
//!
//! Owns every component of the MIDI core and exposes the plain calls the
//! HTTP layer consumes. Collaborators are injected: the driver behind
//! [`MidiBackend`], storage behind [`PatchStore`]. There is no global state;
//! shared tables live inside the owned components behind their own locks,
//! and none of those locks are held across hardware I/O.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use rig_core::{bank_index, Effect, MessageKind, Patch, PatchStore};

use crate::activation::{ActivationEngine, ActivationState};
use crate::backend::MidiBackend;
use crate::config::{load_config, save_config, RigConfig};
use crate::error::{MidiError, MidiResult};
use crate::events::MidiEvent;
use crate::footctrl::FootController;
use crate::monitor::{InputMonitor, MonitorStatus};
use crate::pool::ConnectionPool;
use crate::registry::{
    classify_port, DeviceFamily, DeviceRegistry, DeviceStatus, PortDirection, ScanResult,
};
use crate::router::Router;
use crate::wire;
use crate::zoom::{effect_catalog, PatchInfo, ZoomController};

/// One MIDI command from the API collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub channel: u8,
    pub note: Option<u8>,
    pub velocity: Option<u8>,
    pub cc: Option<u8>,
    pub value: Option<u8>,
    pub program: Option<u8>,
    /// Target device; falls back to the configured output device
    pub device: Option<String>,
}

/// Partial configuration update from the API collaborator
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub auto_connect: Option<bool>,
}

/// Per-family status with availability detail, for the stage view
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusReport {
    pub name: &'static str,
    pub family: DeviceFamily,
    #[serde(flatten)]
    pub status: DeviceStatus,
    /// Whether the bound port is present in the current scan
    pub port_available: bool,
}

/// The MIDI core's public face
pub struct MidiService {
    registry: Arc<DeviceRegistry>,
    pool: Arc<ConnectionPool>,
    zoom: Arc<ZoomController>,
    foot: Arc<FootController>,
    activation: Arc<ActivationEngine>,
    router: Arc<Router>,
    monitor: InputMonitor,
    store: Arc<dyn PatchStore>,
    config: Mutex<RigConfig>,
    config_path: PathBuf,
}

impl MidiService {
    /// Build the service. `data_dir` holds the config file and the
    /// active-patch mirror; nothing else is written to disk.
    pub fn new(backend: Arc<dyn MidiBackend>, store: Arc<dyn PatchStore>, data_dir: &Path) -> Self {
        let config_path = data_dir.join("midi.yaml");
        let mirror_path = data_dir.join("active_patch.json");

        let config = load_config(&config_path);

        let registry = Arc::new(DeviceRegistry::new(backend.clone()));
        let pool = Arc::new(ConnectionPool::new(backend));
        let zoom = Arc::new(ZoomController::new(pool.clone()));
        let foot = Arc::new(FootController::new(pool.clone()));
        let activation = Arc::new(ActivationEngine::new(
            registry.clone(),
            pool.clone(),
            zoom.clone(),
            foot.clone(),
            &mirror_path,
        ));
        let router = Arc::new(Router::new(store.clone(), registry.clone(), pool.clone()));
        let monitor = InputMonitor::new(
            pool.clone(),
            registry.clone(),
            router.clone(),
            activation.clone(),
            store.clone(),
        );

        Self {
            registry,
            pool,
            zoom,
            foot,
            activation,
            router,
            monitor,
            store,
            config: Mutex::new(config),
            config_path,
        }
    }

    /// Scan ports, connect configured devices and load the active bank
    pub fn initialize(&self) -> MidiResult<bool> {
        log::info!("MIDI: Initializing controller");
        self.registry.scan()?;

        let auto_connect = self.config.lock().unwrap().auto_connect;
        if auto_connect {
            self.connect_configured_devices();
        }

        self.router.refresh_active_bank();
        log::info!("MIDI: Controller initialized");
        Ok(true)
    }

    /// Pick defaults for unset devices and connect the family controllers
    fn connect_configured_devices(&self) {
        // Fill unset devices with scan defaults (skipping pass-through)
        {
            let mut config = self.config.lock().unwrap();
            let mut changed = false;
            if config.input_device.is_none() {
                if let Some(device) = self.registry.default_input() {
                    log::info!("MIDI: Default input device: {}", device.logical_name);
                    config.input_device = Some(device.logical_name);
                    changed = true;
                }
            }
            if config.output_device.is_none() {
                if let Some(device) = self.registry.default_output() {
                    log::info!("MIDI: Default output device: {}", device.logical_name);
                    config.output_device = Some(device.logical_name);
                    changed = true;
                }
            }
            if changed {
                if let Err(e) = save_config(&config, &self.config_path) {
                    log::warn!("MIDI: Could not persist config: {e:#}");
                }
            }
        }

        // Effects processor
        if let Some(port) = self
            .registry
            .output_port_for_family(DeviceFamily::EffectsProcessor)
        {
            let input = self
                .registry
                .input_port_for_family(DeviceFamily::EffectsProcessor);
            match self.zoom.connect(&port, input.as_deref()) {
                Ok(_) => self.registry.set_status(DeviceFamily::EffectsProcessor, |s| {
                    s.connected = true;
                    s.port = Some(port.clone());
                    s.detail = "connected and working".to_string();
                }),
                Err(e) => {
                    let detail = match e.user_hint() {
                        Some(hint) => format!("connection failed: {e} ({hint})"),
                        None => format!("connection failed: {e}"),
                    };
                    self.registry.set_status(DeviceFamily::EffectsProcessor, |s| {
                        s.connected = false;
                        s.port = Some(port.clone());
                        s.detail = detail;
                    });
                }
            }
        } else {
            self.registry.set_status(DeviceFamily::EffectsProcessor, |s| {
                s.connected = false;
                s.port = None;
                s.detail = "not detected".to_string();
            });
        }

        // Foot controller
        if let Some(port) = self
            .registry
            .output_port_for_family(DeviceFamily::FootController)
        {
            match self.foot.connect(&port) {
                Ok(_) => self.registry.set_status(DeviceFamily::FootController, |s| {
                    s.connected = true;
                    s.port = Some(port.clone());
                    s.detail = "connected and working".to_string();
                }),
                Err(e) => self.registry.set_status(DeviceFamily::FootController, |s| {
                    s.connected = false;
                    s.port = Some(port.clone());
                    s.detail = format!("connection failed: {e}");
                }),
            }
        } else if let Some(port) = self
            .registry
            .input_port_for_family(DeviceFamily::FootController)
        {
            // Input-only controller: detected over USB counts as connected
            self.registry.set_status(DeviceFamily::FootController, |s| {
                s.connected = true;
                s.port = Some(port.clone());
                s.detail = "input device detected over USB".to_string();
            });
        } else {
            self.registry.set_status(DeviceFamily::FootController, |s| {
                s.connected = false;
                s.port = None;
                s.detail = "not detected".to_string();
            });
        }
    }

    /// Rescan ports and refresh classification
    pub fn scan_ports(&self) -> MidiResult<ScanResult> {
        let mut result = self.registry.scan()?;

        // Reflect live controller state on the scanned devices
        for device in result.inputs.iter_mut().chain(result.outputs.iter_mut()) {
            device.connected = match device.family {
                DeviceFamily::EffectsProcessor => self.zoom.is_connected(),
                DeviceFamily::FootController => {
                    self.foot.is_connected()
                        || self.registry.status(DeviceFamily::FootController).connected
                }
                DeviceFamily::Generic => false,
            };
        }
        Ok(result)
    }

    /// Status of both family devices, with port availability
    pub fn device_status(&self) -> Vec<DeviceStatusReport> {
        let snapshot = self.registry.snapshot();
        let port_available = |port: &Option<String>| {
            port.as_ref().is_some_and(|p| {
                snapshot
                    .inputs
                    .iter()
                    .chain(snapshot.outputs.iter())
                    .any(|d| &d.real_port_name == p)
            })
        };

        [
            ("Effects Processor", DeviceFamily::EffectsProcessor),
            ("Foot Controller", DeviceFamily::FootController),
        ]
        .into_iter()
        .map(|(name, family)| {
            let status = self.registry.status(family);
            let available = port_available(&status.port);
            DeviceStatusReport {
                name,
                family,
                status,
                port_available: available,
            }
        })
        .collect()
    }

    /// The static effect catalog
    pub fn effects(&self) -> Vec<Effect> {
        effect_catalog()
    }

    /// Current configuration snapshot
    pub fn config(&self) -> RigConfig {
        self.config.lock().unwrap().clone()
    }

    /// Apply a configuration update, persist it and reconnect
    pub fn update_config(&self, update: ConfigUpdate) -> MidiResult<bool> {
        {
            let mut config = self.config.lock().unwrap();
            if let Some(input) = update.input_device {
                config.input_device = Some(input);
            }
            if let Some(output) = update.output_device {
                config.output_device = Some(output);
            }
            if let Some(auto) = update.auto_connect {
                config.auto_connect = auto;
            }
            log::info!("MIDI: Config updated: {:?}", *config);
            if let Err(e) = save_config(&config, &self.config_path) {
                log::warn!("MIDI: Could not persist config: {e:#}");
            }
        }
        self.connect_configured_devices();
        Ok(true)
    }

    /// Send one command to a device (or the configured output device)
    pub fn send_command(&self, request: &CommandRequest) -> MidiResult<bool> {
        let device = request
            .device
            .clone()
            .or_else(|| self.config.lock().unwrap().output_device.clone())
            .ok_or_else(|| MidiError::Validation("no output device configured".to_string()))?;

        let family = classify_port(&device);
        let sent = match (family, request.kind) {
            (DeviceFamily::EffectsProcessor, MessageKind::ControlChange)
                if self.zoom.is_connected() =>
            {
                self.zoom.send_cc(
                    request.channel,
                    request.cc.unwrap_or(0),
                    request.value.unwrap_or(0),
                )?
            }
            (DeviceFamily::EffectsProcessor, MessageKind::ProgramChange)
                if self.zoom.is_connected() =>
            {
                self.zoom
                    .send_pc(request.channel, request.program.unwrap_or(0))?
            }
            (DeviceFamily::FootController, kind) if self.foot.is_connected() => match kind {
                MessageKind::NoteOn => self.foot.send_note_on(
                    request.channel,
                    request.note.unwrap_or(60),
                    request.velocity.unwrap_or(64),
                )?,
                MessageKind::NoteOff => self
                    .foot
                    .send_note_off(request.channel, request.note.unwrap_or(60))?,
                MessageKind::ControlChange => self.foot.send_cc(
                    request.channel,
                    request.cc.unwrap_or(0),
                    request.value.unwrap_or(0),
                )?,
                MessageKind::ProgramChange => self
                    .foot
                    .send_pc(request.channel, request.program.unwrap_or(0))?,
            },
            // Generic device, or a family controller that is not connected
            _ => {
                let Some(port) = self.registry.resolve_port(PortDirection::Output, &device)
                else {
                    log::error!("MIDI: Device '{}' not found", device);
                    return Ok(false);
                };
                let message = match request.kind {
                    MessageKind::NoteOn => wire::note_on(
                        request.channel,
                        request.note.unwrap_or(60),
                        request.velocity.unwrap_or(64),
                    )?,
                    MessageKind::NoteOff => {
                        wire::note_off(request.channel, request.note.unwrap_or(60))?
                    }
                    MessageKind::ControlChange => wire::control_change(
                        request.channel,
                        request.cc.unwrap_or(0),
                        request.value.unwrap_or(0),
                    )?,
                    MessageKind::ProgramChange => {
                        wire::program_change(request.channel, request.program.unwrap_or(0))?
                    }
                };
                self.pool.send_to(&port, &message)?;
                true
            }
        };

        if sent && request.kind == MessageKind::ProgramChange {
            self.registry
                .record_last_pc(family, request.program.unwrap_or(0));
        }
        Ok(sent)
    }

    /// Look up a patch and activate it
    pub fn activate_patch_by_id(&self, id: i64) -> MidiResult<bool> {
        let patch = self
            .store
            .get_patch(id)
            .ok_or_else(|| MidiError::NotFound(format!("patch {id}")))?;
        self.activation.activate(&patch)
    }

    /// Activate an already-loaded patch record
    pub fn activate_patch(&self, patch: &Patch) -> MidiResult<bool> {
        self.activation.activate(patch)
    }

    /// The last successfully activated patch, surviving restarts
    pub fn last_activated_patch(&self) -> Option<Patch> {
        self.activation.last_activated()
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation.state()
    }

    /// Re-read the active bank after the API layer switches banks
    pub fn refresh_active_bank(&self) {
        self.router.refresh_active_bank();
    }

    /// Toggle a catalog effect on the effects processor
    pub fn toggle_effect(&self, name: &str, enabled: bool) -> MidiResult<bool> {
        if !self.zoom.is_connected() {
            log::error!("MIDI: Effects processor is not connected");
            return Ok(false);
        }
        self.zoom.toggle_effect(name, enabled)
    }

    /// Send a raw SysEx payload to a device (framed if necessary)
    pub fn send_sysex(&self, data: &[u8], device: Option<&str>) -> MidiResult<bool> {
        let device = device
            .map(|s| s.to_string())
            .or_else(|| self.config.lock().unwrap().output_device.clone())
            .ok_or_else(|| MidiError::Validation("no output device configured".to_string()))?;
        let Some(port) = self.registry.resolve_port(PortDirection::Output, &device) else {
            log::error!("MIDI: Device '{}' not found", device);
            return Ok(false);
        };
        self.pool.send_to(&port, &wire::sysex(data))?;
        Ok(true)
    }

    /// Effects-processor patch select via SysEx
    pub fn send_sysex_patch_select(&self, global: u8) -> MidiResult<bool> {
        self.zoom.send_sysex_patch_select(global)
    }

    /// Effects-processor tuner switch via SysEx
    pub fn send_sysex_tuner(&self, enabled: bool) -> MidiResult<bool> {
        self.zoom.send_sysex_tuner(enabled)
    }

    /// Effects-processor effect block switch via SysEx
    pub fn send_sysex_effect_block(&self, block: u8, enabled: bool) -> MidiResult<bool> {
        self.zoom.send_sysex_effect_block(block, enabled)
    }

    /// Bank-select patch change: CC 32 with the bank byte, then the Program
    /// Change — both on channel 0, delivered in order.
    pub fn send_patch_select(&self, ff: u8, ss: u8, device: Option<&str>) -> MidiResult<bool> {
        let device = device
            .map(|s| s.to_string())
            .or_else(|| self.config.lock().unwrap().output_device.clone())
            .ok_or_else(|| MidiError::Validation("no output device configured".to_string()))?;
        let Some(port) = self.registry.resolve_port(PortDirection::Output, &device) else {
            log::error!("MIDI: Device '{}' not found", device);
            return Ok(false);
        };

        self.pool.send_to(&port, &wire::control_change(0, 32, ff)?)?;
        self.pool.send_to(&port, &wire::program_change(0, ss)?)?;
        log::info!("MIDI: Patch select sent to '{}': bank {}, program {}", port, ff, ss);
        Ok(true)
    }

    /// Discover the 10 patch names of a bank by letter (A–J).
    ///
    /// Blocking and slow; run it off request threads and use `cancel` to
    /// abandon it.
    pub fn get_bank_patches(&self, letter: char, cancel: &AtomicBool) -> MidiResult<Vec<PatchInfo>> {
        let bank = bank_index(letter)
            .ok_or_else(|| MidiError::Validation(format!("bank letter '{letter}' out of A-J")))?;
        self.zoom.get_bank_patches(bank, cancel)
    }

    /// Start input monitoring on the given or configured device
    pub fn start_monitoring(&self, device: Option<&str>) -> MidiResult<bool> {
        let configured = self.config.lock().unwrap().input_device.clone();
        let device = device.map(|s| s.to_string()).or(configured);
        self.monitor.start(device.as_deref())
    }

    /// Stop input monitoring (the pooled input handle stays open)
    pub fn stop_monitoring(&self) -> bool {
        self.monitor.stop()
    }

    pub fn monitoring_status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    /// Received events since the previous call
    pub fn drain_events(&self) -> Vec<MidiEvent> {
        self.monitor.drain_events()
    }

    pub fn clear_events(&self) {
        self.monitor.clear_events()
    }

    /// Force a reconnect cycle for one device family
    pub fn force_reconnect(&self, family: DeviceFamily) -> MidiResult<bool> {
        match family {
            DeviceFamily::EffectsProcessor => {
                log::info!("MIDI: Forcing effects-processor reconnect");
                let result = self.zoom.reconnect();
                let connected = matches!(result, Ok(true));
                self.registry.set_status(family, |s| s.connected = connected);
                result
            }
            DeviceFamily::FootController => {
                log::info!("MIDI: Forcing foot-controller reconnect");
                self.foot.disconnect();
                let Some(port) = self.registry.output_port_for_family(family) else {
                    self.registry.set_status(family, |s| {
                        s.connected = false;
                        s.detail = "not detected".to_string();
                    });
                    return Ok(false);
                };
                let result = self.foot.connect(&port);
                let connected = matches!(result, Ok(true));
                self.registry.set_status(family, |s| {
                    s.connected = connected;
                    s.port = Some(port.clone());
                });
                result
            }
            DeviceFamily::Generic => Ok(false),
        }
    }

    /// Stop monitoring and close every pooled handle. Safe to call more
    /// than once and from cleanup paths.
    pub fn shutdown(&self) {
        log::info!("MIDI: Shutting down");
        self.monitor.stop();
        self.zoom.disconnect();
        self.foot.disconnect();
        self.pool.shutdown();
        self.registry.set_status(DeviceFamily::EffectsProcessor, |s| s.connected = false);
        self.registry.set_status(DeviceFamily::FootController, |s| s.connected = false);
    }
}
