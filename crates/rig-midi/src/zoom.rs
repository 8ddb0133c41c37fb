//! Effects-processor protocol controller
//!
//! Speaks the Zoom G-series SysEx sub-protocol: identity handshake, patch
//! selection, tuner and per-effect-block switching, and patch-name discovery
//! over the device's reply channel.
//!
//! The hardware ships in revisions with different device id bytes; this
//! build is pinned to the G-series id below and emits no other. Change the
//! constant for a different unit, not per call site.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rig_core::{Effect, Patch, BANK_COUNT, PATCHES_PER_BANK};

use crate::error::{MidiError, MidiResult};
use crate::pool::ConnectionPool;
use crate::registry::PortDirection;
use crate::wire;

/// Zoom Corporation manufacturer id
pub const ZOOM_MANUFACTURER_ID: u8 = 0x52;

/// Device id of the supported hardware revision
pub const ZOOM_DEVICE_ID: u8 = 0x6E;

/// Pause between consecutive commands; the pedal drops messages sent
/// back-to-back while it is still applying the previous one
const INTER_COMMAND_DELAY: Duration = Duration::from_millis(50);

/// How long to wait for an asynchronous SysEx reply per probe
const REPLY_WINDOW: Duration = Duration::from_millis(150);

/// Pause before the delayed reconnection strategy
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Standard MIDI identity request (broadcast device id)
pub const IDENTITY_REQUEST: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];

/// Toggleable effect blocks and their CC numbers
const EFFECT_BLOCKS: [(&str, u8); 6] = [
    ("effect_1", 0),
    ("effect_2", 1),
    ("effect_3", 2),
    ("effect_4", 3),
    ("effect_5", 4),
    ("effect_6", 5),
];

/// Per-effect parameter CC offsets from the effect's base CC
const EFFECT_PARAM_OFFSETS: &[(&str, &[(&str, u8)])] = &[
    ("compressor", &[("level", 1), ("sensitivity", 2)]),
    ("overdrive", &[("drive", 1), ("level", 2), ("tone", 3)]),
    ("distortion", &[("drive", 1), ("level", 2), ("tone", 3)]),
    ("eq", &[("bass", 1), ("mid", 2), ("treble", 3)]),
    ("chorus", &[("rate", 1), ("depth", 2), ("level", 3)]),
    ("delay", &[("time", 1), ("feedback", 2), ("level", 3)]),
    ("reverb", &[("decay", 1), ("level", 2), ("pre_delay", 3)]),
];

/// The static effect catalog
pub fn effect_catalog() -> Vec<Effect> {
    EFFECT_BLOCKS
        .iter()
        .map(|(name, cc)| Effect {
            name: name.to_string(),
            cc_number: *cc,
        })
        .collect()
}

/// CC number for a catalog effect
pub fn effect_cc(name: &str) -> Option<u8> {
    EFFECT_BLOCKS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, cc)| *cc)
}

fn param_offsets(effect: &str) -> Option<&'static [(&'static str, u8)]> {
    EFFECT_PARAM_OFFSETS
        .iter()
        .find(|(name, _)| *name == effect)
        .map(|(_, offsets)| *offsets)
}

// === SysEx frames ===

fn zoom_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = vec![0xF0, ZOOM_MANUFACTURER_ID, 0x00, ZOOM_DEVICE_ID];
    frame.extend_from_slice(body);
    frame.push(0xF7);
    frame
}

/// Select a patch by global number: `F0 52 00 6E 09 00 00 <patch> F7`
pub fn sysex_patch_select(global: u8) -> Vec<u8> {
    zoom_frame(&[0x09, 0x00, 0x00, global])
}

/// Toggle the tuner: `F0 52 00 6E 64 0B F7`
pub fn sysex_tuner_toggle() -> Vec<u8> {
    zoom_frame(&[0x64, 0x0B])
}

/// Switch an effect block: `F0 52 00 6E 64 03 00 <block> 00 00 <state> F7`
pub fn sysex_effect_block(block: u8, enabled: bool) -> Vec<u8> {
    zoom_frame(&[0x64, 0x03, 0x00, block, 0x00, 0x00, u8::from(enabled)])
}

/// Request details for a specific patch: `F0 52 00 6E 64 <patch> F7`
pub fn sysex_request_patch(global: u8) -> Vec<u8> {
    zoom_frame(&[0x64, global])
}

/// Request the current patch of a bank slot: `F0 52 00 6E 65 <bank> <local> F7`
pub fn sysex_request_current(bank: u8, local: u8) -> Vec<u8> {
    zoom_frame(&[0x65, bank, local])
}

/// Request a full patch dump: `F0 52 00 6E 66 <patch> F7`
pub fn sysex_request_dump(global: u8) -> Vec<u8> {
    zoom_frame(&[0x66, global])
}

/// Parsed MIDI identity reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityReply {
    pub device_id: u8,
    pub manufacturer: u8,
    pub family: [u8; 2],
    pub model: [u8; 2],
    pub version: [u8; 4],
}

/// Parse an identity reply envelope:
/// `F0 7E <id> 06 02 <manufacturer> <family:2> <model:2> <version:4> F7`
pub fn parse_identity_reply(frame: &[u8]) -> Option<IdentityReply> {
    if frame.len() < 15 || frame[0] != 0xF0 || frame[1] != 0x7E {
        return None;
    }
    if frame[3] != 0x06 || frame[4] != 0x02 {
        return None;
    }
    Some(IdentityReply {
        device_id: frame[2],
        manufacturer: frame[5],
        family: [frame[6], frame[7]],
        model: [frame[8], frame[9]],
        version: [frame[10], frame[11], frame[12], frame[13]],
    })
}

/// Extract a patch name from a SysEx payload: the longest run of printable
/// ASCII (≥ 2 chars), trimmed. Different firmware revisions place the name
/// at different offsets, so the position is not assumed.
pub fn extract_patch_name(frame: &[u8]) -> Option<String> {
    let mut best: &[u8] = &[];
    let mut run_start = None;

    for (i, &byte) in frame.iter().enumerate() {
        if (0x20..=0x7E).contains(&byte) {
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            if i - start > best.len() {
                best = &frame[start..i];
            }
        }
    }
    if let Some(start) = run_start {
        if frame.len() - start > best.len() {
            best = &frame[start..];
        }
    }

    if best.len() < 2 {
        return None;
    }
    let name = String::from_utf8_lossy(best).trim().to_string();
    (name.len() >= 2).then_some(name)
}

/// One discovered patch slot
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatchInfo {
    /// Global patch number (0–99)
    pub number: u8,
    /// Bank index (0–9)
    pub bank: u8,
    pub name: String,
}

struct Ports {
    output: Option<String>,
    input: Option<String>,
}

/// Controller for the effects-processor device family
pub struct ZoomController {
    pool: Arc<ConnectionPool>,
    ports: Mutex<Ports>,
    connected: AtomicBool,
    tuner_on: AtomicBool,
    reply_rx: Mutex<Option<flume::Receiver<Vec<u8>>>>,
}

impl ZoomController {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            ports: Mutex::new(Ports {
                output: None,
                input: None,
            }),
            connected: AtomicBool::new(false),
            tuner_on: AtomicBool::new(false),
            reply_rx: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Output port this controller is bound to, if connected
    pub fn output_port(&self) -> Option<String> {
        self.ports.lock().unwrap().output.clone()
    }

    /// Connect to the device: open the output, then issue an identity
    /// request. A reply is logged when it arrives, but the connection is
    /// considered established even without one — the hardware omits the
    /// handshake in some power states.
    ///
    /// Opening runs through the reconnection chain (direct, delayed,
    /// reinitialized) before a failure is surfaced.
    pub fn connect(&self, output_port: &str, input_port: Option<&str>) -> MidiResult<bool> {
        log::info!("MIDI: Connecting effects processor on '{}'", output_port);

        {
            let mut ports = self.ports.lock().unwrap();
            ports.output = Some(output_port.to_string());
            ports.input = input_port.map(|p| p.to_string());
        }

        // Subscribe for replies before the request goes out
        if let Some(input) = input_port {
            if let Err(e) = self.ensure_reply_listener(input) {
                log::warn!("MIDI: No reply channel on '{}': {}", input, e);
            }
        }

        self.open_with_strategies(output_port)?;
        self.connected.store(true, Ordering::Relaxed);

        if let Some(reply) = self.await_identity_reply() {
            log::info!(
                "MIDI: Identity reply: manufacturer {:#04x}, family {:02x?}, model {:02x?}, version {:02x?}",
                reply.manufacturer,
                reply.family,
                reply.model,
                reply.version
            );
        } else {
            log::debug!("MIDI: No identity reply (connection still considered established)");
        }

        Ok(true)
    }

    pub fn disconnect(&self) {
        let output = self.ports.lock().unwrap().output.clone();
        if let Some(port) = output {
            self.pool.invalidate(PortDirection::Output, &port);
        }
        self.connected.store(false, Ordering::Relaxed);
        log::info!("MIDI: Effects processor disconnected");
    }

    /// Multi-strategy reconnection: direct open, delayed open, then a full
    /// reinit of the pooled handle.
    fn open_with_strategies(&self, port: &str) -> MidiResult<()> {
        let first = match self.try_open(port) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        log::warn!("MIDI: Direct open of '{}' failed: {}", port, first);

        std::thread::sleep(RECONNECT_DELAY);
        if self.try_open(port).is_ok() {
            log::info!("MIDI: Delayed open of '{}' succeeded", port);
            return Ok(());
        }

        self.pool.invalidate(PortDirection::Output, port);
        std::thread::sleep(RECONNECT_DELAY);
        match self.try_open(port) {
            Ok(()) => {
                log::info!("MIDI: Reinitialized open of '{}' succeeded", port);
                Ok(())
            }
            Err(e) => {
                if let Some(hint) = e.user_hint() {
                    log::warn!("MIDI: Effects processor unreachable on '{}': {} ({})", port, e, hint);
                } else {
                    log::warn!("MIDI: Effects processor unreachable on '{}': {}", port, e);
                }
                Err(e)
            }
        }
    }

    /// Open the pooled handle and push the identity request through it to
    /// prove the port is actually writable.
    fn try_open(&self, port: &str) -> MidiResult<()> {
        self.pool.acquire_output(port)?;
        self.pool.send_to(port, &IDENTITY_REQUEST)
    }

    /// Force a reconnect cycle on the current output port
    pub fn reconnect(&self) -> MidiResult<bool> {
        let (output, input) = {
            let ports = self.ports.lock().unwrap();
            (ports.output.clone(), ports.input.clone())
        };
        let Some(output) = output else {
            return Ok(false);
        };
        self.connected.store(false, Ordering::Relaxed);
        self.pool.invalidate(PortDirection::Output, &output);
        self.connect(&output, input.as_deref())
    }

    fn send_frame(&self, bytes: &[u8]) -> MidiResult<()> {
        let output = self.ports.lock().unwrap().output.clone();
        let Some(port) = output else {
            return Err(MidiError::PortNotFound("effects processor".to_string()));
        };
        match self.pool.send_to(&port, bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Degrade to "not connected"; the next connect reopens.
                self.connected.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Apply a patch: one Program Change for the patch's global number,
    /// then the per-effect enable CCs and parameter CCs. The Program Change
    /// is acknowledged by the port worker before any effect CC is queued.
    pub fn load_patch(&self, patch: &Patch) -> MidiResult<bool> {
        if !self.is_connected() {
            log::error!("MIDI: Effects processor is not connected");
            return Ok(false);
        }

        let global = patch
            .global_patch_number()
            .or(patch.program)
            .ok_or_else(|| {
                MidiError::Validation(format!(
                    "patch '{}' has no effects-processor patch number",
                    patch.name
                ))
            })?;

        self.send_frame(&wire::program_change(0, global)?)?;
        std::thread::sleep(INTER_COMMAND_DELAY);

        for (name, settings) in &patch.effects {
            let Some(cc) = effect_cc(name) else {
                log::warn!("MIDI: Patch references unknown effect '{}'", name);
                continue;
            };
            let value = if settings.enabled { 127 } else { 0 };
            self.send_frame(&wire::control_change(0, cc, value)?)?;
            std::thread::sleep(INTER_COMMAND_DELAY);

            self.send_effect_params(name, cc, &settings.params)?;
        }

        log::info!("MIDI: Patch '{}' loaded (program {})", patch.name, global);
        Ok(true)
    }

    fn send_effect_params(
        &self,
        effect: &str,
        base_cc: u8,
        params: &std::collections::BTreeMap<String, f64>,
    ) -> MidiResult<()> {
        let Some(offsets) = param_offsets(effect) else {
            return Ok(());
        };
        for (param, offset) in offsets {
            let Some(&raw) = params.get(*param) else {
                continue;
            };
            // Stored values use a 0–100 scale
            let scaled = if raw <= 100.0 { raw / 100.0 * 127.0 } else { raw };
            let value = scaled.clamp(0.0, 127.0) as u8;
            self.send_frame(&wire::control_change(0, base_cc + offset, value)?)?;
        }
        Ok(())
    }

    /// Switch a single catalog effect on or off
    pub fn toggle_effect(&self, name: &str, enabled: bool) -> MidiResult<bool> {
        if !self.is_connected() {
            log::error!("MIDI: Effects processor is not connected");
            return Ok(false);
        }
        let cc = effect_cc(name)
            .ok_or_else(|| MidiError::NotFound(format!("effect '{name}'")))?;
        let value = if enabled { 127 } else { 0 };
        self.send_frame(&wire::control_change(0, cc, value)?)?;
        log::info!(
            "MIDI: Effect '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(true)
    }

    /// Plain Control Change to the device
    pub fn send_cc(&self, channel: u8, cc: u8, value: u8) -> MidiResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        self.send_frame(&wire::control_change(channel, cc, value)?)?;
        Ok(true)
    }

    /// Plain Program Change to the device
    pub fn send_pc(&self, channel: u8, program: u8) -> MidiResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        self.send_frame(&wire::program_change(channel, program)?)?;
        Ok(true)
    }

    /// Select a patch by global number via SysEx
    pub fn send_sysex_patch_select(&self, global: u8) -> MidiResult<bool> {
        if global >= BANK_COUNT * PATCHES_PER_BANK {
            return Err(MidiError::Validation(format!(
                "global patch number {global} out of range 0-99"
            )));
        }
        if !self.is_connected() {
            return Ok(false);
        }
        self.send_frame(&sysex_patch_select(global))?;
        Ok(true)
    }

    /// Switch the tuner. The device exposes a toggle opcode, so the frame is
    /// only sent when the requested state differs from the tracked one.
    pub fn send_sysex_tuner(&self, enabled: bool) -> MidiResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        if self.tuner_on.swap(enabled, Ordering::Relaxed) != enabled {
            self.send_frame(&sysex_tuner_toggle())?;
        }
        Ok(true)
    }

    /// Switch an effect block by index via SysEx
    pub fn send_sysex_effect_block(&self, block: u8, enabled: bool) -> MidiResult<bool> {
        wire::validate_data("effect block", block)?;
        if !self.is_connected() {
            return Ok(false);
        }
        self.send_frame(&sysex_effect_block(block, enabled))?;
        Ok(true)
    }

    /// Discover the 10 patch names of a bank.
    ///
    /// Sequential and slow (up to 4 probes × 10 slots, each with a bounded
    /// reply window) — run it off request-handling threads. The scan checks
    /// `cancel` between probes and falls back to generic names for slots it
    /// did not reach; the result always has exactly 10 entries.
    pub fn get_bank_patches(
        &self,
        bank_index: u8,
        cancel: &AtomicBool,
    ) -> MidiResult<Vec<PatchInfo>> {
        if bank_index >= BANK_COUNT {
            return Err(MidiError::Validation(format!(
                "bank index {bank_index} out of range 0-9"
            )));
        }

        let probing = self.is_connected();
        if !probing {
            log::warn!("MIDI: Effects processor not connected; using generic patch names");
        }

        let mut patches = Vec::with_capacity(PATCHES_PER_BANK as usize);
        let mut cancelled = false;

        for local in 0..PATCHES_PER_BANK {
            // Both factors validated above, so this stays in 0..=99
            let global = bank_index * PATCHES_PER_BANK + local;

            if !cancelled && cancel.load(Ordering::Relaxed) {
                cancelled = true;
                log::info!("MIDI: Bank scan cancelled at slot {}", local);
            }

            let name = if probing && !cancelled {
                self.probe_patch_name(global, bank_index, local)
            } else {
                None
            };

            patches.push(PatchInfo {
                number: global,
                bank: bank_index,
                name: name.unwrap_or_else(|| format!("Patch {global}")),
            });
        }

        Ok(patches)
    }

    /// Try the patch-name discovery chain for one slot:
    /// specific-patch request, current-patch request, dump request, then
    /// Program-Change-and-listen.
    fn probe_patch_name(&self, global: u8, bank: u8, local: u8) -> Option<String> {
        let rx = self.reply_rx.lock().unwrap().clone()?;

        let probes: [Vec<u8>; 4] = [
            sysex_request_patch(global),
            sysex_request_current(bank, local),
            sysex_request_dump(global),
            wire::program_change(0, global).ok()?,
        ];

        for frame in probes {
            // Drop stale replies from earlier probes
            while rx.try_recv().is_ok() {}

            if self.send_frame(&frame).is_err() {
                return None;
            }
            if let Some(name) = await_patch_name(&rx) {
                log::info!("MIDI: Patch {} name discovered: '{}'", global, name);
                return Some(name);
            }
        }

        log::debug!("MIDI: No name discovered for patch {}", global);
        None
    }

    /// Subscribe the device's input port, feeding SysEx frames into the
    /// reply channel used by the identity handshake and bank scans.
    fn ensure_reply_listener(&self, input_port: &str) -> MidiResult<()> {
        let mut guard = self.reply_rx.lock().unwrap();
        let (tx, rx) = flume::unbounded();
        self.pool.subscribe_input(
            input_port,
            Box::new(move |_timestamp, message| {
                if message.first() == Some(&0xF0) {
                    let _ = tx.try_send(message.to_vec());
                }
            }),
        )?;
        *guard = Some(rx);
        Ok(())
    }

    fn await_identity_reply(&self) -> Option<IdentityReply> {
        let rx = self.reply_rx.lock().unwrap().clone()?;
        let deadline = Instant::now() + REPLY_WINDOW;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(frame) => {
                    if let Some(reply) = parse_identity_reply(&frame) {
                        return Some(reply);
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

/// Wait for a reply frame carrying a plausible patch name
fn await_patch_name(rx: &flume::Receiver<Vec<u8>>) -> Option<String> {
    let deadline = Instant::now() + REPLY_WINDOW;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(frame) => {
                if let Some(name) = extract_patch_name(&frame) {
                    return Some(name);
                }
            }
            Err(_) => return None,
        }
    }
}
