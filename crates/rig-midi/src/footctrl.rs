//! Foot-controller output
//!
//! The foot controller needs no protocol of its own: a pass-through encoder
//! for note, CC, PC and SysEx messages. Ranges are validated before
//! encoding; sends against a disconnected device report `Ok(false)` rather
//! than an error so one dead pedal never blocks the rest of the rig.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MidiResult;
use crate::pool::ConnectionPool;
use crate::registry::PortDirection;
use crate::wire;

/// Controller for the foot-controller device family
pub struct FootController {
    pool: Arc<ConnectionPool>,
    port: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl FootController {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            port: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn port(&self) -> Option<String> {
        self.port.lock().unwrap().clone()
    }

    /// Bind to an output port, opening the pooled handle
    pub fn connect(&self, port_name: &str) -> MidiResult<bool> {
        self.pool.acquire_output(port_name)?;
        *self.port.lock().unwrap() = Some(port_name.to_string());
        self.connected.store(true, Ordering::Relaxed);
        log::info!("MIDI: Foot controller connected on '{}'", port_name);
        Ok(true)
    }

    pub fn disconnect(&self) {
        if let Some(port) = self.port.lock().unwrap().clone() {
            self.pool.invalidate(PortDirection::Output, &port);
        }
        self.connected.store(false, Ordering::Relaxed);
        log::info!("MIDI: Foot controller disconnected");
    }

    fn send(&self, message: &[u8]) -> MidiResult<bool> {
        if !self.is_connected() {
            log::debug!("MIDI: Foot controller not connected, message dropped");
            return Ok(false);
        }
        let port = self.port.lock().unwrap().clone();
        let Some(port) = port else {
            return Ok(false);
        };
        match self.pool.send_to(&port, message) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::warn!("MIDI: Foot controller send failed: {}", e);
                self.connected.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn send_note_on(&self, channel: u8, note: u8, velocity: u8) -> MidiResult<bool> {
        let message = wire::note_on(channel, note, velocity)?;
        log::debug!("MIDI: Note On ch={} note={} vel={}", channel, note, velocity);
        self.send(&message)
    }

    pub fn send_note_off(&self, channel: u8, note: u8) -> MidiResult<bool> {
        let message = wire::note_off(channel, note)?;
        log::debug!("MIDI: Note Off ch={} note={}", channel, note);
        self.send(&message)
    }

    pub fn send_cc(&self, channel: u8, cc: u8, value: u8) -> MidiResult<bool> {
        let message = wire::control_change(channel, cc, value)?;
        log::debug!("MIDI: CC ch={} cc={} val={}", channel, cc, value);
        self.send(&message)
    }

    pub fn send_pc(&self, channel: u8, program: u8) -> MidiResult<bool> {
        let message = wire::program_change(channel, program)?;
        log::debug!("MIDI: PC ch={} program={}", channel, program);
        self.send(&message)
    }

    /// Send a SysEx payload, framing it if the caller passed bare bytes
    pub fn send_sysex(&self, data: &[u8]) -> MidiResult<bool> {
        let frame = wire::sysex(data);
        log::debug!("MIDI: SysEx {} byte(s)", frame.len());
        self.send(&frame)
    }
}
