//! Driver backend seam
//!
//! Everything that talks to the OS MIDI subsystem goes through
//! [`MidiBackend`], so the registry, pool and controllers can be exercised
//! against a scripted fake in tests. The production implementation wraps
//! midir (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//!
//! The driver has no timeout of its own on port opens; a stalled open on an
//! unpowered pedal would otherwise hang the caller. Opens therefore run on a
//! short-lived thread and the caller waits on a bounded channel.

use std::time::Duration;

use midir::{Ignore, MidiInput, MidiOutput};

use crate::error::{classify_port_error, MidiError, MidiResult};

/// Ceiling on a hardware port open before it is reported as not responding
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback invoked once per inbound MIDI message, on the driver's thread
pub type InputCallback = Box<dyn FnMut(u64, &[u8]) + Send + 'static>;

/// An open output port
pub trait OutputPort: Send {
    /// Send one complete MIDI message (channel voice or SysEx frame)
    fn send(&mut self, message: &[u8]) -> MidiResult<()>;
}

/// An open input subscription; dropping it disconnects the callback
pub trait InputConnection: Send {}

/// Abstraction over the OS MIDI subsystem
pub trait MidiBackend: Send + Sync {
    /// Raw input port names, in driver order
    fn input_port_names(&self) -> MidiResult<Vec<String>>;

    /// Raw output port names, in driver order
    fn output_port_names(&self) -> MidiResult<Vec<String>>;

    /// Open an output port by exact name
    fn open_output(&self, port_name: &str) -> MidiResult<Box<dyn OutputPort>>;

    /// Open an input port by exact name, registering the message callback
    fn open_input(
        &self,
        port_name: &str,
        callback: InputCallback,
    ) -> MidiResult<Box<dyn InputConnection>>;
}

/// midir-backed implementation
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
        }
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("rig-midi")
    }
}

struct MidirOutputPort {
    port_name: String,
    conn: midir::MidiOutputConnection,
}

impl OutputPort for MidirOutputPort {
    fn send(&mut self, message: &[u8]) -> MidiResult<()> {
        self.conn
            .send(message)
            .map_err(|e| classify_port_error(&self.port_name, &e.to_string()))
    }
}

struct MidirInputConnection {
    _conn: midir::MidiInputConnection<()>,
}

impl InputConnection for MidirInputConnection {}

impl MidiBackend for MidirBackend {
    fn input_port_names(&self) -> MidiResult<Vec<String>> {
        let midi_in = MidiInput::new(&self.client_name)
            .map_err(|e| classify_port_error("(input init)", &e.to_string()))?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect())
    }

    fn output_port_names(&self) -> MidiResult<Vec<String>> {
        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| classify_port_error("(output init)", &e.to_string()))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }

    fn open_output(&self, port_name: &str) -> MidiResult<Box<dyn OutputPort>> {
        let client = self.client_name.clone();
        let name = port_name.to_string();

        run_with_open_timeout(port_name, move || {
            let midi_out = MidiOutput::new(&client)
                .map_err(|e| classify_port_error(&name, &e.to_string()))?;

            let port = midi_out
                .ports()
                .into_iter()
                .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| MidiError::PortNotFound(name.clone()))?;

            let conn = midi_out
                .connect(&port, "rig-midi-out")
                .map_err(|e| classify_port_error(&name, &e.to_string()))?;

            log::info!("MIDI: Opened output port: {}", name);
            Ok(Box::new(MidirOutputPort {
                port_name: name.clone(),
                conn,
            }) as Box<dyn OutputPort>)
        })
    }

    fn open_input(
        &self,
        port_name: &str,
        mut callback: InputCallback,
    ) -> MidiResult<Box<dyn InputConnection>> {
        let client = self.client_name.clone();
        let name = port_name.to_string();

        run_with_open_timeout(port_name, move || {
            let mut midi_in = MidiInput::new(&client)
                .map_err(|e| classify_port_error(&name, &e.to_string()))?;
            // SysEx replies (patch name discovery) are filtered out by default
            midi_in.ignore(Ignore::None);

            let port = midi_in
                .ports()
                .into_iter()
                .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| MidiError::PortNotFound(name.clone()))?;

            let conn = midi_in
                .connect(
                    &port,
                    "rig-midi-in",
                    move |timestamp, message, _| callback(timestamp, message),
                    (),
                )
                .map_err(|e| classify_port_error(&name, &e.to_string()))?;

            log::info!("MIDI: Opened input port: {}", name);
            Ok(Box::new(MidirInputConnection { _conn: conn }) as Box<dyn InputConnection>)
        })
    }
}

/// Run a blocking port open on its own thread, bounded by [`OPEN_TIMEOUT`].
///
/// On expiry the orphaned open keeps running on its thread and its result is
/// dropped; the caller gets `DeviceNotResponding` instead of a hang.
fn run_with_open_timeout<T, F>(port_name: &str, open: F) -> MidiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> MidiResult<T> + Send + 'static,
{
    let (tx, rx) = flume::bounded(1);

    std::thread::Builder::new()
        .name("midi-open".into())
        .spawn(move || {
            let _ = tx.send(open());
        })
        .map_err(|e| MidiError::PortUnavailable {
            port: port_name.to_string(),
            reason: format!("failed to spawn open thread: {e}"),
        })?;

    match rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(result) => result,
        Err(_) => Err(MidiError::DeviceNotResponding {
            port: port_name.to_string(),
            reason: format!("open timed out after {:?}", OPEN_TIMEOUT),
        }),
    }
}
