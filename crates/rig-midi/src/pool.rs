//! Pooled MIDI port connections
//!
//! Ports are opened lazily on first use and reused until a send fails or the
//! entry is invalidated. Each output entry runs a dedicated worker thread
//! that owns the open handle; callers enqueue a message and wait for the ack
//! on a bounded channel. That keeps every lock out of the hardware path,
//! bounds each send with a timeout, and guarantees per-device FIFO ordering
//! (one worker per port, no parallel dispatch).
//!
//! Input entries keep the driver subscription alive and expose a swappable
//! callback slot, so monitoring can stop and restart without reopening the
//! port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};

use crate::backend::{InputCallback, InputConnection, MidiBackend, OutputPort};
use crate::error::{MidiError, MidiResult};
use crate::registry::PortDirection;

/// Ceiling on one send (enqueue → driver ack) before the entry is considered dead
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

enum PortCommand {
    Send {
        bytes: Vec<u8>,
        reply: Sender<MidiResult<()>>,
    },
}

/// Handle to a pooled output port
///
/// Two `acquire_output` calls for the same port without an intervening
/// invalidation return the same handle (same `generation`).
pub struct OutputHandle {
    port_name: String,
    generation: u64,
    opened_at: Instant,
    tx: Sender<PortCommand>,
}

impl OutputHandle {
    /// Monotonic id distinguishing successive opens of the same port
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    fn send(&self, bytes: &[u8]) -> MidiResult<()> {
        let (ack_tx, ack_rx) = flume::bounded(1);
        self.tx
            .send(PortCommand::Send {
                bytes: bytes.to_vec(),
                reply: ack_tx,
            })
            .map_err(|_| MidiError::PortUnavailable {
                port: self.port_name.clone(),
                reason: "port worker is gone".to_string(),
            })?;

        match ack_rx.recv_timeout(SEND_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(MidiError::DeviceNotResponding {
                port: self.port_name.clone(),
                reason: format!("send not acknowledged within {:?}", SEND_TIMEOUT),
            }),
        }
    }
}

struct InputEntry {
    _conn: Box<dyn InputConnection>,
    callback_slot: Arc<Mutex<Option<InputCallback>>>,
    generation: u64,
}

/// Pool of lazily-opened, reusable port connections
pub struct ConnectionPool {
    backend: Arc<dyn MidiBackend>,
    outputs: Mutex<HashMap<String, Arc<OutputHandle>>>,
    inputs: Mutex<HashMap<String, InputEntry>>,
    generation: AtomicU64,
}

impl ConnectionPool {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self {
            backend,
            outputs: Mutex::new(HashMap::new()),
            inputs: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Get or open the pooled output handle for a port.
    ///
    /// Never returns a half-open handle: if the underlying open fails, the
    /// error is surfaced and nothing is cached.
    pub fn acquire_output(&self, port_name: &str) -> MidiResult<Arc<OutputHandle>> {
        if let Some(handle) = self.outputs.lock().unwrap().get(port_name) {
            return Ok(handle.clone());
        }

        // Open outside the map lock; opens can block up to their timeout.
        let port = self.backend.open_output(port_name)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(64);

        let thread_name = format!("midi-out-{generation}");
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_output_worker(port, rx))
            .map_err(|e| MidiError::PortUnavailable {
                port: port_name.to_string(),
                reason: format!("failed to spawn port worker: {e}"),
            })?;

        let handle = Arc::new(OutputHandle {
            port_name: port_name.to_string(),
            generation,
            opened_at: Instant::now(),
            tx,
        });

        let mut outputs = self.outputs.lock().unwrap();
        // A concurrent acquire may have won the race; reuse its handle and
        // let ours drop (the worker exits when the channel disconnects).
        let entry = outputs
            .entry(port_name.to_string())
            .or_insert_with(|| handle.clone());
        Ok(entry.clone())
    }

    /// Send one message to a port via its pooled handle.
    ///
    /// A failed or timed-out send invalidates the entry so the next acquire
    /// opens a fresh handle.
    pub fn send_to(&self, port_name: &str, bytes: &[u8]) -> MidiResult<()> {
        let handle = self.acquire_output(port_name)?;
        match handle.send(bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("MIDI: Send to '{}' failed, invalidating handle: {}", port_name, e);
                self.invalidate(PortDirection::Output, port_name);
                Err(e)
            }
        }
    }

    /// Open (or reuse) an input port and install the message callback.
    ///
    /// Returns the entry's generation id.
    pub fn subscribe_input(
        &self,
        port_name: &str,
        callback: InputCallback,
    ) -> MidiResult<u64> {
        let mut inputs = self.inputs.lock().unwrap();

        if let Some(entry) = inputs.get(port_name) {
            *entry.callback_slot.lock().unwrap() = Some(callback);
            return Ok(entry.generation);
        }

        let slot: Arc<Mutex<Option<InputCallback>>> = Arc::new(Mutex::new(None));
        let driver_slot = slot.clone();
        let conn = self.backend.open_input(
            port_name,
            Box::new(move |timestamp, message| {
                if let Some(cb) = driver_slot.lock().unwrap().as_mut() {
                    cb(timestamp, message);
                }
            }),
        )?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        *slot.lock().unwrap() = Some(callback);
        inputs.insert(
            port_name.to_string(),
            InputEntry {
                _conn: conn,
                callback_slot: slot,
                generation,
            },
        );
        Ok(generation)
    }

    /// Deregister the input callback without closing the pooled handle
    pub fn unsubscribe_input(&self, port_name: &str) {
        if let Some(entry) = self.inputs.lock().unwrap().get(port_name) {
            *entry.callback_slot.lock().unwrap() = None;
        }
    }

    /// Close and remove the pooled handle for a port
    pub fn invalidate(&self, direction: PortDirection, port_name: &str) {
        match direction {
            PortDirection::Output => {
                if self.outputs.lock().unwrap().remove(port_name).is_some() {
                    log::debug!("MIDI: Output handle for '{}' removed from pool", port_name);
                }
            }
            PortDirection::Input => {
                if self.inputs.lock().unwrap().remove(port_name).is_some() {
                    log::debug!("MIDI: Input handle for '{}' removed from pool", port_name);
                }
            }
        }
    }

    /// Close every pooled handle. Safe to call repeatedly and from cleanup
    /// paths; later sends simply reopen.
    pub fn shutdown(&self) {
        let count;
        {
            let mut outputs = self.outputs.lock().unwrap();
            let mut inputs = self.inputs.lock().unwrap();
            count = outputs.len() + inputs.len();
            outputs.clear();
            inputs.clear();
        }
        if count > 0 {
            log::info!("MIDI: Connection pool shut down ({count} handle(s) closed)");
        }
    }
}

fn run_output_worker(mut port: Box<dyn OutputPort>, rx: Receiver<PortCommand>) {
    while let Ok(command) = rx.recv() {
        match command {
            PortCommand::Send { bytes, reply } => {
                let result = port.send(&bytes);
                let failed = result.is_err();
                let _ = reply.send(result);
                if failed {
                    // The caller invalidates the pool entry; this handle is done.
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeBackend;

    #[test]
    fn test_acquire_twice_returns_same_handle() {
        let backend = Arc::new(FakeBackend::with_outputs(&["Zoom G Series 3:0"]));
        let pool = ConnectionPool::new(backend.clone());

        let first = pool.acquire_output("Zoom G Series 3:0").unwrap();
        let second = pool.acquire_output("Zoom G Series 3:0").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.generation(), second.generation());
        assert_eq!(backend.output_open_count("Zoom G Series 3:0"), 1);
    }

    #[test]
    fn test_send_failure_invalidates_and_reopens() {
        let backend = Arc::new(FakeBackend::with_outputs(&["Zoom G Series 3:0"]));
        let pool = ConnectionPool::new(backend.clone());

        let first = pool.acquire_output("Zoom G Series 3:0").unwrap();

        backend.fail_next_send("Zoom G Series 3:0");
        assert!(pool.send_to("Zoom G Series 3:0", &[0xC0, 1]).is_err());

        let second = pool.acquire_output("Zoom G Series 3:0").unwrap();
        assert_ne!(first.generation(), second.generation());
        assert_eq!(backend.output_open_count("Zoom G Series 3:0"), 2);
    }

    #[test]
    fn test_send_delivers_in_order() {
        let backend = Arc::new(FakeBackend::with_outputs(&["SINCO MIDI 1"]));
        let pool = ConnectionPool::new(backend.clone());

        pool.send_to("SINCO MIDI 1", &[0xC0, 1]).unwrap();
        pool.send_to("SINCO MIDI 1", &[0xB0, 0, 127]).unwrap();
        pool.send_to("SINCO MIDI 1", &[0xB0, 1, 0]).unwrap();

        let sent = backend.sent_to("SINCO MIDI 1");
        assert_eq!(sent, vec![vec![0xC0, 1], vec![0xB0, 0, 127], vec![0xB0, 1, 0]]);
    }

    #[test]
    fn test_acquire_unknown_port_is_an_error() {
        let backend = Arc::new(FakeBackend::with_outputs(&[]));
        let pool = ConnectionPool::new(backend);
        assert!(matches!(
            pool.acquire_output("Nope"),
            Err(MidiError::PortNotFound(_))
        ));
    }

    #[test]
    fn test_failed_open_caches_nothing() {
        let backend = Arc::new(FakeBackend::with_outputs(&["Zoom G Series 3:0"]));
        backend.fail_open("Zoom G Series 3:0");
        let pool = ConnectionPool::new(backend.clone());

        assert!(matches!(
            pool.acquire_output("Zoom G Series 3:0"),
            Err(MidiError::PortUnavailable { .. })
        ));
        assert_eq!(backend.output_open_count("Zoom G Series 3:0"), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let backend = Arc::new(FakeBackend::with_outputs(&["SINCO MIDI 1"]));
        let pool = ConnectionPool::new(backend);
        pool.acquire_output("SINCO MIDI 1").unwrap();
        pool.shutdown();
        pool.shutdown();
        // Pool reopens lazily after shutdown
        assert!(pool.acquire_output("SINCO MIDI 1").is_ok());
    }

    #[test]
    fn test_input_subscription_survives_stop() {
        let backend = Arc::new(FakeBackend::with_inputs(&["SINCO MIDI 1"]));
        let pool = ConnectionPool::new(backend.clone());

        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let gen_first = pool
            .subscribe_input(
                "SINCO MIDI 1",
                Box::new(move |_, msg| sink.lock().unwrap().push(msg.to_vec())),
            )
            .unwrap();

        backend.inject_input("SINCO MIDI 1", &[0xC0, 5]);
        assert_eq!(received.lock().unwrap().len(), 1);

        // Stop: callback deregistered, port stays pooled
        pool.unsubscribe_input("SINCO MIDI 1");
        backend.inject_input("SINCO MIDI 1", &[0xC0, 6]);
        assert_eq!(received.lock().unwrap().len(), 1);

        // Restart reuses the same pooled entry
        let sink = received.clone();
        let gen_second = pool
            .subscribe_input(
                "SINCO MIDI 1",
                Box::new(move |_, msg| sink.lock().unwrap().push(msg.to_vec())),
            )
            .unwrap();
        assert_eq!(gen_first, gen_second);
        assert_eq!(backend.input_open_count("SINCO MIDI 1"), 1);
    }
}
