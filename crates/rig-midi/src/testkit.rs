//! Scripted driver backend for tests
//!
//! Stands in for the OS MIDI subsystem: fixed port lists, captured sends,
//! injectable input messages, and failure switches for opens and sends.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::backend::{InputCallback, InputConnection, MidiBackend, OutputPort};
use crate::error::{MidiError, MidiResult};

type SysexResponder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct Shared {
    inputs: Vec<String>,
    outputs: Vec<String>,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    fail_sends: Mutex<HashSet<String>>,
    fail_opens: Mutex<HashSet<String>>,
    output_opens: Mutex<HashMap<String, usize>>,
    input_opens: Mutex<HashMap<String, usize>>,
    callbacks: Mutex<HashMap<String, Arc<Mutex<InputCallback>>>>,
    /// Per-output-port responder: (input port to reply on, reply builder)
    responders: Mutex<HashMap<String, (String, SysexResponder)>>,
}

/// Fake [`MidiBackend`] with scripted ports and observable traffic
pub struct FakeBackend {
    shared: Arc<Shared>,
}

impl FakeBackend {
    pub fn new(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            shared: Arc::new(Shared {
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                outputs: outputs.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    pub fn with_outputs(outputs: &[&str]) -> Self {
        Self::new(&[], outputs)
    }

    pub fn with_inputs(inputs: &[&str]) -> Self {
        Self::new(inputs, &[])
    }

    /// Make the next send on a port fail (consumed by the first failure)
    pub fn fail_next_send(&self, port: &str) {
        self.shared.fail_sends.lock().unwrap().insert(port.to_string());
    }

    /// Make every open of a port fail
    pub fn fail_open(&self, port: &str) {
        self.shared.fail_opens.lock().unwrap().insert(port.to_string());
    }

    /// Messages sent to one port, in order
    pub fn sent_to(&self, port: &str) -> Vec<Vec<u8>> {
        self.shared
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == port)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    /// Every sent message across all ports, in global order
    pub fn all_sent(&self) -> Vec<(String, Vec<u8>)> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub fn output_open_count(&self, port: &str) -> usize {
        *self.shared.output_opens.lock().unwrap().get(port).unwrap_or(&0)
    }

    pub fn input_open_count(&self, port: &str) -> usize {
        *self.shared.input_opens.lock().unwrap().get(port).unwrap_or(&0)
    }

    /// Deliver a message to the registered input callback of a port
    pub fn inject_input(&self, port: &str, message: &[u8]) {
        let callback = self.shared.callbacks.lock().unwrap().get(port).cloned();
        if let Some(cb) = callback {
            let mut f = cb.lock().unwrap();
            (*f)(0, message);
        }
    }

    /// Answer sends on `output_port` by injecting the built reply on
    /// `input_port`, emulating a device that talks back over its input pair.
    pub fn set_responder(
        &self,
        output_port: &str,
        input_port: &str,
        responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) {
        self.shared.responders.lock().unwrap().insert(
            output_port.to_string(),
            (input_port.to_string(), Box::new(responder)),
        );
    }
}

struct FakeOutputPort {
    port: String,
    shared: Arc<Shared>,
}

impl OutputPort for FakeOutputPort {
    fn send(&mut self, message: &[u8]) -> MidiResult<()> {
        if self.shared.fail_sends.lock().unwrap().remove(&self.port) {
            return Err(MidiError::DeviceNotResponding {
                port: self.port.clone(),
                reason: "scripted send failure".to_string(),
            });
        }

        self.shared
            .sent
            .lock()
            .unwrap()
            .push((self.port.clone(), message.to_vec()));

        let reply = {
            let responders = self.shared.responders.lock().unwrap();
            responders
                .get(&self.port)
                .and_then(|(input_port, f)| f(message).map(|r| (input_port.clone(), r)))
        };
        if let Some((input_port, frame)) = reply {
            let callback = self.shared.callbacks.lock().unwrap().get(&input_port).cloned();
            if let Some(cb) = callback {
                let mut f = cb.lock().unwrap();
                (*f)(0, &frame);
            }
        }

        Ok(())
    }
}

struct FakeInputConnection {
    port: String,
    shared: Arc<Shared>,
}

impl InputConnection for FakeInputConnection {}

impl Drop for FakeInputConnection {
    fn drop(&mut self) {
        self.shared.callbacks.lock().unwrap().remove(&self.port);
    }
}

impl MidiBackend for FakeBackend {
    fn input_port_names(&self) -> MidiResult<Vec<String>> {
        Ok(self.shared.inputs.clone())
    }

    fn output_port_names(&self) -> MidiResult<Vec<String>> {
        Ok(self.shared.outputs.clone())
    }

    fn open_output(&self, port_name: &str) -> MidiResult<Box<dyn OutputPort>> {
        if !self.shared.outputs.iter().any(|p| p == port_name) {
            return Err(MidiError::PortNotFound(port_name.to_string()));
        }
        if self.shared.fail_opens.lock().unwrap().contains(port_name) {
            return Err(MidiError::PortUnavailable {
                port: port_name.to_string(),
                reason: "scripted open failure".to_string(),
            });
        }

        *self
            .shared
            .output_opens
            .lock()
            .unwrap()
            .entry(port_name.to_string())
            .or_insert(0) += 1;

        Ok(Box::new(FakeOutputPort {
            port: port_name.to_string(),
            shared: self.shared.clone(),
        }))
    }

    fn open_input(
        &self,
        port_name: &str,
        callback: InputCallback,
    ) -> MidiResult<Box<dyn InputConnection>> {
        if !self.shared.inputs.iter().any(|p| p == port_name) {
            return Err(MidiError::PortNotFound(port_name.to_string()));
        }
        if self.shared.fail_opens.lock().unwrap().contains(port_name) {
            return Err(MidiError::PortUnavailable {
                port: port_name.to_string(),
                reason: "scripted open failure".to_string(),
            });
        }

        *self
            .shared
            .input_opens
            .lock()
            .unwrap()
            .entry(port_name.to_string())
            .or_insert(0) += 1;

        self.shared
            .callbacks
            .lock()
            .unwrap()
            .insert(port_name.to_string(), Arc::new(Mutex::new(callback)));

        Ok(Box::new(FakeInputConnection {
            port: port_name.to_string(),
            shared: self.shared.clone(),
        }))
    }
}
