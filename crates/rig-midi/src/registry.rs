//! Device registry: port discovery and classification
//!
//! Raw port names from the driver are classified into logical devices by
//! substring match against known family keywords. Classification is a pure
//! function of the name, so repeated scans of the same port list always
//! produce the same result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::backend::MidiBackend;
use crate::error::MidiResult;

/// Port name substrings identifying the effects-processor family
const EFFECTS_PROCESSOR_KEYWORDS: &[&str] = &["zoom", "g series"];

/// Port name substrings identifying the foot-controller family
const FOOT_CONTROLLER_KEYWORDS: &[&str] = &["sinco", "footctrl", "chocolate"];

/// The OS MIDI subsystem's pass-through pseudo-port; never a physical device
const PASS_THROUGH_KEYWORD: &str = "midi through";

/// Logical device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    EffectsProcessor,
    FootController,
    Generic,
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    fn suffix(self) -> &'static str {
        match self {
            PortDirection::Input => "In",
            PortDirection::Output => "Out",
        }
    }
}

/// A classified device, created during a scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Stable logical name presented to collaborators
    pub logical_name: String,
    /// Raw port name as reported by the driver
    pub real_port_name: String,
    pub direction: PortDirection,
    pub family: DeviceFamily,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of a port scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub inputs: Vec<Device>,
    pub outputs: Vec<Device>,
}

/// Per-family connection status, maintained across connect/disconnect
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Last program change sent to this device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pc: Option<u8>,
    /// Human-readable status detail for the stage view
    pub detail: String,
}

/// Classify a raw port name into a device family.
///
/// Pure and case-insensitive; unmatched ports are [`DeviceFamily::Generic`].
pub fn classify_port(name: &str) -> DeviceFamily {
    let lower = name.to_lowercase();
    if EFFECTS_PROCESSOR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        DeviceFamily::EffectsProcessor
    } else if FOOT_CONTROLLER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        DeviceFamily::FootController
    } else {
        DeviceFamily::Generic
    }
}

/// True for the driver's pass-through pseudo-port
pub fn is_pass_through(name: &str) -> bool {
    name.to_lowercase().contains(PASS_THROUGH_KEYWORD)
}

/// Classify a list of raw port names for one direction
pub fn classify_ports(direction: PortDirection, names: &[String]) -> Vec<Device> {
    names
        .iter()
        .map(|name| {
            let family = classify_port(name);
            let logical_name = match family {
                DeviceFamily::EffectsProcessor => format!("Zoom MIDI {}", direction.suffix()),
                DeviceFamily::FootController => format!("FootCtrl MIDI {}", direction.suffix()),
                DeviceFamily::Generic => name.clone(),
            };
            Device {
                logical_name,
                real_port_name: name.clone(),
                direction,
                family,
                connected: false,
                last_error: None,
            }
        })
        .collect()
}

/// Choose the default device for a direction: the first one that is not the
/// pass-through pseudo-port, falling back to the first port at all.
pub fn select_default(devices: &[Device]) -> Option<&Device> {
    devices
        .iter()
        .find(|d| !is_pass_through(&d.real_port_name))
        .or_else(|| devices.first())
}

/// Registry of scanned devices and per-family status
pub struct DeviceRegistry {
    backend: Arc<dyn MidiBackend>,
    scan: Mutex<ScanResult>,
    status: Mutex<HashMap<DeviceFamily, DeviceStatus>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self {
            backend,
            scan: Mutex::new(ScanResult::default()),
            status: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerate and classify all ports, replacing the previous snapshot
    pub fn scan(&self) -> MidiResult<ScanResult> {
        let inputs = self.backend.input_port_names()?;
        let outputs = self.backend.output_port_names()?;

        log::info!("MIDI: Scan found {} input(s), {} output(s)", inputs.len(), outputs.len());
        log::debug!("MIDI: Inputs: {:?}", inputs);
        log::debug!("MIDI: Outputs: {:?}", outputs);

        let result = ScanResult {
            inputs: classify_ports(PortDirection::Input, &inputs),
            outputs: classify_ports(PortDirection::Output, &outputs),
        };

        *self.scan.lock().unwrap() = result.clone();
        Ok(result)
    }

    /// The most recent scan snapshot
    pub fn snapshot(&self) -> ScanResult {
        self.scan.lock().unwrap().clone()
    }

    /// Default input device from the last scan
    pub fn default_input(&self) -> Option<Device> {
        select_default(&self.scan.lock().unwrap().inputs).cloned()
    }

    /// Default output device from the last scan
    pub fn default_output(&self) -> Option<Device> {
        select_default(&self.scan.lock().unwrap().outputs).cloned()
    }

    /// Resolve a device name (logical or raw, case-insensitive substring)
    /// to the raw port name for the given direction.
    pub fn resolve_port(&self, direction: PortDirection, device_name: &str) -> Option<String> {
        let scan = self.scan.lock().unwrap();
        let devices = match direction {
            PortDirection::Input => &scan.inputs,
            PortDirection::Output => &scan.outputs,
        };
        let wanted = device_name.to_lowercase();
        devices
            .iter()
            .find(|d| {
                d.logical_name.to_lowercase() == wanted
                    || d.real_port_name.to_lowercase() == wanted
                    || d.real_port_name.to_lowercase().contains(&wanted)
                    || d.logical_name.to_lowercase().contains(&wanted)
            })
            .map(|d| d.real_port_name.clone())
    }

    /// First scanned output port of the given family
    pub fn output_port_for_family(&self, family: DeviceFamily) -> Option<String> {
        self.scan
            .lock()
            .unwrap()
            .outputs
            .iter()
            .find(|d| d.family == family)
            .map(|d| d.real_port_name.clone())
    }

    /// First scanned input port of the given family
    pub fn input_port_for_family(&self, family: DeviceFamily) -> Option<String> {
        self.scan
            .lock()
            .unwrap()
            .inputs
            .iter()
            .find(|d| d.family == family)
            .map(|d| d.real_port_name.clone())
    }

    /// Update the status entry for a family
    pub fn set_status(&self, family: DeviceFamily, update: impl FnOnce(&mut DeviceStatus)) {
        let mut table = self.status.lock().unwrap();
        update(table.entry(family).or_default());
    }

    /// Copy of the status entry for a family
    pub fn status(&self, family: DeviceFamily) -> DeviceStatus {
        self.status
            .lock()
            .unwrap()
            .get(&family)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the last program change sent to a family's device
    pub fn record_last_pc(&self, family: DeviceFamily, program: u8) {
        self.set_status(family, |s| s.last_pc = Some(program));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classification_keywords() {
        assert_eq!(classify_port("Zoom G Series 3:0"), DeviceFamily::EffectsProcessor);
        assert_eq!(classify_port("ZOOM G3X MIDI 1"), DeviceFamily::EffectsProcessor);
        assert_eq!(classify_port("SINCO MIDI 1"), DeviceFamily::FootController);
        assert_eq!(classify_port("FootCtrl BT"), DeviceFamily::FootController);
        assert_eq!(classify_port("Midi Through Port-0"), DeviceFamily::Generic);
        assert_eq!(classify_port("Launchpad Mini"), DeviceFamily::Generic);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let ports = names(&["Zoom G Series 3:0", "SINCO MIDI 1", "Midi Through Port-0"]);
        let first = classify_ports(PortDirection::Output, &ports);
        let second = classify_ports(PortDirection::Output, &ports);
        assert_eq!(first, second);
    }

    #[test]
    fn test_scan_scenario_default_skips_pass_through() {
        let ports = names(&["Midi Through Port-0", "Zoom G Series 3:0", "SINCO MIDI 1"]);
        let devices = classify_ports(PortDirection::Output, &ports);

        let default = select_default(&devices).unwrap();
        assert_eq!(default.real_port_name, "Zoom G Series 3:0");
        assert_eq!(default.family, DeviceFamily::EffectsProcessor);
    }

    #[test]
    fn test_default_falls_back_to_pass_through_when_alone() {
        let ports = names(&["Midi Through Port-0"]);
        let devices = classify_ports(PortDirection::Input, &ports);
        let default = select_default(&devices).unwrap();
        assert_eq!(default.real_port_name, "Midi Through Port-0");
    }

    #[test]
    fn test_logical_names() {
        let devices = classify_ports(
            PortDirection::Output,
            &names(&["Zoom G Series 3:0", "SINCO MIDI 1", "Other"]),
        );
        assert_eq!(devices[0].logical_name, "Zoom MIDI Out");
        assert_eq!(devices[1].logical_name, "FootCtrl MIDI Out");
        assert_eq!(devices[2].logical_name, "Other");
    }
}
