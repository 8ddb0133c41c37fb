//! Bank mapping router
//!
//! Evaluates incoming MIDI events against the active bank's ordered mapping
//! list and executes the first rule that matches. First match wins — a
//! generic rule listed before a more specific one shadows it; that is the
//! documented contract, surprising as it is.

use std::sync::{Arc, RwLock};

use rig_core::{Bank, Mapping, MessageKind, PatchStore};

use crate::error::MidiResult;
use crate::events::MidiEvent;
use crate::pool::ConnectionPool;
use crate::registry::{DeviceRegistry, PortDirection};
use crate::wire;

/// Router over the currently active bank
pub struct Router {
    store: Arc<dyn PatchStore>,
    registry: Arc<DeviceRegistry>,
    pool: Arc<ConnectionPool>,
    /// Cached active bank; refreshed on demand or on cache miss
    active_bank: RwLock<Option<Bank>>,
}

/// Check one mapping against an event
fn matches(mapping: &Mapping, event: &MidiEvent) -> bool {
    if mapping.input_type != Some(event.kind) {
        return false;
    }
    if mapping.input_channel != event.channel {
        return false;
    }
    if mapping.input_control != event.control_number() {
        return false;
    }
    // Value constraint only applies when the mapping sets one
    if let Some(wanted) = mapping.input_value {
        if event.match_value() != Some(wanted) {
            return false;
        }
    }
    true
}

impl Router {
    pub fn new(
        store: Arc<dyn PatchStore>,
        registry: Arc<DeviceRegistry>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            store,
            registry,
            pool,
            active_bank: RwLock::new(None),
        }
    }

    /// Re-read the active bank from the persistence collaborator.
    /// Call after the API layer switches banks.
    pub fn refresh_active_bank(&self) {
        let bank = self.store.get_active_bank();
        match &bank {
            Some(b) => log::info!(
                "MIDI: Active bank '{}' loaded ({} mapping(s))",
                b.name,
                b.mappings.len()
            ),
            None => log::info!("MIDI: No active bank"),
        }
        *self.active_bank.write().unwrap() = bank;
    }

    fn active_bank(&self) -> Option<Bank> {
        if let Some(bank) = self.active_bank.read().unwrap().clone() {
            return Some(bank);
        }
        let bank = self.store.get_active_bank()?;
        *self.active_bank.write().unwrap() = Some(bank.clone());
        Some(bank)
    }

    /// Route one incoming event: execute the first matching mapping of the
    /// active bank, if any. Only one mapping fires per event.
    pub fn on_event(&self, event: &MidiEvent) {
        let Some(bank) = self.active_bank() else {
            return;
        };

        let Some(mapping) = bank.mappings.iter().find(|m| matches(m, event)) else {
            return;
        };

        match self.execute(mapping) {
            Ok(true) => {
                let label = mapping.description.as_deref().unwrap_or("(unnamed)");
                log::info!("MIDI: Mapping fired: {}", label);
            }
            Ok(false) => {
                log::warn!(
                    "MIDI: Mapping to '{}' skipped: device not available",
                    mapping.output_device
                );
            }
            Err(e) => {
                log::error!("MIDI: Mapping to '{}' failed: {}", mapping.output_device, e);
            }
        }
    }

    /// Translate a mapping's output side into a wire message and send it
    fn execute(&self, mapping: &Mapping) -> MidiResult<bool> {
        let Some(port) = self
            .registry
            .resolve_port(PortDirection::Output, &mapping.output_device)
        else {
            return Ok(false);
        };

        let channel = mapping.output_channel;
        let message = match mapping.output_type {
            Some(MessageKind::ControlChange) => wire::control_change(
                channel,
                mapping.output_control.unwrap_or(0),
                mapping.output_value.unwrap_or(0),
            )?,
            Some(MessageKind::ProgramChange) => {
                wire::program_change(channel, mapping.output_program.unwrap_or(0))?
            }
            Some(MessageKind::NoteOn) => wire::note_on(
                channel,
                mapping.output_control.unwrap_or(0),
                mapping.output_value.unwrap_or(64),
            )?,
            Some(MessageKind::NoteOff) => {
                wire::note_off(channel, mapping.output_control.unwrap_or(0))?
            }
            None => return Ok(false),
        };

        self.pool.send_to(&port, &message)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeBackend;
    use rig_core::Patch;

    const OUT: &str = "Other Synth";

    struct OneBankStore {
        bank: Bank,
    }

    impl PatchStore for OneBankStore {
        fn get_patch(&self, _id: i64) -> Option<Patch> {
            None
        }
        fn get_active_bank(&self) -> Option<Bank> {
            Some(self.bank.clone())
        }
        fn get_all_banks(&self) -> Vec<Bank> {
            vec![self.bank.clone()]
        }
        fn get_all_patches(&self) -> Vec<Patch> {
            Vec::new()
        }
    }

    fn cc_mapping(value: Option<u8>, out_cc: u8) -> Mapping {
        Mapping {
            input_type: Some(MessageKind::ControlChange),
            input_channel: 0,
            input_control: Some(10),
            input_value: value,
            output_device: OUT.to_string(),
            output_type: Some(MessageKind::ControlChange),
            output_channel: 0,
            output_control: Some(out_cc),
            output_value: Some(99),
            ..Default::default()
        }
    }

    fn router_with(mappings: Vec<Mapping>) -> (Arc<FakeBackend>, Router) {
        let backend = Arc::new(FakeBackend::with_outputs(&[OUT]));
        let registry = Arc::new(DeviceRegistry::new(backend.clone()));
        registry.scan().unwrap();
        let pool = Arc::new(ConnectionPool::new(backend.clone()));
        let store = Arc::new(OneBankStore {
            bank: Bank {
                name: "Live".into(),
                active: true,
                mappings,
                ..Default::default()
            },
        });
        (backend, Router::new(store, registry, pool))
    }

    fn cc_event(channel: u8, cc: u8, value: u8) -> MidiEvent {
        MidiEvent::parse(&[0xB0 | channel, cc, value], 0.0).unwrap()
    }

    #[test]
    fn test_first_match_wins_over_exact_value() {
        // Generic mapping (no value constraint) listed first, exact-value
        // mapping second: only the first fires, even for the exact value.
        let (backend, router) = router_with(vec![
            cc_mapping(None, 20),
            cc_mapping(Some(5), 21),
        ]);

        router.on_event(&cc_event(0, 10, 5));

        assert_eq!(backend.sent_to(OUT), vec![vec![0xB0, 20, 99]]);
    }

    #[test]
    fn test_value_constraint_filters() {
        let (backend, router) = router_with(vec![cc_mapping(Some(5), 20)]);

        router.on_event(&cc_event(0, 10, 6));
        assert!(backend.sent_to(OUT).is_empty());

        router.on_event(&cc_event(0, 10, 5));
        assert_eq!(backend.sent_to(OUT), vec![vec![0xB0, 20, 99]]);
    }

    #[test]
    fn test_channel_and_control_must_match() {
        let (backend, router) = router_with(vec![cc_mapping(None, 20)]);

        router.on_event(&cc_event(1, 10, 5)); // wrong channel
        router.on_event(&cc_event(0, 11, 5)); // wrong cc
        assert!(backend.sent_to(OUT).is_empty());
    }

    #[test]
    fn test_program_change_mapping() {
        let mapping = Mapping {
            input_type: Some(MessageKind::ProgramChange),
            input_channel: 0,
            input_control: Some(7),
            output_device: OUT.to_string(),
            output_type: Some(MessageKind::ProgramChange),
            output_channel: 1,
            output_program: Some(42),
            ..Default::default()
        };
        let (backend, router) = router_with(vec![mapping]);

        router.on_event(&MidiEvent::parse(&[0xC0, 7], 0.0).unwrap());
        assert_eq!(backend.sent_to(OUT), vec![vec![0xC1, 42]]);
    }

    #[test]
    fn test_note_mapping_matches_velocity_constraint() {
        let mapping = Mapping {
            input_type: Some(MessageKind::NoteOn),
            input_channel: 0,
            input_control: Some(60),
            input_value: Some(127),
            output_device: OUT.to_string(),
            output_type: Some(MessageKind::NoteOn),
            output_channel: 0,
            output_control: Some(61),
            output_value: Some(100),
            ..Default::default()
        };
        let (backend, router) = router_with(vec![mapping]);

        router.on_event(&MidiEvent::parse(&[0x90, 60, 64], 0.0).unwrap());
        assert!(backend.sent_to(OUT).is_empty());

        router.on_event(&MidiEvent::parse(&[0x90, 60, 127], 0.0).unwrap());
        assert_eq!(backend.sent_to(OUT), vec![vec![0x90, 61, 100]]);
    }
}
