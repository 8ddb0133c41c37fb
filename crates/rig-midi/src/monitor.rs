//! MIDI input monitoring
//!
//! Subscribes to a physical input port and feeds received events into the
//! bounded history, the bank mapping router and — for program changes — the
//! patch activation engine.
//!
//! The driver invokes the input callback on its own thread; doing routing or
//! activation work there would block the driver. The callback only parses
//! and forwards into a bounded channel; a dedicated dispatcher thread does
//! the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;

use rig_core::{MessageKind, PatchStore};

use crate::activation::ActivationEngine;
use crate::error::MidiResult;
use crate::events::{now_timestamp, EventLog, MidiEvent};
use crate::pool::ConnectionPool;
use crate::registry::{DeviceRegistry, PortDirection};
use crate::router::Router;

/// How the monitor is bound to its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorMode {
    /// Bound to a live input port
    Real,
    /// Monitoring was requested but no matching port exists
    Simulated,
    Disconnected,
}

/// Snapshot of the monitor's state
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub mode: MonitorMode,
    /// Number of events currently in the received-event history
    pub event_count: usize,
}

/// Input monitor with its dispatcher thread
pub struct InputMonitor {
    pool: Arc<ConnectionPool>,
    registry: Arc<DeviceRegistry>,
    router: Arc<Router>,
    activation: Arc<ActivationEngine>,
    store: Arc<dyn PatchStore>,
    events: Arc<Mutex<EventLog>>,
    active: Arc<AtomicBool>,
    device: Mutex<Option<String>>,
    port: Mutex<Option<String>>,
    mode: Mutex<MonitorMode>,
    tx: Mutex<Option<flume::Sender<MidiEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl InputMonitor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        registry: Arc<DeviceRegistry>,
        router: Arc<Router>,
        activation: Arc<ActivationEngine>,
        store: Arc<dyn PatchStore>,
    ) -> Self {
        Self {
            pool,
            registry,
            router,
            activation,
            store,
            events: Arc::new(Mutex::new(EventLog::new())),
            active: Arc::new(AtomicBool::new(false)),
            device: Mutex::new(None),
            port: Mutex::new(None),
            mode: Mutex::new(MonitorMode::Disconnected),
            tx: Mutex::new(None),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start monitoring the given device (or the default input).
    ///
    /// When no matching port exists, monitoring still starts in SIMULATED
    /// mode: the caller keeps its feed and a later rescan can bind it.
    pub fn start(&self, device_name: Option<&str>) -> MidiResult<bool> {
        let resolved = match device_name {
            Some(name) => self
                .registry
                .resolve_port(PortDirection::Input, name)
                .map(|port| (name.to_string(), port)),
            None => self
                .registry
                .default_input()
                .map(|d| (d.logical_name, d.real_port_name)),
        };

        let Some((device, port)) = resolved else {
            log::warn!(
                "MIDI: Input device {:?} not found, monitoring in SIMULATED mode",
                device_name
            );
            *self.device.lock().unwrap() = device_name.map(|s| s.to_string());
            *self.port.lock().unwrap() = None;
            *self.mode.lock().unwrap() = MonitorMode::Simulated;
            self.active.store(true, Ordering::Relaxed);
            return Ok(true);
        };

        let (tx, rx) = flume::bounded::<MidiEvent>(256);

        // Dispatcher thread: history + router + program-change activation
        let events = self.events.clone();
        let router = self.router.clone();
        let activation = self.activation.clone();
        let store = self.store.clone();
        let active = self.active.clone();
        let dispatcher = std::thread::Builder::new()
            .name("midi-dispatch".into())
            .spawn(move || run_dispatcher(rx, events, router, activation, store, active))
            .map_err(|e| crate::error::MidiError::PortUnavailable {
                port: port.clone(),
                reason: format!("failed to spawn dispatcher: {e}"),
            })?;

        // Driver callback: parse and forward, nothing else
        let callback_tx = tx.clone();
        self.pool.subscribe_input(
            &port,
            Box::new(move |_timestamp, message| {
                let Some(event) = MidiEvent::parse(message, now_timestamp()) else {
                    return;
                };
                if callback_tx.try_send(event).is_err() {
                    log::warn!("MIDI: Event channel full, dropping message");
                }
            }),
        )?;

        *self.device.lock().unwrap() = Some(device.clone());
        *self.port.lock().unwrap() = Some(port.clone());
        *self.mode.lock().unwrap() = MonitorMode::Real;
        *self.tx.lock().unwrap() = Some(tx);
        *self.dispatcher.lock().unwrap() = Some(dispatcher);
        self.active.store(true, Ordering::Relaxed);

        log::info!("MIDI: Input monitoring started on '{}' ({})", device, port);
        Ok(true)
    }

    /// Stop monitoring: deregister the callback and wind down the
    /// dispatcher. The pooled input handle stays open for other consumers.
    pub fn stop(&self) -> bool {
        self.active.store(false, Ordering::Relaxed);

        if let Some(port) = self.port.lock().unwrap().clone() {
            self.pool.unsubscribe_input(&port);
        }

        // Dropping the last sender ends the dispatcher loop
        *self.tx.lock().unwrap() = None;
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            let _ = handle.join();
        }

        log::info!("MIDI: Input monitoring stopped");
        true
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            active: self.active.load(Ordering::Relaxed),
            device: self.device.lock().unwrap().clone(),
            mode: *self.mode.lock().unwrap(),
            event_count: self.events.lock().unwrap().len(),
        }
    }

    /// Events received since the previous drain
    pub fn drain_events(&self) -> Vec<MidiEvent> {
        self.events.lock().unwrap().drain_new()
    }

    /// Drop the received-event history
    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
        log::info!("MIDI: Received-event history cleared");
    }
}

fn run_dispatcher(
    rx: flume::Receiver<MidiEvent>,
    events: Arc<Mutex<EventLog>>,
    router: Arc<Router>,
    activation: Arc<ActivationEngine>,
    store: Arc<dyn PatchStore>,
    active: Arc<AtomicBool>,
) {
    while let Ok(event) = rx.recv() {
        if !active.load(Ordering::Relaxed) {
            continue;
        }

        log::debug!("MIDI: Event received: {:?}", event);
        events.lock().unwrap().push(event.clone());

        router.on_event(&event);

        if event.kind == MessageKind::ProgramChange {
            if let Some(program) = event.program {
                activate_for_program(&store, &activation, program);
            }
        }
    }
    log::debug!("MIDI: Dispatcher stopped");
}

/// Program-change handling: find the patch bound to the incoming program
/// number and activate it directly in process.
///
/// Lookup order follows the stored bindings: `input_channel` first, then the
/// patch's own `program`.
fn activate_for_program(
    store: &Arc<dyn PatchStore>,
    activation: &Arc<ActivationEngine>,
    program: u8,
) {
    let patches = store.get_all_patches();

    let found = patches
        .iter()
        .find(|p| p.input_channel == Some(program))
        .or_else(|| patches.iter().find(|p| p.program == Some(program)));

    match found {
        Some(patch) => {
            log::info!(
                "MIDI: Program {} mapped to patch '{}', activating",
                program,
                patch.name
            );
            if let Err(e) = activation.activate(patch) {
                log::error!("MIDI: Activation from program change failed: {}", e);
            }
        }
        None => {
            log::warn!("MIDI: No patch bound to program {}", program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footctrl::FootController;
    use crate::testkit::FakeBackend;
    use crate::zoom::ZoomController;
    use rig_core::{Bank, CommandType, Patch};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    const FOOT_IN: &str = "SINCO MIDI 1";
    const FOOT_OUT: &str = "SINCO MIDI 1";

    struct TestStore {
        patches: Vec<Patch>,
    }

    impl PatchStore for TestStore {
        fn get_patch(&self, id: i64) -> Option<Patch> {
            self.patches.iter().find(|p| p.id == Some(id)).cloned()
        }
        fn get_active_bank(&self) -> Option<Bank> {
            None
        }
        fn get_all_banks(&self) -> Vec<Bank> {
            Vec::new()
        }
        fn get_all_patches(&self) -> Vec<Patch> {
            self.patches.clone()
        }
    }

    fn mirror_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rig-midi-monitor-{}-{tag}/active_patch.json",
            std::process::id()
        ))
    }

    fn monitor_rig(tag: &str, patches: Vec<Patch>) -> (Arc<FakeBackend>, InputMonitor) {
        let backend = Arc::new(FakeBackend::new(&[FOOT_IN], &[FOOT_OUT]));
        let registry = Arc::new(DeviceRegistry::new(backend.clone()));
        registry.scan().unwrap();
        let pool = Arc::new(ConnectionPool::new(backend.clone()));
        let zoom = Arc::new(ZoomController::new(pool.clone()));
        let foot = Arc::new(FootController::new(pool.clone()));
        foot.connect(FOOT_OUT).unwrap();
        let store: Arc<dyn PatchStore> = Arc::new(TestStore { patches });
        let activation = Arc::new(ActivationEngine::new(
            registry.clone(),
            pool.clone(),
            zoom,
            foot,
            &mirror_path(tag),
        ));
        let router = Arc::new(Router::new(store.clone(), registry.clone(), pool.clone()));
        let monitor = InputMonitor::new(pool, registry, router, activation, store);
        (backend, monitor)
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not met within deadline");
    }

    #[test]
    fn test_start_on_real_port() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (backend, monitor) = monitor_rig("real", Vec::new());
        assert!(monitor.start(None).unwrap());

        let status = monitor.status();
        assert!(status.active);
        assert_eq!(status.mode, MonitorMode::Real);

        backend.inject_input(FOOT_IN, &[0xB0, 10, 5]);
        wait_until(|| monitor.status().event_count == 1);

        let drained = monitor.drain_events();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].cc, Some(10));
        // Second drain sees nothing new
        assert!(monitor.drain_events().is_empty());

        monitor.stop();
    }

    #[test]
    fn test_missing_port_degrades_to_simulated() {
        let (_backend, monitor) = monitor_rig("sim", Vec::new());
        assert!(monitor.start(Some("Launchpad")).unwrap());

        let status = monitor.status();
        assert!(status.active);
        assert_eq!(status.mode, MonitorMode::Simulated);
    }

    #[test]
    fn test_program_change_activates_bound_patch() {
        let patch = Patch {
            id: Some(1),
            name: "Verse".into(),
            input_device: "FootCtrl MIDI In".into(),
            input_channel: Some(5),
            output_device: "FootCtrl MIDI Out".into(),
            command_type: Some(CommandType::Pc),
            program: Some(7),
            ..Default::default()
        };
        let (backend, monitor) = monitor_rig("pc", vec![patch]);
        monitor.start(None).unwrap();

        backend.inject_input(FOOT_IN, &[0xC0, 5]);
        wait_until(|| backend.sent_to(FOOT_OUT).contains(&vec![0xC0, 7]));

        monitor.stop();
    }

    #[test]
    fn test_stop_deregisters_callback() {
        let (backend, monitor) = monitor_rig("stop", Vec::new());
        monitor.start(None).unwrap();

        backend.inject_input(FOOT_IN, &[0xB0, 1, 1]);
        wait_until(|| monitor.status().event_count == 1);

        monitor.stop();
        assert!(!monitor.status().active);

        backend.inject_input(FOOT_IN, &[0xB0, 1, 2]);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(monitor.status().event_count, 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let (backend, monitor) = monitor_rig("restart", Vec::new());
        monitor.start(None).unwrap();
        monitor.stop();

        assert!(monitor.start(None).unwrap());
        backend.inject_input(FOOT_IN, &[0xB0, 2, 3]);
        wait_until(|| monitor.status().event_count == 1);
        monitor.stop();
    }
}
