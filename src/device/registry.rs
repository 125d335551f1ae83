//! Device bookkeeping and the single active reader session.
//!
//! Every transition (open, stop, hot-plug add/remove) runs under one lock, so two concurrent
//! opens can never leave two sessions alive. Opening always stops the previous session first:
//! the newest device opened wins. If the previous reader will not release its port, the open
//! is refused rather than holding two ports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{
    DeviceDescriptor, DeviceEvent, DeviceId, DeviceKind, HotplugSource, MidiBackend,
    ReaderContext, ReaderSession,
};
use crate::config::BridgeConfig;
use crate::error::DeviceError;
use crate::notify::Notifier;
use crate::synth::SynthControl;

#[derive(Default)]
struct RegistryState {
    devices: BTreeMap<DeviceId, DeviceDescriptor>,
    session: Option<ReaderSession>,
    /// Devices whose reader already posted `Disconnect` before being reaped.
    reported: BTreeSet<DeviceId>,
}

impl RegistryState {
    /// Stops `session` and forgets it once its port is released. A session that will not let
    /// go goes back in place, so nothing is opened alongside it.
    fn retire(&mut self, mut session: ReaderSession) -> bool {
        if !session.stop() {
            self.session = Some(session);
            return false;
        }
        if session.reported_disconnect() {
            self.reported.insert(session.device().id.clone());
        }
        true
    }
}

struct Inner {
    backend: Arc<dyn MidiBackend>,
    ctx: ReaderContext,
    config: BridgeConfig,
    state: Mutex<RegistryState>,
}

/// Cheap to clone; every clone manages the same devices.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(
        backend: Arc<dyn MidiBackend>,
        synth: SynthControl,
        notifier: Notifier,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                ctx: ReaderContext::new(synth, notifier, &config),
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, text: String) {
        self.inner.ctx.notifier.send(text);
    }

    /// Opens every admissible device currently connected, in enumeration order, then
    /// follows hot-plug events from `hotplug`.
    pub fn start(&self, hotplug: &dyn HotplugSource) {
        for device in self.enumerate() {
            if let Err(e) = self.open(&device) {
                log::debug!("startup open of '{}' failed: {e}", device.name);
            }
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        hotplug.subscribe(Arc::new(move |event: DeviceEvent| {
            if let Some(inner) = weak.upgrade() {
                Registry { inner }.handle_event(event);
            }
        }));
    }

    /// Refreshes the device list from the backend.
    pub fn enumerate(&self) -> Vec<DeviceDescriptor> {
        let devices = self.inner.backend.list_devices();
        let mut state = self.lock();
        state.devices = devices
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        log::info!("found {} MIDI device(s)", devices.len());
        devices
    }

    pub fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Added(device) => self.on_device_added(device),
            DeviceEvent::Removed(device) => self.on_device_removed(device),
        }
    }

    pub fn on_device_added(&self, device: DeviceDescriptor) {
        log::info!("device added: '{}' ({})", device.name, device.id);
        {
            let mut state = self.lock();
            state.reported.remove(&device.id);
            state.devices.insert(device.id.clone(), device.clone());
        }
        if let Err(e) = self.open(&device) {
            log::debug!("could not open added device '{}': {e}", device.name);
        }
    }

    pub fn on_device_removed(&self, device: DeviceDescriptor) {
        log::info!("device removed: '{}' ({})", device.name, device.id);
        let mut state = self.lock();
        state.devices.remove(&device.id);
        let active = state
            .session
            .as_ref()
            .is_some_and(|s| s.device().id == device.id);
        if active {
            if let Some(session) = state.session.take() {
                if !state.retire(session) {
                    log::warn!("'{}' removed while its reader still runs", device.name);
                }
            }
        }
        let already_reported = state.reported.remove(&device.id)
            || state
                .session
                .as_ref()
                .is_some_and(|s| s.device().id == device.id && s.reported_disconnect());
        drop(state);
        if !already_reported {
            self.notify(format!("Disconnect: {}", device.name));
        }
    }

    /// Loopback devices and names on the denylist are never read.
    pub fn is_admissible(&self, device: &DeviceDescriptor) -> bool {
        device.kind != DeviceKind::Loopback && !self.inner.config.is_denied(&device.name)
    }

    /// Makes `device` the active session, stopping the previous one first. Returns `Ok(false)`
    /// without touching the current session if the device is not admissible, and
    /// `PortUnavailable` if the previous reader is still holding its port.
    pub fn open(&self, device: &DeviceDescriptor) -> Result<bool, DeviceError> {
        if !self.is_admissible(device) {
            log::info!("ignoring loopback device '{}'", device.name);
            return Ok(false);
        }
        let mut state = self.lock();
        self.notify(format!("Open: {}", device.name));
        if let Some(previous) = state.session.take() {
            let previous_name = previous.device().name.clone();
            log::info!("stopping reader for '{previous_name}'");
            if !state.retire(previous) {
                let e = DeviceError::PortUnavailable {
                    device: device.name.clone(),
                    port: self.inner.config.port_index,
                    reason: format!("'{previous_name}' has not released its port"),
                };
                log::warn!("{e}");
                self.notify(format!("Port unavailable: {}", device.name));
                return Err(e);
            }
        }
        match ReaderSession::start(
            self.inner.backend.as_ref(),
            device,
            self.inner.config.port_index,
            &self.inner.ctx,
        ) {
            Ok(session) => {
                log::info!("reading '{}' port {}", device.name, session.port());
                state.reported.remove(&device.id);
                state.session = Some(session);
                Ok(true)
            }
            Err(e) => {
                log::warn!("{e}");
                match &e {
                    DeviceError::NoReadablePort { device } => {
                        self.notify(format!("No readable port: {device}"))
                    }
                    DeviceError::PortUnavailable { device, .. }
                    | DeviceError::DeviceDisconnected { device, .. } => {
                        self.notify(format!("Port unavailable: {device}"))
                    }
                }
                Err(e)
            }
        }
    }

    /// Stops the active session, if any. Returns `false` if its reader has not released the
    /// port within the stop timeout; the session is kept and a later `stop` waits again.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        match state.session.take() {
            Some(session) => state.retire(session),
            None => true,
        }
    }

    /// The device being read, if its session is still running. A session whose loop ended on
    /// a read error is cleaned up here.
    pub fn active_device(&self) -> Option<DeviceDescriptor> {
        let mut state = self.lock();
        if state.session.as_ref().is_some_and(|s| !s.is_alive()) {
            if let Some(dead) = state.session.take() {
                log::info!("reaping finished reader for '{}'", dead.device().name);
                state.retire(dead);
            }
        }
        state
            .session
            .as_ref()
            .filter(|s| !s.is_stopping())
            .map(|s| s.device().clone())
    }

    /// Known devices, as of the last enumeration and hot-plug events.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().devices.values().cloned().collect()
    }
}
