//! Scripted in-memory backend for exercising the reader and registry without hardware.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{
    DeviceDescriptor, DeviceEvent, DeviceEventHandler, DeviceId, HotplugSource, MidiBackend,
    MidiPort,
};
use crate::error::DeviceError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PortEvent {
    Opened(DeviceId),
    Released(DeviceId),
}

enum Feed {
    Bytes(Vec<u8>),
    Fault,
}

#[derive(Default)]
struct FakeState {
    devices: Vec<DeviceDescriptor>,
    feeds: HashMap<DeviceId, Sender<Feed>>,
    unavailable: HashSet<(DeviceId, usize)>,
    read_delays: HashMap<DeviceId, Duration>,
    events: Vec<PortEvent>,
    opened_ports: Vec<(DeviceId, usize)>,
    live: usize,
    max_live: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    handlers: Arc<Mutex<Vec<DeviceEventHandler>>>,
}

impl FakeBackend {
    pub(crate) fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().devices = devices;
        backend
    }

    /// Plugs a device in and tells subscribers.
    pub(crate) fn plug(&self, device: DeviceDescriptor) {
        self.state.lock().unwrap().devices.push(device.clone());
        self.emit(DeviceEvent::Added(device));
    }

    /// Unplugs a device: its open port starts failing and subscribers are told.
    pub(crate) fn unplug(&self, id: &DeviceId) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.feeds.remove(id);
            let index = state.devices.iter().position(|d| &d.id == id);
            index.map(|i| state.devices.remove(i))
        };
        if let Some(device) = removed {
            self.emit(DeviceEvent::Removed(device));
        }
    }

    /// Announces a removal without breaking the open port first.
    pub(crate) fn announce_removal(&self, device: DeviceDescriptor) {
        self.state
            .lock()
            .unwrap()
            .devices
            .retain(|d| d.id != device.id);
        self.emit(DeviceEvent::Removed(device));
    }

    pub(crate) fn send(&self, id: &DeviceId, bytes: &[u8]) {
        if let Some(feed) = self.state.lock().unwrap().feeds.get(id) {
            let _ = feed.send(Feed::Bytes(bytes.to_vec()));
        }
    }

    /// Makes the next read on the device's open port fail.
    pub(crate) fn fault(&self, id: &DeviceId) {
        if let Some(feed) = self.state.lock().unwrap().feeds.get(id) {
            let _ = feed.send(Feed::Fault);
        }
    }

    pub(crate) fn make_unavailable(&self, id: &DeviceId, port: usize) {
        self.state
            .lock()
            .unwrap()
            .unavailable
            .insert((id.clone(), port));
    }

    /// Makes every read on the device's port block for `delay`, whatever timeout it was given.
    pub(crate) fn stall_reads(&self, id: &DeviceId, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .read_delays
            .insert(id.clone(), delay);
    }

    pub(crate) fn events(&self) -> Vec<PortEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub(crate) fn opened_ports(&self) -> Vec<(DeviceId, usize)> {
        self.state.lock().unwrap().opened_ports.clone()
    }

    pub(crate) fn live_ports(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub(crate) fn max_live_ports(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    /// Polls until `done` holds or a few seconds pass.
    pub(crate) fn wait_until(&self, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done(self)
    }

    fn emit(&self, event: DeviceEvent) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

impl MidiBackend for FakeBackend {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.state.lock().unwrap().devices.clone()
    }

    fn open_port(
        &self,
        device: &DeviceDescriptor,
        port: usize,
    ) -> Result<Box<dyn MidiPort>, DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable.contains(&(device.id.clone(), port)) {
            return Err(DeviceError::PortUnavailable {
                device: device.name.clone(),
                port,
                reason: "scripted failure".into(),
            });
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        state.feeds.insert(device.id.clone(), tx);
        state.events.push(PortEvent::Opened(device.id.clone()));
        state.opened_ports.push((device.id.clone(), port));
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        Ok(Box::new(FakePort {
            device: device.clone(),
            rx,
            pending: VecDeque::new(),
            state: self.state.clone(),
        }))
    }
}

impl HotplugSource for FakeBackend {
    fn subscribe(&self, handler: DeviceEventHandler) {
        self.handlers.lock().unwrap().push(handler);
    }
}

struct FakePort {
    device: DeviceDescriptor,
    rx: Receiver<Feed>,
    pending: VecDeque<u8>,
    state: Arc<Mutex<FakeState>>,
}

impl MidiPort for FakePort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        let delay = self
            .state
            .lock()
            .unwrap()
            .read_delays
            .get(&self.device.id)
            .copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(Feed::Bytes(bytes)) => self.pending.extend(bytes),
                Ok(Feed::Fault) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::DeviceDisconnected {
                        device: self.device.name.clone(),
                        reason: "unplugged".into(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for FakePort {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live -= 1;
        state.events.push(PortEvent::Released(self.device.id.clone()));
    }
}
