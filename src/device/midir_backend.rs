//! Host backend on top of [midir](https://crates.io/crates/midir).
//!
//! Each midir input port is presented as a device with a single output port. midir has no
//! hot-plug callback, so a watcher thread rescans the port list and reports the difference.
//! An open port keeps its midir connection alive on a small keeper thread; the connection
//! callback forwards bytes over a channel that [`MidiPort::read`] waits on.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use midir::{Ignore, MidiInput, MidiInputConnection};

use super::{
    DeviceDescriptor, DeviceEvent, DeviceEventHandler, DeviceId, DeviceKind, HotplugSource,
    MidiBackend, MidiPort,
};
use crate::error::DeviceError;

pub struct MidirBackend {
    client_name: String,
    poll: Duration,
    handlers: Arc<Mutex<Vec<DeviceEventHandler>>>,
    watcher: Mutex<Option<Watcher>>,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>, poll: Duration) -> Self {
        Self {
            client_name: client_name.into(),
            poll,
            handlers: Arc::new(Mutex::new(Vec::new())),
            watcher: Mutex::new(None),
        }
    }

    fn scan(client_name: &str) -> Vec<DeviceDescriptor> {
        let mut midi_in = match MidiInput::new(client_name) {
            Ok(midi_in) => midi_in,
            Err(e) => {
                log::warn!("cannot create MIDI client: {e}");
                return Vec::new();
            }
        };
        midi_in.ignore(Ignore::None);
        midi_in
            .ports()
            .iter()
            .filter_map(|port| {
                let name = midi_in.port_name(port).ok()?;
                Some(DeviceDescriptor {
                    id: DeviceId(port.id()),
                    kind: classify(&name, client_name),
                    name,
                    output_ports: 1,
                })
            })
            .collect()
    }
}

fn classify(name: &str, client_name: &str) -> DeviceKind {
    if name.to_lowercase().starts_with(&client_name.to_lowercase()) {
        DeviceKind::Loopback
    } else {
        DeviceKind::Controller
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MidiBackend for MidirBackend {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        Self::scan(&self.client_name)
    }

    fn open_port(
        &self,
        device: &DeviceDescriptor,
        port: usize,
    ) -> Result<Box<dyn MidiPort>, DeviceError> {
        let unavailable = |reason: String| DeviceError::PortUnavailable {
            device: device.name.clone(),
            port,
            reason,
        };
        if port != 0 {
            return Err(unavailable("midir inputs have a single port".into()));
        }

        let (data_tx, data_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (close_tx, close_rx) = crossbeam_channel::bounded::<()>(1);
        let client_name = self.client_name.clone();
        let id = device.id.clone();

        let keeper = thread::Builder::new()
            .name(format!("midir-{}", device.name))
            .spawn(move || match connect(&client_name, &id, data_tx) {
                Ok(connection) => {
                    let _ = ready_tx.send(Ok(()));
                    // Returns once the port handle drops its end.
                    let _ = close_rx.recv();
                    connection.close();
                }
                Err(reason) => {
                    let _ = ready_tx.send(Err(reason));
                }
            })
            .map_err(|e| unavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(MidirPort {
                device: device.name.clone(),
                data: data_rx,
                pending: VecDeque::new(),
                close: Some(close_tx),
                keeper: Some(keeper),
            })),
            Ok(Err(reason)) => {
                let _ = keeper.join();
                Err(unavailable(reason))
            }
            Err(_) => Err(unavailable("connection thread exited".into())),
        }
    }
}

fn connect(
    client_name: &str,
    id: &DeviceId,
    data: Sender<Vec<u8>>,
) -> Result<MidiInputConnection<()>, String> {
    let mut midi_in = MidiInput::new(client_name).map_err(|e| e.to_string())?;
    midi_in.ignore(Ignore::None);
    let port = midi_in
        .ports()
        .into_iter()
        .find(|p| p.id() == id.0)
        .ok_or_else(|| "port is gone".to_owned())?;
    midi_in
        .connect(
            &port,
            &format!("{client_name}-read-input"),
            move |_stamp, bytes, _| {
                let _ = data.send(bytes.to_vec());
            },
            (),
        )
        .map_err(|e| e.to_string())
}

struct MidirPort {
    device: String,
    data: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    close: Option<Sender<()>>,
    keeper: Option<thread::JoinHandle<()>>,
}

impl MidiPort for MidirPort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        if self.pending.is_empty() {
            match self.data.recv_timeout(timeout) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::DeviceDisconnected {
                        device: self.device.clone(),
                        reason: "connection closed".into(),
                    });
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for MidirPort {
    fn drop(&mut self) {
        drop(self.close.take());
        if let Some(keeper) = self.keeper.take() {
            if keeper.join().is_err() {
                log::error!("[MIDI {}] connection thread panicked", self.device);
            }
        }
    }
}

impl HotplugSource for MidirBackend {
    fn subscribe(&self, handler: DeviceEventHandler) {
        lock(&self.handlers).push(handler);
        let mut watcher = lock(&self.watcher);
        if watcher.is_none() {
            match Watcher::spawn(self.client_name.clone(), self.poll, self.handlers.clone()) {
                Ok(started) => *watcher = Some(started),
                Err(e) => log::error!("cannot start hot-plug watcher: {e}"),
            }
        }
    }
}

/// Polls the port list and reports changes to subscribers. Stops when dropped.
struct Watcher {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Watcher {
    fn spawn(
        client_name: String,
        poll: Duration,
        handlers: Arc<Mutex<Vec<DeviceEventHandler>>>,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let mut known = snapshot(MidirBackend::scan(&client_name));
        let handle = thread::Builder::new()
            .name("midi-hotplug".into())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(poll) {
                    let current = MidirBackend::scan(&client_name);
                    let events = diff(&known, &current);
                    if events.is_empty() {
                        continue;
                    }
                    known = snapshot(current);
                    let handlers = lock(&handlers).clone();
                    for event in events {
                        log::debug!("hot-plug: {event:?}");
                        for handler in &handlers {
                            handler(event.clone());
                        }
                    }
                }
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            // The last backend handle can be dropped by a subscriber running on the watcher.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn snapshot(devices: Vec<DeviceDescriptor>) -> BTreeMap<DeviceId, DeviceDescriptor> {
    devices.into_iter().map(|d| (d.id.clone(), d)).collect()
}

/// Removals first, then additions, each in id order.
fn diff(
    known: &BTreeMap<DeviceId, DeviceDescriptor>,
    current: &[DeviceDescriptor],
) -> Vec<DeviceEvent> {
    let current_ids: BTreeMap<&DeviceId, &DeviceDescriptor> =
        current.iter().map(|d| (&d.id, d)).collect();
    let removed = known
        .iter()
        .filter(|(id, _)| !current_ids.contains_key(id))
        .map(|(_, d)| DeviceEvent::Removed(d.clone()));
    let added = current_ids
        .iter()
        .filter(|(id, _)| !known.contains_key(**id))
        .map(|(_, d)| DeviceEvent::Added((*d).clone()));
    removed.chain(added).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_removals_then_additions() {
        let a = DeviceDescriptor::controller("a", "Keys", 1);
        let b = DeviceDescriptor::controller("b", "Pads", 1);
        let c = DeviceDescriptor::controller("c", "Faders", 1);
        let known = snapshot(vec![a.clone(), b.clone()]);
        assert_eq!(
            diff(&known, &[c.clone(), b.clone()]),
            [DeviceEvent::Removed(a), DeviceEvent::Added(c)]
        );
        assert!(diff(&known, &[b.clone(), DeviceDescriptor::controller("a", "Keys", 1)]).is_empty());
    }

    #[test]
    fn own_ports_are_loopback() {
        assert_eq!(
            classify("MIDI_Synth_Bridge:out 128:0", "midi_synth_bridge"),
            DeviceKind::Loopback
        );
        assert_eq!(
            classify("Keystation 49 MK3:Keystation 49 MK3 MIDI 1 24:0", "midi_synth_bridge"),
            DeviceKind::Controller
        );
    }
}
