//! One active read loop over one open port.
//!
//! A [`ReaderSession`] owns a dedicated thread that reads bytes, frames them, feeds each
//! message to the synth and posts it as a notification line. Creating the session opens the
//! port and starts the thread; stopping or dropping it shuts the thread down and releases the
//! port.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use crossbeam_utils::atomic::AtomicCell;

use super::{DeviceDescriptor, MidiBackend, MidiPort};
use crate::config::BridgeConfig;
use crate::error::{DeviceError, SynthError};
use crate::framer::Framer;
use crate::message::MidiMessage;
use crate::notify::Notifier;
use crate::synth::SynthControl;

const READ_BUFFER: usize = 256;

/// What a reader thread needs besides its port.
#[derive(Clone)]
pub struct ReaderContext {
    pub synth: SynthControl,
    pub notifier: Notifier,
    pub read_timeout: Duration,
    pub stop_timeout: Duration,
}

impl ReaderContext {
    pub fn new(synth: SynthControl, notifier: Notifier, config: &BridgeConfig) -> Self {
        Self {
            synth,
            notifier,
            read_timeout: config.read_timeout(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Flags shared between a session handle and its thread.
struct Signals {
    shutdown: AtomicCell<bool>,
    alive: AtomicCell<bool>,
    disconnected: AtomicCell<bool>,
}

pub struct ReaderSession {
    device: DeviceDescriptor,
    port: usize,
    signals: Arc<Signals>,
    handle: Option<thread::JoinHandle<()>>,
    /// Disconnects when the reader thread exits.
    done: Receiver<()>,
    stop_timeout: Duration,
}

impl ReaderSession {
    /// Opens the first output port of `device` that the backend will hand out, starting at
    /// `port_index` and wrapping around, and starts reading it.
    pub fn start(
        backend: &dyn MidiBackend,
        device: &DeviceDescriptor,
        port_index: usize,
        ctx: &ReaderContext,
    ) -> Result<Self, DeviceError> {
        let ports = device.output_ports;
        if ports == 0 {
            return Err(DeviceError::NoReadablePort {
                device: device.name.clone(),
            });
        }
        let first = port_index % ports;
        let mut last_error = None;
        for port in (first..ports).chain(0..first) {
            match backend.open_port(device, port) {
                Ok(handle) => return Self::spawn(device.clone(), port, handle, ctx),
                Err(e) => {
                    log::warn!("[MIDI {}] {e}", device.name);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(DeviceError::NoReadablePort {
            device: device.name.clone(),
        }))
    }

    fn spawn(
        device: DeviceDescriptor,
        port: usize,
        handle: Box<dyn MidiPort>,
        ctx: &ReaderContext,
    ) -> Result<Self, DeviceError> {
        let signals = Arc::new(Signals {
            shutdown: AtomicCell::new(false),
            alive: AtomicCell::new(true),
            disconnected: AtomicCell::new(false),
        });
        let thread_signals = signals.clone();
        let thread_ctx = ctx.clone();
        let name = device.name.clone();
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);

        let join = thread::Builder::new()
            .name(format!("midi-reader-{}", device.name))
            .spawn(move || {
                read_loop(handle, &name, &thread_ctx, &thread_signals);
                thread_signals.alive.store(false);
                drop(done_tx);
            })
            .map_err(|e| DeviceError::PortUnavailable {
                device: device.name.clone(),
                port,
                reason: format!("cannot spawn reader thread: {e}"),
            })?;

        Ok(Self {
            device,
            port,
            signals,
            handle: Some(join),
            done,
            stop_timeout: ctx.stop_timeout,
        })
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn port(&self) -> usize {
        self.port
    }

    /// False once the read loop has exited, whether stopped or failed.
    pub fn is_alive(&self) -> bool {
        self.signals.alive.load()
    }

    /// True if the loop ended on a read error and already posted a disconnect line.
    pub fn reported_disconnect(&self) -> bool {
        self.signals.disconnected.load()
    }

    /// True once `stop()` has been asked for, even if the thread has not exited yet.
    pub fn is_stopping(&self) -> bool {
        self.signals.shutdown.load()
    }

    /// Signals the loop to end and waits, up to the stop timeout, for the port to be
    /// released. Returns `false` if the thread still holds the port; calling `stop()` again
    /// waits again. Once it has returned `true` it is a no-op.
    pub fn stop(&mut self) -> bool {
        self.signals.shutdown.store(true);
        if self.handle.is_none() {
            return true;
        }
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(self.stop_timeout) {
            log::warn!(
                "[MIDI {}] reader still holds its port after {:?}",
                self.device.name,
                self.stop_timeout
            );
            return false;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[MIDI {}] reader thread panicked", self.device.name);
            }
        }
        true
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        if !self.stop() {
            log::warn!("[MIDI {}] detaching reader thread", self.device.name);
        }
    }
}

fn read_loop(mut port: Box<dyn MidiPort>, name: &str, ctx: &ReaderContext, signals: &Signals) {
    log::info!("[MIDI {}] reader started", name);
    let mut framer = Framer::new();
    let mut buf = [0u8; READ_BUFFER];
    let mut warned_no_bank = false;

    while !signals.shutdown.load() {
        match port.read(&mut buf, ctx.read_timeout) {
            Ok(0) => {}
            Ok(n) => {
                log::trace!("[MIDI {}] {:02X?}", name, &buf[..n]);
                for msg in framer.feed(&buf[..n]) {
                    dispatch(&msg, name, ctx, &mut warned_no_bank);
                }
            }
            Err(e) => {
                if !signals.shutdown.load() {
                    log::warn!("[MIDI {}] {e}", name);
                    signals.disconnected.store(true);
                    ctx.notifier.send(format!("Disconnect: {name}"));
                }
                break;
            }
        }
    }

    drop(port);
    if framer.resyncs() > 0 {
        log::debug!("[MIDI {}] {} byte(s) skipped to resync", name, framer.resyncs());
    }
    log::info!("[MIDI {}] reader stopped", name);
}

fn dispatch(msg: &MidiMessage, name: &str, ctx: &ReaderContext, warned_no_bank: &mut bool) {
    match ctx.synth.consume_event(msg) {
        Ok(()) => {}
        Err(SynthError::NoBankLoaded) if !*warned_no_bank => {
            log::warn!("[MIDI {}] no instrument bank loaded, dropping events", name);
            *warned_no_bank = true;
        }
        Err(e) => log::debug!("[MIDI {}] {msg}: {e}", name),
    }
    ctx.notifier.send(msg.to_string());
}
