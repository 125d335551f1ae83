//! MIDI input devices: what the host platform has to provide, and the reader/registry pair
//! built on top of it.
//!
//! The host side is three small traits. [`MidiBackend`] lists devices and opens their output
//! ports, [`MidiPort`] is one open port read with a timeout, and [`HotplugSource`] reports
//! devices coming and going. [`midir_backend::MidirBackend`] implements all three for real
//! hardware.

pub mod midir_backend;
pub mod reader;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DeviceError;

pub use reader::{ReaderContext, ReaderSession};
pub use registry::Registry;

/// Stable identifier the host assigns to a device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// A controller or other source worth reading.
    Controller,
    /// A virtual port that carries the synthesizer's own traffic. Never read.
    Loopback,
}

/// A MIDI source as reported by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    /// Ports that stream data out of the device (the ones we read).
    pub output_ports: usize,
}

impl DeviceDescriptor {
    pub fn controller(id: impl Into<DeviceId>, name: impl Into<String>, output_ports: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::Controller,
            output_ports,
        }
    }
}

/// An open output port. Dropping it releases the port.
pub trait MidiPort: Send {
    /// Copies available bytes into `buf`, waiting at most `timeout`. `Ok(0)` means nothing
    /// arrived in time; an error means the port is no longer usable.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError>;
}

/// Device enumeration and port opening.
pub trait MidiBackend: Send + Sync {
    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    /// Opens output port `port` of `device`. Opening a port again supersedes the earlier handle.
    fn open_port(
        &self,
        device: &DeviceDescriptor,
        port: usize,
    ) -> Result<Box<dyn MidiPort>, DeviceError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(DeviceDescriptor),
    Removed(DeviceDescriptor),
}

pub type DeviceEventHandler = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Hot-plug notifications. Handlers are called from whatever thread the host uses.
pub trait HotplugSource: Send + Sync {
    fn subscribe(&self, handler: DeviceEventHandler);
}
