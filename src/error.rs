//! Error types shared by the device, bank and synth layers.
//!
//! Device errors never escape the registry as faults: they end the current reader session and
//! become a notification line. Bank errors are returned to whoever asked for the bank.

use thiserror::Error;

/// Failures while opening or reading a MIDI device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device exposes no port that streams data out of the controller.
    #[error("device '{device}' has no readable output port")]
    NoReadablePort { device: String },

    /// The host refused to open the requested port.
    #[error("port {port} of '{device}' is unavailable: {reason}")]
    PortUnavailable {
        device: String,
        port: usize,
        reason: String,
    },

    /// The device went away (or faulted) while a session was reading it.
    #[error("device '{device}' disconnected: {reason}")]
    DeviceDisconnected { device: String, reason: String },
}

impl DeviceError {
    /// Name of the device the error refers to.
    pub fn device(&self) -> &str {
        match self {
            DeviceError::NoReadablePort { device }
            | DeviceError::PortUnavailable { device, .. }
            | DeviceError::DeviceDisconnected { device, .. } => device,
        }
    }
}

/// Failures while resolving or decoding an instrument bank.
#[derive(Debug, Error)]
pub enum BankError {
    #[error("instrument bank '{0}' not found")]
    FileNotFound(String),

    #[error("failed to decode instrument bank '{bank}': {reason}")]
    DecodeError { bank: String, reason: String },
}

/// Failures while applying an event to the synthesizer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SynthError {
    /// An audio-affecting event arrived before any bank was loaded (or after release).
    #[error("no instrument bank loaded")]
    NoBankLoaded,
}
