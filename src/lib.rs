//! This crate connects live MIDI controllers to a software synthesizer, following devices as
//! they are plugged in and unplugged.
//!
//! It is organized as follows:
//! * The `device` module tracks connected MIDI devices and keeps at most one of them open. The
//!   open device is read on a dedicated thread by a `ReaderSession`; the `Registry` decides which
//!   device that is (the most recently opened one wins) and reacts to hot-plug events. Host
//!   access sits behind the `MidiBackend` and `HotplugSource` traits, implemented for real
//!   hardware by `MidirBackend` using [midir](https://crates.io/crates/midir).
//! * The `framer` module turns raw bytes into [MIDI messages](https://www.midi.org/specifications-old/item/table-1-summary-of-midi-message),
//!   honoring running status and resynchronizing after corrupt bytes. Messages are defined in
//!   `message`.
//! * The `synth` module is the thread-safe `SynthControl` interface: bank loading, volume and
//!   event handling. Banks are either [SoundFont](https://crates.io/crates/rustysynth) files or
//!   the built-in patches, which are [fundsp](https://crates.io/crates/fundsp) audio graphs.
//! * The `notify` module carries human-readable status lines from the reader thread to a UI
//!   without ever blocking the reader.
//! * The `audio` module plays the synthesizer through [cpal](https://crates.io/crates/cpal).
//!
//! The `midi_synth_bridge` binary wires these together for the console.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod framer;
pub mod message;
pub mod notify;
pub mod synth;

/// MIDI data values (pitch, velocity, volume) range from 0 to 127.
pub const MAX_MIDI_VALUE: u8 = 127;

pub use config::{load_config, BridgeConfig, SynthConfig};
pub use device::{DeviceDescriptor, DeviceEvent, DeviceKind, MidiBackend, Registry};
pub use error::{BankError, DeviceError, SynthError};
pub use framer::Framer;
pub use message::{MessageKind, MidiMessage};
pub use notify::{notification_channel, NotificationPump, Notifier, UiSink};
pub use synth::SynthControl;
