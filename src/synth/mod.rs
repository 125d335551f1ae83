//! Thread-safe control surface for the synthesizer.
//!
//! [`SynthControl`] is cloned into every thread that needs it: the control thread loads banks
//! and sets volume, a reader session feeds it events, the audio callback pulls samples. All
//! engine state sits behind one mutex. Bank decoding happens before the lock is taken, so the
//! reader thread only ever waits for short, allocation-light critical sections.

pub mod bank;
pub mod patches;
mod soundfont;
pub mod sounds;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::SynthConfig;
use crate::error::{BankError, SynthError};
use crate::message::MidiMessage;
use crate::MAX_MIDI_VALUE;
use bank::{BankSource, InstrumentBank};
use patches::PatchEngine;
use soundfont::SoundFontEngine;

pub use bank::{AssetDir, NoAssets, BUILTIN_BANK};

/// What every engine behind [`SynthControl`] has to provide.
pub trait SynthEngine: Send {
    /// Applies one event.
    fn handle(&mut self, msg: &MidiMessage);
    /// Sets the output gain, 0.0..=1.0.
    fn set_gain(&mut self, gain: f32);
    /// Fills both buffers (of equal length) with the next block of audio.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);
    /// Cuts every sounding voice.
    fn silence(&mut self);
}

struct SynthState {
    engine: Option<Box<dyn SynthEngine>>,
    bank_name: Option<String>,
    volume: u8,
    dropped_events: u64,
}

impl SynthState {
    fn release(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.silence();
            log::info!(
                "released synth engine (bank '{}')",
                self.bank_name.as_deref().unwrap_or_default()
            );
        }
        self.bank_name = None;
    }
}

impl Drop for SynthState {
    fn drop(&mut self) {
        self.release();
    }
}

/// Shared handle to the synthesizer. Cloning is cheap; every clone controls the same engine.
#[derive(Clone)]
pub struct SynthControl {
    state: Arc<Mutex<SynthState>>,
    source: Arc<dyn BankSource>,
    sample_rate: u32,
    polyphony: usize,
}

impl SynthControl {
    pub fn new(source: impl BankSource + 'static, config: &SynthConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SynthState {
                engine: None,
                bank_name: None,
                volume: config.initial_volume.min(MAX_MIDI_VALUE),
                dropped_events: 0,
            })),
            source: Arc::new(source),
            sample_rate: config.sample_rate,
            polyphony: config.polyphony,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SynthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads an instrument bank, replacing the current one. On error the current bank stays.
    pub fn load_instrument_bank(&self, identifier: &str) -> Result<(), BankError> {
        let bank = InstrumentBank::load(self.source.as_ref(), identifier)?;
        let mut engine: Box<dyn SynthEngine> = match &bank {
            InstrumentBank::SoundFont { name, font } => {
                Box::new(SoundFontEngine::new(name, font, self.sample_rate)?)
            }
            InstrumentBank::Patches { table, .. } => Box::new(PatchEngine::new(
                table.clone(),
                self.polyphony,
                self.sample_rate as f64,
            )),
        };

        let mut state = self.lock();
        engine.set_gain(gain(state.volume));
        if let Some(mut old) = state.engine.replace(engine) {
            old.silence();
        }
        state.bank_name = Some(bank.name().to_owned());
        log::info!(
            "loaded instrument bank '{}' ({} program(s))",
            bank.name(),
            bank.programs().len()
        );
        Ok(())
    }

    /// Sets master volume, clamping to 0..=127. Returns the stored value.
    pub fn set_volume(&self, volume: i32) -> u8 {
        let volume = volume.clamp(0, MAX_MIDI_VALUE as i32) as u8;
        let mut state = self.lock();
        state.volume = volume;
        if let Some(engine) = state.engine.as_mut() {
            engine.set_gain(gain(volume));
        }
        volume
    }

    pub fn volume(&self) -> u8 {
        self.lock().volume
    }

    pub fn bank_name(&self) -> Option<String> {
        self.lock().bank_name.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().engine.is_some()
    }

    /// Applies one event to the engine.
    ///
    /// Channel messages that arrive with no bank loaded are dropped and reported as
    /// [`SynthError::NoBankLoaded`]. System messages have no effect on sound and are accepted.
    pub fn consume_event(&self, msg: &MidiMessage) -> Result<(), SynthError> {
        if !msg.kind().is_channel_voice() {
            return Ok(());
        }
        let mut state = self.lock();
        if let Some(engine) = state.engine.as_mut() {
            engine.handle(msg);
            return Ok(());
        }
        state.dropped_events += 1;
        Err(SynthError::NoBankLoaded)
    }

    /// Events dropped so far because no bank was loaded.
    pub fn dropped_events(&self) -> u64 {
        self.lock().dropped_events
    }

    /// Fills `left` and `right` with audio. Renders silence instead of waiting if another
    /// thread holds the engine, and when no bank is loaded.
    pub fn render(&self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let (left, right) = (&mut left[..frames], &mut right[..frames]);
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => {
                left.fill(0.0);
                right.fill(0.0);
                return;
            }
        };
        match state.engine.as_mut() {
            Some(engine) => engine.render(left, right),
            None => {
                left.fill(0.0);
                right.fill(0.0);
            }
        }
    }

    /// Silences and frees the engine. Later events report `NoBankLoaded` until a bank is
    /// loaded again. Also runs when the last handle is dropped.
    pub fn release(&self) {
        self.lock().release();
    }
}

fn gain(volume: u8) -> f32 {
    volume as f32 / MAX_MIDI_VALUE as f32
}
