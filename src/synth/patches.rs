//! Built-in patch engine: a round-robin pool of [fundsp](https://crates.io/crates/fundsp)
//! voices, one audio graph per voice, driven through `Shared` atomic variables.

use std::fmt::Debug;
use std::sync::Arc;

use bare_metal_modulo::*;
use fundsp::prelude32::{midi_hz, shared, var, An, AudioUnit, Shared, Var};
use midi_msg::{ChannelModeMsg, ChannelVoiceMsg, MidiMsg};

use super::SynthEngine;
use crate::message::MidiMessage;
use crate::MAX_MIDI_VALUE;

const NUM_MIDI_VALUES: usize = MAX_MIDI_VALUE as usize + 1;

/// Control value in response to `Note On` event.
pub const CONTROL_ON: f32 = 1.0;

/// Control value in response to `Note Off` event.
pub const CONTROL_OFF: f32 = 0.0;

/// Samples rendered with every gate closed after a voice graph is built, so live envelopes
/// have seen a low control value before the first note arrives.
const WARM_UP_SAMPLES: usize = 100;

/// `SynthFunc` objects translate `SharedMidiState` values into fundsp audio graphs.
pub type SynthFunc = Arc<dyn Fn(&SharedMidiState) -> Box<dyn AudioUnit> + Send + Sync>;

/// A named list of patches; Program Change picks an entry by index.
pub type ProgramTable = Vec<(String, SynthFunc)>;

#[derive(Clone)]
/// `SharedMidiState` objects hold, as fundsp `Shared` atomic variables, the state of one voice:
/// * `Note On` pitch and velocity
/// * whether the note is still held
/// * `Pitch Bend`
pub struct SharedMidiState {
    pitch: Shared,
    velocity: Shared,
    control: Shared,
    pitch_bend: Shared,
}

impl Default for SharedMidiState {
    fn default() -> Self {
        Self {
            pitch: shared(0.0),
            velocity: shared(0.0),
            control: shared(CONTROL_OFF),
            pitch_bend: shared(1.0),
        }
    }
}

impl Debug for SharedMidiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMidiState")
            .field("pitch", &self.pitch.value())
            .field("velocity", &self.velocity.value())
            .field("control", &self.control.value())
            .field("pitch_bend", &self.pitch_bend.value())
            .finish()
    }
}

impl SharedMidiState {
    /// Frequency in Hz of the most recent `Note On`.
    pub fn pitch_var(&self) -> An<Var> {
        var(&self.pitch)
    }

    /// Multiplier from the most recent `Pitch Bend`, 1.0 when centered.
    pub fn bend_var(&self) -> An<Var> {
        var(&self.pitch_bend)
    }

    /// Velocity of the most recent `Note On`, scaled to 0.0..=1.0.
    pub fn velocity_var(&self) -> An<Var> {
        var(&self.velocity)
    }

    /// `CONTROL_ON` while the note is held, `CONTROL_OFF` after release.
    pub fn control_var(&self) -> An<Var> {
        var(&self.control)
    }

    /// Encodes a MIDI `Note On` event.
    pub fn on(&self, pitch: u8, velocity: u8) {
        self.pitch.set_value(midi_hz(pitch as f32));
        self.velocity.set_value(velocity as f32 / MAX_MIDI_VALUE as f32);
        self.control.set_value(CONTROL_ON);
    }

    /// Encodes a MIDI `Note Off` event.
    pub fn off(&self) {
        self.control.set_value(CONTROL_OFF);
    }

    /// Encodes a MIDI `Pitch Bend` event.
    pub fn bend(&self, bend: u16) {
        self.pitch_bend.set_value(pitch_bend_factor(bend));
    }

    pub fn is_held(&self) -> bool {
        self.control.value() > CONTROL_OFF
    }
}

/// Algorithm from: https://sites.uci.edu/camp2014/2014/04/30/managing-midi-pitchbend-messages/
/// Converts MIDI pitch-bend message to +/- 1 semitone.
pub fn pitch_bend_factor(bend: u16) -> f32 {
    2.0_f32.powf(((bend as f32 - 8192.0) / 8192.0) / 12.0)
}

pub(crate) struct PatchEngine {
    states: Vec<SharedMidiState>,
    voices: Vec<Box<dyn AudioUnit>>,
    next: ModNum<usize>,
    pitch2state: [Option<usize>; NUM_MIDI_VALUES],
    recent_pitches: Vec<Option<u8>>,
    table: ProgramTable,
    program: usize,
    sample_rate: f64,
    gain: f32,
    muted: bool,
}

impl PatchEngine {
    /// Builds `polyphony` voices playing the first patch of `table`.
    pub(crate) fn new(table: ProgramTable, polyphony: usize, sample_rate: f64) -> Self {
        let polyphony = polyphony.max(1);
        let mut engine = Self {
            states: (0..polyphony).map(|_| SharedMidiState::default()).collect(),
            voices: Vec::with_capacity(polyphony),
            next: ModNum::new(0, polyphony),
            pitch2state: [None; NUM_MIDI_VALUES],
            recent_pitches: vec![None; polyphony],
            table,
            program: 0,
            sample_rate,
            gain: 1.0,
            muted: false,
        };
        engine.build_voices();
        engine
    }

    pub(crate) fn program_name(&self) -> Option<&str> {
        self.table.get(self.program).map(|(name, _)| name.as_str())
    }

    fn build_voices(&mut self) {
        self.voices.clear();
        let Some((name, synth_func)) = self.table.get(self.program) else {
            return;
        };
        log::debug!("building {} voice(s) for patch '{name}'", self.states.len());
        for state in self.states.iter() {
            let mut voice = synth_func(state);
            voice.set_sample_rate(self.sample_rate);
            let mut out = vec![0.0; voice.outputs()];
            for _ in 0..WARM_UP_SAMPLES {
                voice.tick(&[], &mut out);
            }
            self.voices.push(voice);
        }
    }

    fn decode(&mut self, msg: &MidiMsg) {
        match msg {
            MidiMsg::ChannelVoice { channel: _, msg } => match msg {
                ChannelVoiceMsg::NoteOn { note, velocity: 0 }
                | ChannelVoiceMsg::NoteOff { note, velocity: _ } => {
                    self.off(*note);
                }
                ChannelVoiceMsg::NoteOn { note, velocity } => {
                    self.on(*note, *velocity);
                }
                ChannelVoiceMsg::PitchBend { bend } => {
                    self.bend(*bend);
                }
                ChannelVoiceMsg::ProgramChange { program } => {
                    self.change_program(*program);
                }
                _ => {}
            },
            MidiMsg::ChannelMode { channel: _, msg } => match msg {
                ChannelModeMsg::AllNotesOff => self.release_all(),
                ChannelModeMsg::AllSoundOff => self.all_sounds_off(),
                _ => {}
            },
            _ => {}
        }
    }

    fn on(&mut self, pitch: u8, velocity: u8) {
        self.muted = false;
        let slot = self.next.a();
        self.states[slot].on(pitch, velocity);
        self.pitch2state[pitch as usize] = Some(slot);
        self.recent_pitches[slot] = Some(pitch);
        self.next += 1;
    }

    fn off(&mut self, pitch: u8) {
        if let Some(i) = self.pitch2state[pitch as usize] {
            if self.recent_pitches[i] == Some(pitch) {
                self.release(i);
            }
            self.pitch2state[pitch as usize] = None;
        }
    }

    fn bend(&mut self, bend: u16) {
        for state in self.states.iter() {
            state.bend(bend);
        }
    }

    fn change_program(&mut self, program: u8) {
        if self.table.is_empty() {
            return;
        }
        let program = program as usize % self.table.len();
        if program != self.program {
            self.all_sounds_off();
            self.program = program;
            self.build_voices();
            log::info!(
                "program {program}: {}",
                self.program_name().unwrap_or_default()
            );
        }
    }

    fn release(&mut self, i: usize) {
        self.recent_pitches[i] = None;
        self.states[i].off();
    }

    fn release_all(&mut self) {
        for i in 0..self.states.len() {
            self.release(i);
        }
        self.pitch2state = [None; NUM_MIDI_VALUES];
    }

    fn all_sounds_off(&mut self) {
        self.release_all();
        self.muted = true;
    }
}

impl SynthEngine for PatchEngine {
    fn handle(&mut self, msg: &MidiMessage) {
        if let Some(msg) = msg.to_midi_msg() {
            self.decode(&msg);
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let gain = if self.muted { 0.0 } else { self.gain };
        let mut out = [0.0f32; 2];
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mut sample = 0.0;
            for voice in self.voices.iter_mut() {
                let outputs = voice.outputs().min(2);
                voice.tick(&[], &mut out[..outputs]);
                sample += out[0];
            }
            *l = sample * gain;
            *r = sample * gain;
        }
    }

    fn silence(&mut self) {
        self.all_sounds_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::sounds;
    use float_eq::assert_float_eq;

    fn engine() -> PatchEngine {
        PatchEngine::new(sounds::options(), 4, 44_100.0)
    }

    fn peak(engine: &mut PatchEngine, frames: usize) -> f32 {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        engine.render(&mut left, &mut right);
        left.iter().chain(right.iter()).fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn bend_factor_is_centered_and_symmetric() {
        assert_float_eq!(pitch_bend_factor(8192), 1.0, abs <= 1e-6);
        assert_float_eq!(pitch_bend_factor(16384), 2.0_f32.powf(1.0 / 12.0), abs <= 1e-6);
        assert_float_eq!(pitch_bend_factor(0), 2.0_f32.powf(-1.0 / 12.0), abs <= 1e-6);
    }

    #[test]
    fn note_on_sets_shared_state() {
        let state = SharedMidiState::default();
        state.on(69, 127);
        assert_float_eq!(state.pitch.value(), 440.0, abs <= 1e-3);
        assert_float_eq!(state.velocity.value(), 1.0, abs <= 1e-6);
        assert!(state.is_held());
        state.off();
        assert!(!state.is_held());
    }

    #[test]
    fn silent_until_a_note_is_played() {
        let mut engine = engine();
        assert_float_eq!(peak(&mut engine, 256), 0.0, abs <= 1e-6);
        engine.handle(&MidiMessage::note_on(0, 69, 127));
        assert!(peak(&mut engine, 2048) > 0.01);
    }

    #[test]
    fn zero_gain_mutes_output() {
        let mut engine = engine();
        engine.set_gain(0.0);
        engine.handle(&MidiMessage::note_on(0, 69, 127));
        assert_float_eq!(peak(&mut engine, 1024), 0.0, abs <= 1e-6);
    }

    #[test]
    fn voices_rotate_and_release_by_pitch() {
        let mut engine = engine();
        engine.handle(&MidiMessage::note_on(0, 60, 100));
        engine.handle(&MidiMessage::note_on(0, 64, 100));
        assert!(engine.states[0].is_held());
        assert!(engine.states[1].is_held());
        engine.handle(&MidiMessage::note_off(0, 60, 0));
        assert!(!engine.states[0].is_held());
        assert!(engine.states[1].is_held());
        engine.handle(&MidiMessage::note_on(0, 64, 0));
        assert!(!engine.states[1].is_held());
    }

    #[test]
    fn all_sound_off_mutes_until_next_note() {
        let mut engine = engine();
        engine.handle(&MidiMessage::note_on(0, 69, 127));
        engine.handle(&MidiMessage::control_change(0, 120, 0));
        assert_float_eq!(peak(&mut engine, 512), 0.0, abs <= 1e-6);
        engine.handle(&MidiMessage::note_on(0, 69, 127));
        assert!(peak(&mut engine, 2048) > 0.01);
    }

    #[test]
    fn program_change_switches_patch() {
        let mut engine = engine();
        let first = engine.program_name().map(str::to_owned);
        engine.handle(&MidiMessage::program_change(0, 1));
        assert_ne!(engine.program_name().map(str::to_owned), first);
        assert_eq!(engine.voices.len(), 4);
    }

    #[test]
    fn program_change_wraps_around_table() {
        let mut engine = engine();
        let patches = sounds::options().len() as u8;
        engine.handle(&MidiMessage::program_change(0, patches + 2));
        assert_eq!(engine.program_name(), Some(sounds::options()[2].0.as_str()));
    }
}
