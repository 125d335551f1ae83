//! SoundFont engine backed by [rustysynth](https://crates.io/crates/rustysynth).

use std::sync::Arc;

use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};

use super::SynthEngine;
use crate::error::BankError;
use crate::message::{MessageKind, MidiMessage};

pub(crate) struct SoundFontEngine {
    synthesizer: Synthesizer,
}

impl SoundFontEngine {
    pub(crate) fn new(name: &str, font: &Arc<SoundFont>, sample_rate: u32) -> Result<Self, BankError> {
        let settings = SynthesizerSettings::new(sample_rate as i32);
        let synthesizer =
            Synthesizer::new(font, &settings).map_err(|e| BankError::DecodeError {
                bank: name.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self { synthesizer })
    }
}

impl SynthEngine for SoundFontEngine {
    fn handle(&mut self, msg: &MidiMessage) {
        let Some(channel) = msg.channel() else {
            return;
        };
        let channel = channel as i32;
        if msg.is_note_release() {
            self.synthesizer.note_off(channel, msg.data1() as i32);
            return;
        }
        let command = (msg.status() & 0xF0) as i32;
        let (data1, data2) = match msg.kind() {
            MessageKind::ProgramChange | MessageKind::ChannelPressure => (msg.data1() as i32, 0),
            _ => (msg.data1() as i32, msg.data2() as i32),
        };
        self.synthesizer
            .process_midi_message(channel, command, data1, data2);
    }

    fn set_gain(&mut self, gain: f32) {
        self.synthesizer.set_master_volume(gain);
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.synthesizer.render(left, right);
    }

    fn silence(&mut self) {
        self.synthesizer.note_off_all(true);
    }
}
