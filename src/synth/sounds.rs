//! Patches for the built-in bank. Each one turns a voice's `SharedMidiState` into a fundsp
//! audio graph.

use std::sync::Arc;

use fundsp::prelude32::{adsr_live, moog_q, pulse, sine, triangle, AudioUnit};

use super::patches::{ProgramTable, SharedMidiState};

macro_rules! program_table {
    ($( ($s:expr, $f:expr)),* ) => {vec![$(($s.to_owned(), Arc::new($f) as super::patches::SynthFunc),)*]}
}

/// Pitch of a voice after pitch bend.
macro_rules! bent_pitch {
    ($state:expr) => {
        $state.pitch_var() * $state.bend_var()
    };
}

/// Every built-in patch, in Program Change order.
pub fn options() -> ProgramTable {
    program_table! [
        ("Simple Triangle", simple_triangle),
        ("Triangle", adsr_triangle),
        ("Pulse", adsr_pulse),
        ("Moog Triangle", moog_triangle),
        ("Moog Pulse", moog_pulse),
        ("Sine", adsr_sine)
    ]
}

#[derive(Copy, Clone, Debug)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

pub const ADSR1: Adsr = Adsr {
    attack: 0.1,
    decay: 0.2,
    sustain: 0.4,
    release: 0.4,
};

pub const ADSR2: Adsr = Adsr {
    attack: 0.1,
    decay: 0.4,
    sustain: 0.4,
    release: 0.6,
};

/// Lowest and highest cutoff swept by the Moog patches' filter envelope.
const MOOG_CUTOFF_MIN: f32 = 1100.0;
const MOOG_CUTOFF_MAX: f32 = 11000.0;

/// Triangle gated directly by the key: full volume while held, silent once released.
pub fn simple_triangle(state: &SharedMidiState) -> Box<dyn AudioUnit> {
    Box::new((bent_pitch!(state) >> triangle()) * state.control_var() * state.velocity_var())
}

pub fn adsr_triangle(state: &SharedMidiState) -> Box<dyn AudioUnit> {
    let a = ADSR1;
    Box::new(
        (bent_pitch!(state) >> triangle())
            * (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
            * state.velocity_var(),
    )
}

pub fn adsr_sine(state: &SharedMidiState) -> Box<dyn AudioUnit> {
    let a = ADSR1;
    Box::new(
        (bent_pitch!(state) >> sine())
            * (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
            * state.velocity_var(),
    )
}

/// Pulse whose width follows the envelope.
pub fn adsr_pulse(state: &SharedMidiState) -> Box<dyn AudioUnit> {
    let a = ADSR2;
    Box::new(
        ((bent_pitch!(state)
            | (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release)))
            >> pulse())
            * (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
            * state.velocity_var(),
    )
}

pub fn moog_triangle(state: &SharedMidiState) -> Box<dyn AudioUnit> {
    let a = ADSR2;
    Box::new(
        (((bent_pitch!(state) >> triangle())
            | ((state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
                * (MOOG_CUTOFF_MAX - MOOG_CUTOFF_MIN)
                + MOOG_CUTOFF_MIN))
            >> moog_q(0.6))
            * (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
            * state.velocity_var(),
    )
}

pub fn moog_pulse(state: &SharedMidiState) -> Box<dyn AudioUnit> {
    let a = ADSR2;
    Box::new(
        ((((bent_pitch!(state)
            | (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release)))
            >> pulse())
            | ((state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
                * (MOOG_CUTOFF_MAX - MOOG_CUTOFF_MIN)
                + MOOG_CUTOFF_MIN))
            >> moog_q(0.6))
            * (state.control_var() >> adsr_live(a.attack, a.decay, a.sustain, a.release))
            * state.velocity_var(),
    )
}

/// The patches whose name matches `name`, ignoring case.
pub fn find(name: &str) -> ProgramTable {
    options()
        .into_iter()
        .filter(|(patch, _)| patch.eq_ignore_ascii_case(name.trim()))
        .collect()
}
