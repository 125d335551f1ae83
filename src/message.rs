//! Decoded MIDI messages as produced by the [`Framer`](crate::framer::Framer).

use std::fmt;

use midi_msg::MidiMsg;

/// Status categories the framer understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    TimeCode,
    SongPosition,
    SongSelect,
    TuneRequest,
    Clock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
}

impl MessageKind {
    /// Classifies a status byte. Returns `None` for data bytes, SysEx delimiters and the
    /// undefined statuses (`F4`, `F5`, `F9`, `FD`, `FF`).
    pub fn from_status(status: u8) -> Option<Self> {
        use MessageKind::*;
        match status {
            0x80..=0xEF => Some(match status & 0xF0 {
                0x80 => NoteOff,
                0x90 => NoteOn,
                0xA0 => PolyPressure,
                0xB0 => ControlChange,
                0xC0 => ProgramChange,
                0xD0 => ChannelPressure,
                _ => PitchBend,
            }),
            0xF1 => Some(TimeCode),
            0xF2 => Some(SongPosition),
            0xF3 => Some(SongSelect),
            0xF6 => Some(TuneRequest),
            0xF8 => Some(Clock),
            0xFA => Some(Start),
            0xFB => Some(Continue),
            0xFC => Some(Stop),
            0xFE => Some(ActiveSensing),
            _ => None,
        }
    }

    /// Number of data bytes following the status byte.
    pub fn data_len(self) -> usize {
        use MessageKind::*;
        match self {
            NoteOff | NoteOn | PolyPressure | ControlChange | PitchBend | SongPosition => 2,
            ProgramChange | ChannelPressure | TimeCode | SongSelect => 1,
            TuneRequest | Clock | Start | Continue | Stop | ActiveSensing => 0,
        }
    }

    /// Channel voice messages carry a channel and may be sent with running status.
    pub fn is_channel_voice(self) -> bool {
        use MessageKind::*;
        matches!(
            self,
            NoteOff | NoteOn | PolyPressure | ControlChange | ProgramChange | ChannelPressure
                | PitchBend
        )
    }

    /// System real-time messages are single bytes that may appear anywhere in the stream.
    pub fn is_realtime(self) -> bool {
        use MessageKind::*;
        matches!(self, Clock | Start | Continue | Stop | ActiveSensing)
    }

    fn label(self) -> &'static str {
        use MessageKind::*;
        match self {
            NoteOff => "Note Off",
            NoteOn => "Note On",
            PolyPressure => "Poly Pressure",
            ControlChange => "Control Change",
            ProgramChange => "Program Change",
            ChannelPressure => "Channel Pressure",
            PitchBend => "Pitch Bend",
            TimeCode => "Time Code",
            SongPosition => "Song Position",
            SongSelect => "Song Select",
            TuneRequest => "Tune Request",
            Clock => "Clock",
            Start => "Start",
            Continue => "Continue",
            Stop => "Stop",
            ActiveSensing => "Active Sensing",
        }
    }
}

/// One complete MIDI message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MidiMessage {
    status: u8,
    data: [u8; 2],
    consumed: u8,
}

impl MidiMessage {
    /// Builds a message from a recognized status byte and its data bytes.
    ///
    /// Returns `None` when the status is not a framed message or `data` has the wrong length.
    pub fn new(status: u8, data: &[u8]) -> Option<Self> {
        let kind = MessageKind::from_status(status)?;
        if data.len() != kind.data_len() {
            return None;
        }
        let mut buf = [0; 2];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            status,
            data: buf,
            consumed: 1 + data.len() as u8,
        })
    }

    /// Convenience constructor for `Note On`.
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_msg(0x90, channel, [note, velocity])
    }

    /// Convenience constructor for `Note Off`.
    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_msg(0x80, channel, [note, velocity])
    }

    /// Convenience constructor for `Control Change`.
    pub fn control_change(channel: u8, control: u8, value: u8) -> Self {
        Self::channel_msg(0xB0, channel, [control, value])
    }

    /// Convenience constructor for `Program Change`.
    pub fn program_change(channel: u8, program: u8) -> Self {
        let mut msg = Self::channel_msg(0xC0, channel, [program, 0]);
        msg.consumed = 2;
        msg
    }

    fn channel_msg(base: u8, channel: u8, data: [u8; 2]) -> Self {
        Self {
            status: base | (channel & 0x0F),
            data: [data[0] & 0x7F, data[1] & 0x7F],
            consumed: 3,
        }
    }

    pub(crate) fn with_consumed(mut self, consumed: usize) -> Self {
        self.consumed = consumed as u8;
        self
    }

    pub fn kind(&self) -> MessageKind {
        // `status` is only ever set from a recognized status byte.
        MessageKind::from_status(self.status).unwrap_or(MessageKind::ActiveSensing)
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    /// Zero-based channel for channel voice messages.
    pub fn channel(&self) -> Option<u8> {
        self.kind()
            .is_channel_voice()
            .then_some(self.status & 0x0F)
    }

    /// The 0-2 data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.kind().data_len()]
    }

    pub fn data1(&self) -> u8 {
        self.data[0]
    }

    pub fn data2(&self) -> u8 {
        self.data[1]
    }

    /// Raw bytes taken from the stream, which is one less than the full length when the
    /// message arrived under running status.
    pub fn consumed(&self) -> usize {
        self.consumed as usize
    }

    /// Full wire form, status byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3);
        bytes.push(self.status);
        bytes.extend_from_slice(self.data());
        bytes
    }

    /// Note On with velocity zero, which the MIDI convention treats as Note Off.
    pub fn is_note_release(&self) -> bool {
        match self.kind() {
            MessageKind::NoteOff => true,
            MessageKind::NoteOn => self.data[1] == 0,
            _ => false,
        }
    }

    /// Converts to a [`midi_msg`] value for consumers that pattern-match on that model.
    pub fn to_midi_msg(&self) -> Option<MidiMsg> {
        MidiMsg::from_midi(&self.to_bytes()).ok().map(|(msg, _len)| msg)
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MessageKind::*;
        let kind = self.kind();
        write!(f, "{}", kind.label())?;
        if let Some(channel) = self.channel() {
            write!(f, "  ch {}", channel + 1)?;
        }
        match kind {
            NoteOn | NoteOff => write!(f, "  note {}  vel {}", self.data[0], self.data[1]),
            PolyPressure => write!(f, "  note {}  pressure {}", self.data[0], self.data[1]),
            ControlChange => write!(f, "  cc {}  value {}", self.data[0], self.data[1]),
            ProgramChange => write!(f, "  program {}", self.data[0]),
            ChannelPressure => write!(f, "  pressure {}", self.data[0]),
            PitchBend => write!(f, "  bend {}", pitch_bend_value(self.data[0], self.data[1])),
            TimeCode => write!(f, "  {:#04x}", self.data[0]),
            SongPosition => write!(f, "  {}", pitch_bend_value(self.data[0], self.data[1])),
            SongSelect => write!(f, "  song {}", self.data[0]),
            TuneRequest | Clock | Start | Continue | Stop | ActiveSensing => Ok(()),
        }
    }
}

/// Combines a 7-bit LSB/MSB pair into a 14-bit value.
pub fn pitch_bend_value(lsb: u8, msb: u8) -> u16 {
    ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F)
}
