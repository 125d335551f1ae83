//! Splits a raw MIDI byte stream into [`MidiMessage`]s.
//!
//! Bytes are appended as they are read from a port, in chunks of any size. The framer keeps
//! whatever does not yet form a complete message and picks up from there on the next call, so a
//! message split across two reads decodes exactly like one that arrived whole.
//!
//! Wire rules implemented here:
//! * running status: a channel voice status persists until another non-real-time status
//!   arrives, so `90 40 7F 41 7F` is two Note On messages;
//! * real-time bytes (`F8`..`FE`) may sit inside another message and are emitted on their own
//!   without disturbing it;
//! * SysEx bodies (`F0` .. `F7`) are swallowed;
//! * anything unrecognized is dropped one byte at a time until the stream lines up again.

use std::collections::VecDeque;

use crate::message::{MessageKind, MidiMessage};

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

#[derive(Debug, Default)]
pub struct Framer {
    pending: VecDeque<u8>,
    running_status: Option<u8>,
    in_sysex: bool,
    resyncs: u64,
}

enum Collected {
    Complete { data: [u8; 2], end: usize },
    Incomplete,
    Realtime(MidiMessage),
    Interrupted(usize),
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }

    /// Appends `bytes` and returns the messages that are now complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Messages<'_> {
        self.push(bytes);
        self.messages()
    }

    /// Iterates over the complete messages currently buffered. Stops (without error) at a
    /// partial tail, which stays buffered.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { framer: self }
    }

    /// Number of bytes held back waiting for the rest of a message.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// How many times a byte or partial message had to be discarded to resynchronize.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Forgets buffered bytes and running status.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.running_status = None;
        self.in_sysex = false;
    }

    /// Returns the next complete message, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Option<MidiMessage> {
        loop {
            let byte = *self.pending.front()?;

            if self.in_sysex {
                if byte < 0x80 {
                    self.pending.pop_front();
                    continue;
                }
                if byte == SYSEX_END {
                    self.pending.pop_front();
                    self.in_sysex = false;
                    continue;
                }
                if byte < 0xF8 {
                    // Any other status ends the SysEx implicitly.
                    self.in_sysex = false;
                }
            }

            if byte < 0x80 {
                let Some(status) = self.running_status else {
                    self.pending.pop_front();
                    self.note_resync(byte, "data byte without status");
                    continue;
                };
                // Only channel voice statuses are ever stored as running status.
                let needed = MessageKind::from_status(status).map_or(0, MessageKind::data_len);
                match self.collect(0, needed) {
                    Collected::Complete { data, end } => {
                        self.pending.drain(..end);
                        return MidiMessage::new(status, &data[..needed])
                            .map(|msg| msg.with_consumed(needed));
                    }
                    Collected::Incomplete => return None,
                    Collected::Realtime(msg) => return Some(msg),
                    Collected::Interrupted(at) => {
                        self.pending.drain(..at);
                        self.note_resync(status, "running-status message cut short");
                        continue;
                    }
                }
            }

            match byte {
                SYSEX_START => {
                    self.pending.pop_front();
                    self.in_sysex = true;
                    self.running_status = None;
                    continue;
                }
                SYSEX_END => {
                    self.pending.pop_front();
                    self.note_resync(byte, "end of SysEx outside SysEx");
                    continue;
                }
                _ => {}
            }

            let Some(kind) = MessageKind::from_status(byte) else {
                self.pending.pop_front();
                if byte < 0xF8 {
                    self.running_status = None;
                }
                self.note_resync(byte, "unrecognized status");
                continue;
            };

            if kind.is_realtime() {
                self.pending.pop_front();
                return MidiMessage::new(byte, &[]);
            }

            let needed = kind.data_len();
            match self.collect(1, needed) {
                Collected::Complete { data, end } => {
                    self.pending.drain(..end);
                    self.running_status = kind.is_channel_voice().then_some(byte);
                    return MidiMessage::new(byte, &data[..needed]);
                }
                Collected::Incomplete => return None,
                Collected::Realtime(msg) => return Some(msg),
                Collected::Interrupted(at) => {
                    self.pending.drain(..at);
                    self.note_resync(byte, "message cut short by a new status");
                    continue;
                }
            }
        }
    }

    /// Gathers `needed` data bytes starting at `start`, pulling out interleaved real-time bytes.
    fn collect(&mut self, start: usize, needed: usize) -> Collected {
        let mut data = [0u8; 2];
        let mut got = 0;
        let mut i = start;
        while got < needed {
            let Some(&byte) = self.pending.get(i) else {
                return Collected::Incomplete;
            };
            if byte < 0x80 {
                data[got] = byte;
                got += 1;
                i += 1;
                continue;
            }
            if byte >= 0xF8 {
                self.pending.remove(i);
                match MessageKind::from_status(byte).and_then(|_| MidiMessage::new(byte, &[])) {
                    Some(msg) => return Collected::Realtime(msg),
                    None => {
                        self.note_resync(byte, "unrecognized real-time byte");
                        continue;
                    }
                }
            }
            return Collected::Interrupted(i);
        }
        Collected::Complete { data, end: i }
    }

    fn note_resync(&mut self, byte: u8, reason: &str) {
        self.resyncs += 1;
        log::debug!("framer resync ({reason}): dropped {byte:#04x}");
    }
}

/// Lazily frames buffered bytes; see [`Framer::messages`].
pub struct Messages<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Messages<'_> {
    type Item = MidiMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(bytes: &[u8]) -> Vec<MidiMessage> {
        Framer::new().feed(bytes).collect()
    }

    fn frame_chunked(bytes: &[u8], chunk: usize) -> Vec<MidiMessage> {
        let mut framer = Framer::new();
        let mut out = vec![];
        for piece in bytes.chunks(chunk) {
            out.extend(framer.feed(piece));
        }
        out
    }

    fn stream() -> Vec<u8> {
        vec![
            0x90, 0x40, 0x7F, 0x41, 0x7F, // note on + running status
            0xF8, // clock
            0xB3, 0x07, 0xF8, 0x64, // cc with clock inside it
            0xF0, 0x7E, 0x00, 0x09, 0x01, 0xF7, // sysex
            0xC1, 0x05, 0x06, // program change + running status
            0xE0, 0x00, 0x40, // pitch bend
            0xF2, 0x10, 0x20, // song position
            0x80, 0x40, 0x00, // note off
        ]
    }

    #[test]
    fn running_status_yields_two_note_ons() {
        let msgs = frame_all(&[0x90, 0x40, 0x7F, 0x41, 0x7F]);
        assert_eq!(
            msgs,
            vec![
                MidiMessage::note_on(0, 0x40, 0x7F),
                MidiMessage::note_on(0, 0x41, 0x7F).with_consumed(2),
            ]
        );
        assert_eq!(msgs[0].consumed(), 3);
        assert_eq!(msgs[1].consumed(), 2);
    }

    #[test]
    fn skips_unrecognized_byte() {
        let mut framer = Framer::new();
        let msgs: Vec<_> = framer.feed(&[0xFF, 0x90, 0x40, 0x7F]).collect();
        assert_eq!(msgs, vec![MidiMessage::note_on(0, 0x40, 0x7F)]);
        assert_eq!(framer.resyncs(), 1);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let bytes = stream();
        let whole = frame_all(&bytes);
        assert_eq!(whole.len(), 10);
        for chunk in 1..=bytes.len() {
            assert_eq!(frame_chunked(&bytes, chunk), whole, "chunk size {chunk}");
        }
        for split in 0..=bytes.len() {
            let mut framer = Framer::new();
            let mut out: Vec<_> = framer.feed(&bytes[..split]).collect();
            out.extend(framer.feed(&bytes[split..]));
            assert_eq!(out, whole, "split at {split}");
        }
    }

    #[test]
    fn partial_tail_is_kept() {
        let mut framer = Framer::new();
        assert_eq!(framer.feed(&[0x90, 0x40]).count(), 0);
        assert_eq!(framer.pending_len(), 2);
        let msgs: Vec<_> = framer.feed(&[0x7F]).collect();
        assert_eq!(msgs, vec![MidiMessage::note_on(0, 0x40, 0x7F)]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn realtime_inside_message_comes_out_first() {
        let msgs = frame_all(&[0xB0, 0x07, 0xFA, 0x64]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].kind(), MessageKind::Start);
        assert_eq!(msgs[1], MidiMessage::control_change(0, 7, 100));
    }

    #[test]
    fn realtime_keeps_running_status() {
        let msgs = frame_all(&[0x91, 0x30, 0x40, 0xF8, 0x31, 0x40]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].kind(), MessageKind::NoteOn);
        assert_eq!(msgs[2].channel(), Some(1));
        assert_eq!(msgs[2].data1(), 0x31);
    }

    #[test]
    fn sysex_is_swallowed_and_cancels_running_status() {
        let mut framer = Framer::new();
        let msgs: Vec<_> = framer
            .feed(&[0x90, 0x40, 0x7F, 0xF0, 0x01, 0x02, 0xF7, 0x41, 0x7F])
            .collect();
        assert_eq!(msgs, vec![MidiMessage::note_on(0, 0x40, 0x7F)]);
        assert_eq!(framer.resyncs(), 2);
    }

    #[test]
    fn stray_data_bytes_are_skipped() {
        let mut framer = Framer::new();
        let msgs: Vec<_> = framer.feed(&[0x12, 0x34, 0xC0, 0x09]).collect();
        assert_eq!(msgs, vec![MidiMessage::program_change(0, 9)]);
        assert_eq!(framer.resyncs(), 2);
    }

    #[test]
    fn new_status_interrupts_partial_message() {
        let mut framer = Framer::new();
        let msgs: Vec<_> = framer.feed(&[0x90, 0x40, 0x80, 0x40, 0x00]).collect();
        assert_eq!(msgs, vec![MidiMessage::note_off(0, 0x40, 0)]);
        assert_eq!(framer.resyncs(), 1);
    }

    #[test]
    fn corrupt_byte_does_not_desync_later_messages() {
        let msgs = frame_all(&[0x90, 0x40, 0x7F, 0xF5, 0x41, 0x7F, 0x90, 0x42, 0x7F]);
        assert_eq!(
            msgs,
            vec![
                MidiMessage::note_on(0, 0x40, 0x7F),
                MidiMessage::note_on(0, 0x42, 0x7F),
            ]
        );
    }

    #[test]
    fn undefined_realtime_byte_inside_message_is_dropped_in_place() {
        let msgs = frame_all(&[0x90, 0x40, 0xFD, 0x7F]);
        assert_eq!(msgs, vec![MidiMessage::note_on(0, 0x40, 0x7F)]);
    }

    #[test]
    fn reset_forgets_running_status() {
        let mut framer = Framer::new();
        assert_eq!(framer.feed(&[0x90, 0x40, 0x7F]).count(), 1);
        framer.reset();
        assert_eq!(framer.feed(&[0x41, 0x7F]).count(), 0);
    }
}
