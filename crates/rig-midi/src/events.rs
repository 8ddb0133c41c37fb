//! Incoming MIDI events and the received-event history
//!
//! Raw bytes from the driver callback are parsed into [`MidiEvent`] values
//! and appended to a bounded ring buffer. The API collaborator drains the
//! buffer incrementally: each drain returns only events it has not seen yet.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use rig_core::MessageKind;
use serde::Serialize;

/// Capacity of the received-event ring buffer; oldest events are evicted
pub const EVENT_LOG_CAPACITY: usize = 100;

/// A single received MIDI message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiEvent {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub channel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
    /// Seconds since the Unix epoch, stamped on receipt
    pub timestamp: f64,
}

impl MidiEvent {
    /// Parse a raw MIDI message.
    ///
    /// Handles the channel voice messages this core routes:
    /// - Note Off: `8n nn vv`
    /// - Note On: `9n nn vv` (velocity 0 is treated as Note Off)
    /// - Control Change: `Bn cc vv`
    /// - Program Change: `Cn pp`
    ///
    /// Everything else (pitch bend, aftertouch, realtime) returns `None`.
    pub fn parse(data: &[u8], timestamp: f64) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        let status = data[0];
        let channel = status & 0x0F;

        let base = |kind| MidiEvent {
            kind,
            channel,
            note: None,
            velocity: None,
            cc: None,
            value: None,
            program: None,
            timestamp,
        };

        match status & 0xF0 {
            0x80 if data.len() >= 3 => Some(MidiEvent {
                note: Some(data[1]),
                velocity: Some(data[2]),
                ..base(MessageKind::NoteOff)
            }),
            0x90 if data.len() >= 3 => {
                let kind = if data[2] == 0 {
                    MessageKind::NoteOff
                } else {
                    MessageKind::NoteOn
                };
                Some(MidiEvent {
                    note: Some(data[1]),
                    velocity: Some(data[2]),
                    ..base(kind)
                })
            }
            0xB0 if data.len() >= 3 => Some(MidiEvent {
                cc: Some(data[1]),
                value: Some(data[2]),
                ..base(MessageKind::ControlChange)
            }),
            0xC0 if data.len() >= 2 => Some(MidiEvent {
                program: Some(data[1]),
                ..base(MessageKind::ProgramChange)
            }),
            _ => None,
        }
    }

    /// The value byte a mapping's `input_value` constraint compares against
    /// (CC value or note velocity)
    pub fn match_value(&self) -> Option<u8> {
        match self.kind {
            MessageKind::ControlChange => self.value,
            MessageKind::NoteOn | MessageKind::NoteOff => self.velocity,
            MessageKind::ProgramChange => None,
        }
    }

    /// The control byte a mapping's `input_control` compares against
    /// (note number, CC number or program number)
    pub fn control_number(&self) -> Option<u8> {
        match self.kind {
            MessageKind::NoteOn | MessageKind::NoteOff => self.note,
            MessageKind::ControlChange => self.cc,
            MessageKind::ProgramChange => self.program,
        }
    }
}

/// Current wall-clock time as seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Bounded history of received events with an incremental drain cursor
#[derive(Debug, Default)]
pub struct EventLog {
    events: VecDeque<MidiEvent>,
    /// Index of the first event not yet handed out by `drain_new`
    cursor: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
            cursor: 0,
        }
    }

    /// Append an event, evicting the oldest once at capacity
    pub fn push(&mut self, event: MidiEvent) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
        }
        self.events.push_back(event);
    }

    /// Events received since the previous drain
    pub fn drain_new(&mut self) -> Vec<MidiEvent> {
        let new: Vec<MidiEvent> = self.events.iter().skip(self.cursor).cloned().collect();
        self.cursor = self.events.len();
        new
    }

    /// Number of events currently held
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop all history and reset the drain cursor
    pub fn clear(&mut self) {
        self.events.clear();
        self.cursor = 0;
    }
}
