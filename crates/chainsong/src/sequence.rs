//! In-memory note sequences: the primer and the output of every stage.
//!
//! Times are absolute seconds from the start of the piece. The MIDI codec in
//! [`crate::midi`] converts to and from ticks.

use serde::{Deserialize, Serialize};

/// A single sounding note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub program: u8,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub is_drum: bool,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start_time: f64, end_time: f64) -> Self {
        Self {
            pitch,
            velocity,
            start_time,
            end_time,
            program: 0,
            channel: 0,
            is_drum: false,
        }
    }
}

/// A tempo record, in quarter notes per minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    pub time: f64,
    pub qpm: f64,
}

/// Notes plus tempo records plus total duration.
///
/// Windowing only accepts zero or one tempo; more are kept here so callers
/// can see what a decoded file actually contained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub notes: Vec<Note>,
    pub tempos: Vec<Tempo>,
    /// Seconds from zero to the end of the last note.
    pub total_time: f64,
}

impl Sequence {
    /// An empty sequence with no tempo: the primer for an unseeded stage.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a sequence from notes, ordered by onset, with `total_time` at the last note end.
    pub fn from_notes(mut notes: Vec<Note>) -> Self {
        notes.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| a.pitch.cmp(&b.pitch))
        });
        let total_time = notes.iter().map(|n| n.end_time).fold(0.0, f64::max);
        Self {
            notes,
            tempos: Vec::new(),
            total_time,
        }
    }

    /// Builder: add a tempo record.
    pub fn with_tempo(mut self, qpm: f64) -> Self {
        self.tempos.push(Tempo { time: 0.0, qpm });
        self
    }

    /// Builder: extend the duration past the last note (trailing rest).
    pub fn with_total_time(mut self, total_time: f64) -> Self {
        self.total_time = self.total_time.max(total_time);
        self
    }

    /// The single tempo if exactly one is present.
    pub fn tempo(&self) -> Option<&Tempo> {
        match self.tempos.as_slice() {
            [tempo] => Some(tempo),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_notes_sorts_and_measures() {
        let seq = Sequence::from_notes(vec![
            Note::new(64, 80, 1.0, 1.5),
            Note::new(60, 80, 0.0, 2.25),
        ]);
        assert_eq!(seq.notes[0].pitch, 60);
        assert_eq!(seq.total_time, 2.25);
        assert!(seq.tempos.is_empty());
    }

    #[test]
    fn test_total_time_never_shrinks() {
        let seq = Sequence::from_notes(vec![Note::new(60, 80, 0.0, 3.0)]).with_total_time(1.0);
        assert_eq!(seq.total_time, 3.0);
        let seq = seq.with_total_time(4.0);
        assert_eq!(seq.total_time, 4.0);
    }

    #[test]
    fn test_tempo_only_when_single() {
        let one = Sequence::empty().with_tempo(100.0);
        assert_eq!(one.tempo().map(|t| t.qpm), Some(100.0));

        let two = one.with_tempo(90.0);
        assert!(two.tempo().is_none());
    }
}
