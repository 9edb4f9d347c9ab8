//! Standard MIDI File <-> [`Sequence`] conversion.
//!
//! Decoding walks every track, pairs note-on/note-off events per
//! (channel, key), and converts ticks to seconds through the file's tempo
//! map. Encoding writes SMF format 1: track 0 carries the tempo map, then one
//! track per channel in use.

use std::collections::{BTreeMap, HashMap};

use midly::num::{u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};

use crate::error::{ChainError, Result};
use crate::sequence::{Note, Sequence, Tempo};

/// Ticks per quarter note in written files.
pub const TICKS_PER_QUARTER: u16 = 480;

/// MIDI default tempo: 120 qpm.
const DEFAULT_USEC_PER_QUARTER: u32 = 500_000;

const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoSegment {
    tick: u64,
    seconds: f64,
    usec_per_quarter: u32,
}

/// Piecewise-constant tempo map for tick <-> second conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Build from tempo changes expressed in ticks.
    pub fn from_tick_changes(ppq: u16, mut changes: Vec<(u64, u32)>) -> Self {
        changes.sort_by_key(|(tick, _)| *tick);
        let mut segments = vec![TempoSegment {
            tick: 0,
            seconds: 0.0,
            usec_per_quarter: DEFAULT_USEC_PER_QUARTER,
        }];

        for (tick, usec) in changes {
            let last = segments[segments.len() - 1];
            let seconds =
                last.seconds + ticks_to_seconds(tick - last.tick, last.usec_per_quarter, ppq);
            if tick == last.tick {
                segments.pop();
            }
            segments.push(TempoSegment {
                tick,
                seconds,
                usec_per_quarter: usec,
            });
        }

        Self { ppq, segments }
    }

    /// Build from the tempo records of a sequence (times in seconds).
    pub fn from_tempos(ppq: u16, tempos: &[Tempo]) -> Self {
        let mut ordered: Vec<Tempo> = tempos.to_vec();
        ordered.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut segments = vec![TempoSegment {
            tick: 0,
            seconds: 0.0,
            usec_per_quarter: DEFAULT_USEC_PER_QUARTER,
        }];

        for tempo in ordered {
            let last = segments[segments.len() - 1];
            let seconds = tempo.time.max(last.seconds);
            let tick =
                last.tick + seconds_to_ticks(seconds - last.seconds, last.usec_per_quarter, ppq);
            if tick == last.tick {
                segments.pop();
            }
            segments.push(TempoSegment {
                tick,
                seconds,
                usec_per_quarter: qpm_to_usec(tempo.qpm),
            });
        }

        Self { ppq, segments }
    }

    fn segment_for_tick(&self, tick: u64) -> &TempoSegment {
        let index = self.segments.partition_point(|s| s.tick <= tick);
        &self.segments[index.saturating_sub(1)]
    }

    fn segment_for_seconds(&self, seconds: f64) -> &TempoSegment {
        let index = self.segments.partition_point(|s| s.seconds <= seconds);
        &self.segments[index.saturating_sub(1)]
    }

    pub fn tick_to_seconds(&self, tick: u64) -> f64 {
        let segment = self.segment_for_tick(tick);
        segment.seconds + ticks_to_seconds(tick - segment.tick, segment.usec_per_quarter, self.ppq)
    }

    pub fn seconds_to_tick(&self, seconds: f64) -> u64 {
        let seconds = seconds.max(0.0);
        let segment = self.segment_for_seconds(seconds);
        segment.tick
            + seconds_to_ticks(seconds - segment.seconds, segment.usec_per_quarter, self.ppq)
    }

    /// Tempo changes as (tick, microseconds per quarter), including the one at tick 0.
    fn tick_changes(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.segments.iter().map(|s| (s.tick, s.usec_per_quarter))
    }
}

fn ticks_to_seconds(ticks: u64, usec_per_quarter: u32, ppq: u16) -> f64 {
    ticks as f64 * usec_per_quarter as f64 / 1_000_000.0 / ppq as f64
}

fn seconds_to_ticks(seconds: f64, usec_per_quarter: u32, ppq: u16) -> u64 {
    (seconds.max(0.0) * 1_000_000.0 / usec_per_quarter as f64 * ppq as f64).round() as u64
}

fn qpm_to_usec(qpm: f64) -> u32 {
    if qpm > 0.0 && qpm.is_finite() {
        (60_000_000.0 / qpm).round().clamp(1.0, 0x00FF_FFFF as f64) as u32
    } else {
        DEFAULT_USEC_PER_QUARTER
    }
}

/// Decode a Standard MIDI File into a sequence.
pub fn decode(bytes: &[u8]) -> Result<Sequence> {
    let smf = Smf::parse(bytes)?;

    let to_seconds: Box<dyn Fn(u64) -> f64> = match smf.header.timing {
        Timing::Metrical(ppq) => {
            let ppq = ppq.as_int().max(1);
            let changes = collect_tempo_changes(&smf);
            let map = TempoMap::from_tick_changes(ppq, changes);
            Box::new(move |tick| map.tick_to_seconds(tick))
        }
        Timing::Timecode(fps, subframes) => {
            let ticks_per_second = fps.as_f32() as f64 * subframes.max(1) as f64;
            Box::new(move |tick| tick as f64 / ticks_per_second)
        }
    };

    let tempos: Vec<Tempo> = match smf.header.timing {
        Timing::Metrical(_) => collect_tempo_changes(&smf)
            .into_iter()
            .map(|(tick, usec)| Tempo {
                time: to_seconds(tick),
                qpm: 60_000_000.0 / usec as f64,
            })
            .collect(),
        Timing::Timecode(..) => Vec::new(),
    };

    let mut notes = Vec::new();
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        let mut programs = [0u8; 16];
        // (channel, key) -> stack of (onset tick, velocity, program)
        let mut pending: HashMap<(u8, u8), Vec<(u64, u8, u8)>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let ch = channel.as_int();
            match message {
                MidiMessage::ProgramChange { program } => {
                    programs[ch as usize] = program.as_int();
                }
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    pending
                        .entry((ch, key.as_int()))
                        .or_default()
                        .push((tick, vel.as_int(), programs[ch as usize]));
                }
                // vel=0 NoteOn is NoteOff
                MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                    if let Some((onset, velocity, program)) =
                        pending.get_mut(&(ch, key.as_int())).and_then(|stack| stack.pop())
                    {
                        notes.push(make_note(
                            ch,
                            key.as_int(),
                            velocity,
                            program,
                            onset,
                            tick,
                            &*to_seconds,
                        ));
                    }
                }
                _ => {}
            }
        }

        // Close dangling notes at the track's final tick
        for ((ch, key), stack) in pending {
            for (onset, velocity, program) in stack {
                notes.push(make_note(ch, key, velocity, program, onset, tick, &*to_seconds));
            }
        }
    }

    let mut sequence = Sequence::from_notes(notes);
    sequence.tempos = tempos;
    Ok(sequence)
}

fn make_note(
    channel: u8,
    pitch: u8,
    velocity: u8,
    program: u8,
    onset: u64,
    offset: u64,
    to_seconds: &dyn Fn(u64) -> f64,
) -> Note {
    Note {
        pitch,
        velocity,
        start_time: to_seconds(onset),
        end_time: to_seconds(offset),
        program,
        channel,
        is_drum: channel == DRUM_CHANNEL,
    }
}

/// All tempo meta events across tracks, with exact duplicates at one tick removed.
fn collect_tempo_changes(smf: &Smf) -> Vec<(u64, u32)> {
    let mut changes = Vec::new();
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                changes.push((tick, tempo.as_int()));
            }
        }
    }
    changes.sort_unstable();
    changes.dedup();
    changes
}

/// Encode a sequence as SMF format 1 bytes.
pub fn encode(sequence: &Sequence) -> Result<Vec<u8>> {
    let map = TempoMap::from_tempos(TICKS_PER_QUARTER, &sequence.tempos);

    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo map
    let tempo_events: Vec<(u64, TrackEventKind<'static>)> = map
        .tick_changes()
        .map(|(tick, usec)| (tick, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(usec)))))
        .collect();
    smf.tracks.push(to_track(tempo_events));

    // One track per channel, programs set up front
    let mut by_channel: BTreeMap<u8, Vec<&Note>> = BTreeMap::new();
    for note in &sequence.notes {
        let channel = if note.is_drum { DRUM_CHANNEL } else { note.channel.min(15) };
        by_channel.entry(channel).or_default().push(note);
    }

    for (channel, notes) in by_channel {
        let ch = u4::new(channel);
        let mut events: Vec<(u64, TrackEventKind<'static>)> = Vec::new();
        if let Some(first) = notes.first() {
            events.push((
                0,
                TrackEventKind::Midi {
                    channel: ch,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(first.program.min(127)),
                    },
                },
            ));
        }
        for note in notes {
            let key = u7::new(note.pitch.min(127));
            let onset = map.seconds_to_tick(note.start_time);
            let offset = map.seconds_to_tick(note.end_time).max(onset);
            events.push((
                onset,
                TrackEventKind::Midi {
                    channel: ch,
                    message: MidiMessage::NoteOn {
                        key,
                        vel: u7::new(note.velocity.clamp(1, 127)),
                    },
                },
            ));
            events.push((
                offset,
                TrackEventKind::Midi {
                    channel: ch,
                    message: MidiMessage::NoteOff { key, vel: u7::new(0) },
                },
            ));
        }
        smf.tracks.push(to_track(events));
    }

    let mut buf = Vec::new();
    smf.write_std(&mut buf)
        .map_err(|e| ChainError::Midi(format!("failed to write SMF: {e}")))?;
    Ok(buf)
}

/// Sort absolute-tick events into a delta-timed track, note-offs first at equal ticks.
fn to_track(mut events: Vec<(u64, TrackEventKind<'static>)>) -> Track<'static> {
    events.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| is_note_off(&b.1).cmp(&is_note_off(&a.1)))
    });

    let mut track: Track<'static> = Vec::with_capacity(events.len() + 1);
    let mut last_tick = 0u64;
    for (tick, kind) in events {
        track.push(TrackEvent {
            delta: u28::new((tick - last_tick) as u32),
            kind,
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

fn is_note_off(kind: &TrackEventKind) -> bool {
    matches!(
        kind,
        TrackEventKind::Midi {
            message: MidiMessage::NoteOff { .. },
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tempo is stored in whole microseconds per quarter, so odd tempos drift slightly.
    const TOLERANCE: f64 = 1e-4;

    #[test]
    fn test_tempo_map_default_is_120_qpm() {
        let map = TempoMap::from_tick_changes(480, Vec::new());
        assert_eq!(map.tick_to_seconds(480), 0.5);
        assert_eq!(map.seconds_to_tick(1.0), 960);
    }

    #[test]
    fn test_tempo_map_piecewise() {
        // 120 qpm for one quarter, then 60 qpm
        let map = TempoMap::from_tick_changes(480, vec![(0, 500_000), (480, 1_000_000)]);
        assert_eq!(map.tick_to_seconds(480), 0.5);
        assert_eq!(map.tick_to_seconds(960), 1.5);
        assert_eq!(map.seconds_to_tick(1.5), 960);
    }

    #[test]
    fn test_encode_decode_preserves_timing_and_tempo() {
        let phrase = Sequence::from_notes(vec![
            Note::new(60, 100, 0.0, 0.5),
            Note::new(64, 90, 0.5, 1.0),
            Note::new(67, 80, 1.0, 2.0),
        ])
        .with_tempo(90.0);

        let bytes = encode(&phrase).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.tempos.len(), 1);
        assert!((decoded.tempos[0].qpm - 90.0).abs() < 1e-3);
        assert_eq!(decoded.notes.len(), 3);
        for (a, b) in phrase.notes.iter().zip(&decoded.notes) {
            assert_eq!(a.pitch, b.pitch);
            assert_eq!(a.velocity, b.velocity);
            assert!((a.start_time - b.start_time).abs() < TOLERANCE);
            assert!((a.end_time - b.end_time).abs() < TOLERANCE);
        }
        assert!((decoded.total_time - 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_sequence_without_tempo_gets_default() {
        let bytes = encode(&Sequence::from_notes(vec![Note::new(60, 100, 0.0, 1.0)])).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.tempos.len(), 1);
        assert_eq!(decoded.tempos[0].qpm, 120.0);
    }

    #[test]
    fn test_drums_and_programs_survive() {
        let mut drum = Note::new(36, 100, 0.0, 0.25);
        drum.is_drum = true;
        let mut strings = Note::new(55, 70, 0.0, 1.0);
        strings.channel = 2;
        strings.program = 48;

        let decoded = decode(&encode(&Sequence::from_notes(vec![drum, strings])).unwrap()).unwrap();
        let drum = decoded.notes.iter().find(|n| n.pitch == 36).unwrap();
        let strings = decoded.notes.iter().find(|n| n.pitch == 55).unwrap();
        assert!(drum.is_drum);
        assert_eq!(drum.channel, 9);
        assert_eq!(strings.channel, 2);
        assert_eq!(strings.program, 48);
    }

    #[test]
    fn test_empty_sequence_encodes() {
        let decoded = decode(&encode(&Sequence::empty()).unwrap()).unwrap();
        assert!(decoded.notes.is_empty());
        assert_eq!(decoded.total_time, 0.0);
    }

    #[test]
    fn test_garbage_is_midi_error() {
        let err = decode(b"definitely not midi").unwrap_err();
        assert!(matches!(err, ChainError::Midi(_)));
    }

    #[test]
    fn test_two_distinct_tempos_are_kept() {
        let mut seq = Sequence::from_notes(vec![Note::new(60, 100, 0.0, 3.0)]);
        seq.tempos = vec![Tempo { time: 0.0, qpm: 120.0 }, Tempo { time: 1.0, qpm: 60.0 }];
        let decoded = decode(&encode(&seq).unwrap()).unwrap();
        assert_eq!(decoded.tempos.len(), 2);
        assert!((decoded.tempos[1].time - 1.0).abs() < TOLERANCE);
        assert!((decoded.notes[0].end_time - 3.0).abs() < TOLERANCE);
    }
}
