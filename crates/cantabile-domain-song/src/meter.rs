use cantabile_ports::types::Tick;
use serde::{Deserialize, Serialize};

/// Time signature change. The denominator is stored as a power of two the
/// way SMF encodes it (`2` means a quarter note).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignaturePoint {
    pub tick: Tick,
    pub numerator: u8,
    pub denominator_power: u8,
}

impl TimeSignaturePoint {
    pub const COMMON_TIME: Self = Self {
        tick: 0,
        numerator: 4,
        denominator_power: 2,
    };
}

/// Counted beats per bar. Eighth meters count every second eighth and
/// sixteenth meters every fourth, so 6/8 and 12/16 both count three.
/// Other denominators fall back to four.
pub fn beats_in_bar(numerator: u8, denominator_power: u8) -> u32 {
    let numerator = numerator as u32;
    match 1u32.checked_shl(denominator_power as u32) {
        Some(2) | Some(4) => numerator,
        Some(8) => numerator / 2,
        Some(16) => numerator / 4,
        _ => 4,
    }
}

/// Beat grid of a song, derived from its time signature changes.
#[derive(Clone, Debug)]
pub struct Meter {
    segments: Vec<MeterSegment>,
}

#[derive(Clone, Copy, Debug)]
struct MeterSegment {
    start_tick: Tick,
    start_beat: u64,
    beat_ticks: Tick,
}

impl Meter {
    pub fn new(ppq: u16, mut points: Vec<TimeSignaturePoint>) -> Self {
        points.sort_by_key(|p| p.tick);
        if points.is_empty() || points[0].tick != 0 {
            points.insert(0, TimeSignaturePoint::COMMON_TIME);
        }

        let mut segments: Vec<MeterSegment> = Vec::with_capacity(points.len());
        for point in &points {
            let beat_ticks = beat_ticks(ppq, *point);
            let start_beat = match segments.last() {
                // a beat cut short by the change still counts
                Some(prev) => prev.beat_at(point.tick) + ticks_past_beat(prev, point.tick),
                None => 0,
            };
            let segment = MeterSegment {
                start_tick: point.tick,
                start_beat,
                beat_ticks,
            };
            // a later point on the same tick wins
            match segments.last_mut() {
                Some(last) if last.start_tick == point.tick => *last = segment,
                _ => segments.push(segment),
            }
        }

        Self { segments }
    }

    /// Zero-based index of the beat containing `tick`.
    pub fn beat_at(&self, tick: Tick) -> u64 {
        self.segment_for_tick(tick).beat_at(tick.max(0))
    }

    /// Beats needed to cover a song ending at `end_tick`, counting a
    /// trailing partial beat.
    pub fn beat_count(&self, end_tick: Tick) -> u64 {
        let end_tick = end_tick.max(0);
        let seg = self.segment_for_tick(end_tick);
        seg.beat_at(end_tick) + ticks_past_beat(&seg, end_tick)
    }

    fn segment_for_tick(&self, tick: Tick) -> MeterSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_tick > tick {
                break;
            }
            current = *seg;
        }
        current
    }
}

impl MeterSegment {
    fn beat_at(&self, tick: Tick) -> u64 {
        self.start_beat + ((tick - self.start_tick).max(0) / self.beat_ticks) as u64
    }
}

fn ticks_past_beat(seg: &MeterSegment, tick: Tick) -> u64 {
    u64::from((tick - seg.start_tick).max(0) % seg.beat_ticks != 0)
}

/// Length of one counted beat: the bar length split over the counted beats.
fn beat_ticks(ppq: u16, point: TimeSignaturePoint) -> Tick {
    let whole = ppq.max(1) as Tick * 4;
    let bar = match 1i64.checked_shl(point.denominator_power as u32) {
        Some(unit) if unit > 0 => whole * point.numerator.max(1) as Tick / unit,
        _ => whole,
    };
    let beats = beats_in_bar(point.numerator, point.denominator_power).max(1) as Tick;
    (bar / beats).max(1)
}
