use cantabile_ports::types::Tick;
use serde::{Deserialize, Serialize};

pub const DEFAULT_US_PER_QUARTER: u32 = 500_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoPoint {
    pub tick: Tick,
    pub us_per_quarter: u32,
}

/// Piecewise-constant tempo curve of a song, in unscaled song time.
#[derive(Clone, Debug)]
pub struct TempoMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
}

#[derive(Clone, Copy, Debug)]
struct TempoSegment {
    start_tick: Tick,
    start_us: i64,
    us_per_quarter: u32,
}

impl TempoMap {
    pub fn new(ppq: u16, mut points: Vec<TempoPoint>) -> Self {
        points.sort_by_key(|p| p.tick);
        if points.is_empty() || points[0].tick != 0 {
            points.insert(
                0,
                TempoPoint {
                    tick: 0,
                    us_per_quarter: DEFAULT_US_PER_QUARTER,
                },
            );
        }

        let ppq = ppq.max(1);
        let mut segments: Vec<TempoSegment> = Vec::with_capacity(points.len());
        let mut current_us = 0i64;
        for (idx, point) in points.iter().enumerate() {
            if idx > 0 {
                let prev = &points[idx - 1];
                current_us += ticks_to_us(point.tick - prev.tick, prev.us_per_quarter, ppq);
            }
            let segment = TempoSegment {
                start_tick: point.tick,
                start_us: current_us,
                us_per_quarter: point.us_per_quarter.max(1),
            };
            // a later point on the same tick wins
            match segments.last_mut() {
                Some(last) if last.start_tick == point.tick => *last = segment,
                _ => segments.push(segment),
            }
        }

        Self { ppq, segments }
    }

    pub fn ppq(&self) -> u16 {
        self.ppq
    }

    pub fn tick_to_micros(&self, tick: Tick) -> i64 {
        let seg = self.segment_for_tick(tick);
        seg.start_us + ticks_to_us(tick - seg.start_tick, seg.us_per_quarter, self.ppq)
    }

    pub fn micros_to_tick(&self, micros: i64) -> Tick {
        let seg = self.segment_for_micros(micros);
        seg.start_tick + us_to_ticks(micros - seg.start_us, seg.us_per_quarter, self.ppq)
    }

    pub fn us_per_quarter_at(&self, tick: Tick) -> u32 {
        self.segment_for_tick(tick).us_per_quarter
    }

    fn segment_for_tick(&self, tick: Tick) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_tick > tick {
                break;
            }
            current = *seg;
        }
        current
    }

    fn segment_for_micros(&self, micros: i64) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_us > micros {
                break;
            }
            current = *seg;
        }
        current
    }
}

/// Microseconds per quarter once the BPM offset is applied. The effective
/// tempo never drops below 1 BPM.
pub fn scaled_us_per_quarter(us_per_quarter: u32, bpm_speed: i32) -> u32 {
    let bpm = 60_000_000.0 / us_per_quarter.max(1) as f64;
    let effective = (bpm + bpm_speed as f64).max(1.0);
    (60_000_000.0 / effective).round() as u32
}

pub fn bpm_of(us_per_quarter: u32) -> u32 {
    (60_000_000.0 / us_per_quarter.max(1) as f64).round() as u32
}

pub fn ticks_to_us(ticks: Tick, us_per_quarter: u32, ppq: u16) -> i64 {
    let ticks = ticks as i128;
    let us_per_quarter = us_per_quarter as i128;
    let ppq = ppq.max(1) as i128;
    ((ticks * us_per_quarter) / ppq) as i64
}

pub fn us_to_ticks(us: i64, us_per_quarter: u32, ppq: u16) -> Tick {
    let us = us as i128;
    let us_per_quarter = us_per_quarter.max(1) as i128;
    let ppq = ppq as i128;
    ((us * ppq) / us_per_quarter) as Tick
}
