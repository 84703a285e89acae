use crate::codec::TransportEvent;
use crate::store::{MAX_TEMPO, MIN_TEMPO};
use std::collections::VecDeque;
use std::time::Instant;

/// MIDI clock ticks per quarter note.
pub const PPQN: usize = 24;

/// Estimates tempo from incoming MIDI clock. The estimate is the mean of
/// the last [`PPQN`] tick intervals, so it settles after one beat.
#[derive(Debug, Default)]
pub struct TempoFollower {
    last_tick: Option<Instant>,
    intervals: VecDeque<f64>,
}

impl TempoFollower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport message. Returns a fresh estimate once a full
    /// beat of intervals has been seen.
    pub fn observe(&mut self, event: TransportEvent, at: Instant) -> Option<f64> {
        match event {
            TransportEvent::Clock => self.tick(at),
            // A restart leaves a gap that isn't a real interval.
            TransportEvent::Start | TransportEvent::Continue | TransportEvent::Stop | TransportEvent::Reset => {
                self.last_tick = None;
                if event != TransportEvent::Stop {
                    self.intervals.clear();
                }
                None
            }
            TransportEvent::ActiveSensing => None,
        }
    }

    fn tick(&mut self, at: Instant) -> Option<f64> {
        let previous = self.last_tick.replace(at)?;
        let interval = at.checked_duration_since(previous)?.as_secs_f64();
        if interval <= 0.0 {
            return None;
        }
        if self.intervals.len() == PPQN {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);
        self.bpm()
    }

    pub fn bpm(&self) -> Option<f64> {
        if self.intervals.len() < PPQN {
            return None;
        }
        let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        Some((60.0 / (mean * PPQN as f64)).clamp(MIN_TEMPO, MAX_TEMPO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn feed(follower: &mut TempoFollower, start: Instant, bpm: f64, ticks: u32) -> Option<f64> {
        let interval = Duration::from_secs_f64(60.0 / (bpm * PPQN as f64));
        let mut last = None;
        for i in 0..ticks {
            last = follower.observe(TransportEvent::Clock, start + interval * i);
        }
        last
    }

    #[test]
    fn converges_on_steady_clock() {
        let mut follower = TempoFollower::new();
        let start = Instant::now();
        assert_eq!(feed(&mut follower, start, 128.0, PPQN as u32), None);
        let bpm = feed(&mut follower, start + Duration::from_secs(1), 128.0, PPQN as u32 + 1).unwrap();
        assert!((bpm - 128.0).abs() < 0.01, "{bpm}");
    }

    #[test]
    fn start_discards_history() {
        let mut follower = TempoFollower::new();
        let start = Instant::now();
        feed(&mut follower, start, 90.0, 40);
        assert!(follower.bpm().is_some());
        follower.observe(TransportEvent::Start, start + Duration::from_secs(5));
        assert_eq!(follower.bpm(), None);
    }

    #[test]
    fn stop_keeps_last_estimate() {
        let mut follower = TempoFollower::new();
        let start = Instant::now();
        feed(&mut follower, start, 100.0, 30);
        let before = follower.bpm();
        follower.observe(TransportEvent::Stop, start + Duration::from_secs(3));
        assert_eq!(follower.bpm(), before);
    }

    #[test]
    fn estimate_is_clamped() {
        let mut follower = TempoFollower::new();
        let bpm = feed(&mut follower, Instant::now(), 1000.0, 30).unwrap();
        assert_eq!(bpm, MAX_TEMPO);
    }
}
