use std::sync::Mutex;

use almanac_core::ClockConfig;
use serde::{Deserialize, Serialize};

use crate::calendar::{MINUTES_PER_DAY, MOON_PHASE_MAX, SEASON_MAX, WEEKDAY_MAX};

/// One sample of the external clock, taken once per poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    /// 0..1439
    pub minute_of_day: u16,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: u32,
    /// `None` when the host has no seasons.
    pub season: Option<u32>,
    /// `None` when the host has no moon cycle.
    pub moon_phase: Option<u32>,
    /// Non-decreasing scalar, only compared to detect stalls and rollbacks.
    pub timestamp: i64,
    pub paused: bool,
}

/// Source of time and calendar context for the scheduler.
pub trait TimeSource: Send + Sync {
    fn read(&self) -> ClockReading;
}

/// In-process clock that only moves when told to.
///
/// Time is tracked as total elapsed minutes. Weekday, season and moon phase
/// are derived from the day count, so jumping several days ahead keeps them
/// consistent. The timestamp is the elapsed minute count, so reading twice
/// without advancing looks like a stalled clock.
pub struct VirtualClock {
    config: ClockConfig,
    state: Mutex<ClockState>,
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    elapsed: u64,
    paused: bool,
}

impl VirtualClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ClockState {
                elapsed: 0,
                paused: false,
            }),
        }
    }

    /// Move the clock forward. Ignored while paused.
    pub fn advance(&self, minutes: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.paused {
            state.elapsed = state.elapsed.saturating_add(minutes);
        }
    }

    /// Advance by the configured `minutes_per_poll`.
    pub fn step(&self) {
        self.advance(u64::from(self.config.minutes_per_poll));
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).paused = paused;
    }

    /// Minutes since the clock started.
    pub fn elapsed(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).elapsed
    }

    fn reading_at(&self, state: ClockState) -> ClockReading {
        let per_day = u64::from(MINUTES_PER_DAY);
        let total = u64::from(self.config.start_minute % MINUTES_PER_DAY) + state.elapsed;
        let day = total / per_day;

        let cycle = |enabled: bool, start: u8, days_per_step: u32, max: u32| {
            (enabled && days_per_step > 0).then(|| {
                let steps = day / u64::from(days_per_step);
                ((u64::from(start) + steps) % (u64::from(max) + 1)) as u32
            })
        };

        ClockReading {
            minute_of_day: (total % per_day) as u16,
            weekday: ((u64::from(self.config.start_weekday) + day) % (u64::from(WEEKDAY_MAX) + 1))
                as u32,
            season: cycle(
                self.config.seasons_enabled,
                self.config.start_season,
                self.config.days_per_season,
                SEASON_MAX,
            ),
            moon_phase: cycle(
                self.config.moon_enabled,
                self.config.start_moon_phase,
                self.config.days_per_moon_phase,
                MOON_PHASE_MAX,
            ),
            timestamp: state.elapsed as i64,
            paused: state.paused,
        }
    }
}

impl TimeSource for VirtualClock {
    fn read(&self) -> ClockReading {
        let state = *self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.reading_at(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(start_minute: u16) -> VirtualClock {
        VirtualClock::new(ClockConfig {
            start_minute,
            start_weekday: 6,
            ..ClockConfig::default()
        })
    }

    #[test]
    fn advancing_moves_minute_and_timestamp() {
        let clock = clock(600);
        let before = clock.read();
        clock.advance(5);
        let after = clock.read();
        assert_eq!(after.minute_of_day, 605);
        assert!(after.timestamp > before.timestamp);
    }

    #[test]
    fn midnight_rolls_weekday() {
        let clock = clock(1439);
        assert_eq!(clock.read().weekday, 6);
        clock.advance(2);
        let reading = clock.read();
        assert_eq!(reading.minute_of_day, 1);
        assert_eq!(reading.weekday, 0);
    }

    #[test]
    fn seasons_and_moon_follow_day_count() {
        let clock = VirtualClock::new(ClockConfig {
            start_minute: 0,
            days_per_season: 2,
            days_per_moon_phase: 1,
            ..ClockConfig::default()
        });
        clock.advance(3 * 1440);
        let reading = clock.read();
        assert_eq!(reading.season, Some(1));
        assert_eq!(reading.moon_phase, Some(3));

        clock.advance(6 * 1440);
        assert_eq!(clock.read().moon_phase, Some(1));
    }

    #[test]
    fn disabled_categories_read_unknown() {
        let clock = VirtualClock::new(ClockConfig {
            seasons_enabled: false,
            days_per_moon_phase: 0,
            ..ClockConfig::default()
        });
        let reading = clock.read();
        assert_eq!(reading.season, None);
        assert_eq!(reading.moon_phase, None);
    }

    #[test]
    fn paused_clock_does_not_advance() {
        let clock = clock(0);
        clock.set_paused(true);
        clock.advance(10);
        let reading = clock.read();
        assert!(reading.paused);
        assert_eq!(reading.minute_of_day, 0);
        assert_eq!(clock.elapsed(), 0);
    }
}
