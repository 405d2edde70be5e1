//! Virtual clock.
//!
//! Maps wall-clock time to a virtual day index and an offset inside that
//! day. With a non-zero day length the clock compresses time: day 0
//! starts at the clock epoch and every `virtual_day_secs` of real time is
//! one virtual day. With a zero day length each virtual day is a calendar
//! day in a fixed UTC offset, counted from the Unix epoch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora_events::{AgentId, ClockReading, VirtualDay};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: i64 = 86_400;

/// Source of wall-clock time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        if let Ok(mut now) = self.now.lock() {
            *now += step;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Virtual clock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Real seconds per virtual day; 0 uses calendar days
    pub virtual_day_secs: u64,
    /// Fixed UTC offset for calendar days, in minutes
    pub utc_offset_minutes: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            virtual_day_secs: 0,
            utc_offset_minutes: 0,
        }
    }
}

pub struct VirtualClock {
    source: Arc<dyn TimeSource>,
    epoch: DateTime<Utc>,
    day_length: Option<Duration>,
    utc_offset_secs: i64,
    last_seen: Mutex<HashMap<AgentId, VirtualDay>>,
}

impl VirtualClock {
    /// Creates a clock whose epoch is the source's current time.
    pub fn new(config: &ClockConfig, source: Arc<dyn TimeSource>) -> Self {
        let epoch = source.now();
        Self::with_epoch(config, source, epoch)
    }

    pub fn with_epoch(
        config: &ClockConfig,
        source: Arc<dyn TimeSource>,
        epoch: DateTime<Utc>,
    ) -> Self {
        let day_length = match config.virtual_day_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            source,
            epoch,
            day_length,
            utc_offset_secs: config.utc_offset_minutes as i64 * 60,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> ClockReading {
        self.reading_at(self.source.now())
    }

    pub fn today(&self) -> VirtualDay {
        self.now().virtual_day
    }

    /// Wall-clock time, without the virtual mapping.
    pub fn real_now(&self) -> DateTime<Utc> {
        self.source.now()
    }

    pub fn reading_at(&self, real_ts: DateTime<Utc>) -> ClockReading {
        let (day, offset_ms) = match self.day_length {
            Some(length) => {
                let elapsed = (real_ts - self.epoch).num_milliseconds().max(0) as u64;
                let day_ms = (length.as_millis() as u64).max(1);
                (elapsed / day_ms, elapsed % day_ms)
            }
            None => {
                let local = real_ts.timestamp_millis() + self.utc_offset_secs * 1000;
                let day_ms = SECS_PER_DAY * 1000;
                (
                    local.div_euclid(day_ms).max(0) as u64,
                    local.rem_euclid(day_ms) as u64,
                )
            }
        };
        ClockReading {
            real_ts,
            virtual_day: VirtualDay(day),
            virtual_offset: Duration::from_millis(offset_ms),
        }
    }

    /// True when the agent was last seen on an earlier virtual day.
    /// An agent never seen before has no day to roll over from.
    pub fn is_new_day(&self, agent: &AgentId) -> bool {
        let today = self.today();
        self.last_seen(agent).map_or(false, |seen| seen < today)
    }

    pub fn last_seen(&self, agent: &AgentId) -> Option<VirtualDay> {
        let seen = match self.last_seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.get(agent).copied()
    }

    /// Records `day` as the agent's last-seen day and returns the
    /// previous one when the agent just crossed into a later day.
    pub fn mark_seen(&self, agent: &AgentId, day: VirtualDay) -> Option<VirtualDay> {
        let mut seen = match self.last_seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        match seen.insert(agent.clone(), day) {
            Some(previous) if previous < day => Some(previous),
            Some(previous) if previous > day => {
                // never move backwards
                seen.insert(agent.clone(), previous);
                None
            }
            _ => None,
        }
    }
    /// Seeds last-seen days recovered from a store. Days already known
    /// to the clock win when later.
    pub fn restore_seen(&self, days: impl IntoIterator<Item = (AgentId, VirtualDay)>) {
        let mut seen = match self.last_seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (agent, day) in days {
            let known = seen.entry(agent).or_insert(day);
            *known = (*known).max(day);
        }
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("epoch", &self.epoch)
            .field("day_length", &self.day_length)
            .field("utc_offset_secs", &self.utc_offset_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    fn compressed(secs: u64) -> (Arc<ManualTimeSource>, VirtualClock) {
        let source = Arc::new(ManualTimeSource::new(start()));
        let config = ClockConfig {
            virtual_day_secs: secs,
            utc_offset_minutes: 0,
        };
        let clock = VirtualClock::new(&config, source.clone());
        (source, clock)
    }

    #[test]
    fn test_compressed_day_advances() {
        let (source, clock) = compressed(60);
        assert_eq!(clock.today(), VirtualDay(0));

        source.advance(Duration::from_secs(59));
        let reading = clock.now();
        assert_eq!(reading.virtual_day, VirtualDay(0));
        assert_eq!(reading.virtual_offset, Duration::from_secs(59));

        source.advance(Duration::from_secs(1));
        assert_eq!(clock.today(), VirtualDay(1));

        source.advance(Duration::from_secs(125));
        assert_eq!(clock.today(), VirtualDay(3));
    }

    #[test]
    fn test_calendar_day_uses_offset() {
        let source = Arc::new(ManualTimeSource::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 23, 30, 0).unwrap(),
        ));
        let utc = VirtualClock::new(&ClockConfig::default(), source.clone());
        let ahead = VirtualClock::new(
            &ClockConfig {
                virtual_day_secs: 0,
                utc_offset_minutes: 60,
            },
            source.clone(),
        );
        // 23:30 UTC is already tomorrow at UTC+1
        assert_eq!(ahead.today().0, utc.today().0 + 1);
        assert_eq!(utc.now().virtual_offset, Duration::from_secs(23 * 3600 + 1800));
    }

    #[test]
    fn test_unseen_agent_is_not_new_day() {
        let (_, clock) = compressed(60);
        assert!(!clock.is_new_day(&AgentId::new("a")));
    }

    #[test]
    fn test_rollover_detection() {
        let (source, clock) = compressed(60);
        let agent = AgentId::new("a");

        assert_eq!(clock.mark_seen(&agent, clock.today()), None);
        assert!(!clock.is_new_day(&agent));

        source.advance(Duration::from_secs(61));
        assert!(clock.is_new_day(&agent));
        assert_eq!(clock.mark_seen(&agent, clock.today()), Some(VirtualDay(0)));
        assert!(!clock.is_new_day(&agent));
    }

    #[test]
    fn test_mark_seen_never_moves_backwards() {
        let (_, clock) = compressed(60);
        let agent = AgentId::new("a");
        clock.mark_seen(&agent, VirtualDay(5));
        assert_eq!(clock.mark_seen(&agent, VirtualDay(3)), None);
        assert_eq!(clock.last_seen(&agent), Some(VirtualDay(5)));
    }
}
