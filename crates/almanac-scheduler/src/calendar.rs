//! Field categories of an almanac crontab line and their alias tables.

use serde::{Deserialize, Serialize};

pub const MINUTE_MAX: u32 = 59;
pub const HOUR_MAX: u32 = 23;
pub const WEEKDAY_MAX: u32 = 6;
pub const SEASON_MAX: u32 = 3;
pub const MOON_PHASE_MAX: u32 = 7;

// minute-of-day buckets, 00:00 … 23:59
pub use almanac_core::config::MINUTES_PER_DAY;

pub const WEEKDAY_ALIASES: &[(&str, u32)] = &[
    ("SU", 0),
    ("MO", 1),
    ("TU", 2),
    ("WE", 3),
    ("TH", 4),
    ("FR", 5),
    ("SA", 6),
];

pub const SEASON_ALIASES: &[(&str, u32)] = &[
    ("SUMMER", 0),
    ("FALL", 1),
    ("AUTUMN", 1),
    ("WINTER", 2),
    ("SPRING", 3),
    ("EASTER", 3),
];

pub const MOON_PHASE_ALIASES: &[(&str, u32)] = &[
    ("NEW_MOON", 0),
    ("WAXING_CRESCENT", 1),
    ("FIRST_QUARTER", 2),
    ("WAXING_GIBBOUS", 3),
    ("FULL_MOON", 4),
    ("WANING_GIBBOUS", 5),
    ("THIRD_QUARTER", 6),
    ("WANING_CRESCENT", 7),
];

/// Which of the five crontab columns a token belongs to.
///
/// `Uncategorized` has no implicit range and no aliases; callers must pass
/// an explicit range when parsing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Uncategorized,
    Minute,
    Hour,
    Weekday,
    Season,
    MoonPhase,
}

impl Category {
    /// Inclusive valid range, `None` for `Uncategorized`.
    pub fn range(self) -> Option<(u32, u32)> {
        match self {
            Category::Uncategorized => None,
            Category::Minute => Some((0, MINUTE_MAX)),
            Category::Hour => Some((0, HOUR_MAX)),
            Category::Weekday => Some((0, WEEKDAY_MAX)),
            Category::Season => Some((0, SEASON_MAX)),
            Category::MoonPhase => Some((0, MOON_PHASE_MAX)),
        }
    }

    pub fn aliases(self) -> &'static [(&'static str, u32)] {
        match self {
            Category::Weekday => WEEKDAY_ALIASES,
            Category::Season => SEASON_ALIASES,
            Category::MoonPhase => MOON_PHASE_ALIASES,
            _ => &[],
        }
    }

    /// Case-insensitive alias lookup.
    pub fn alias(self, name: &str) -> Option<u32> {
        self.aliases()
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Uncategorized => "uncategorized",
            Category::Minute => "minute",
            Category::Hour => "hour",
            Category::Weekday => "weekday",
            Category::Season => "season",
            Category::MoonPhase => "moon_phase",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_lookup_ignores_case() {
        assert_eq!(Category::Weekday.alias("fr"), Some(5));
        assert_eq!(Category::Season.alias("Autumn"), Some(1));
        assert_eq!(Category::Season.alias("EASTER"), Some(3));
        assert_eq!(Category::MoonPhase.alias("full_moon"), Some(4));
    }

    #[test]
    fn minute_and_hour_have_no_aliases() {
        assert_eq!(Category::Minute.alias("MO"), None);
        assert_eq!(Category::Hour.alias("SUMMER"), None);
    }

    #[test]
    fn ranges_match_table() {
        assert_eq!(Category::Minute.range(), Some((0, 59)));
        assert_eq!(Category::Hour.range(), Some((0, 23)));
        assert_eq!(Category::MoonPhase.range(), Some((0, 7)));
        assert_eq!(Category::Uncategorized.range(), None);
    }
}
