use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::US::Eastern;
use serde::{Deserialize, Serialize};

/// Wall-clock window in US/Eastern, `(hour, minute)` bounds, end exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTime {
    pub start: (u32, u32),
    pub end: (u32, u32),
}

impl SessionTime {
    pub fn contains(&self, minute_of_day: u32) -> bool {
        let start_min = self.start.0 * 60 + self.start.1;
        let end_min = self.end.0 * 60 + self.end.1;
        if start_min < end_min {
            minute_of_day >= start_min && minute_of_day < end_min
        } else {
            // Wraps midnight
            minute_of_day >= start_min || minute_of_day < end_min
        }
    }
}

/// Hours in which position sizes get scaled down for thin books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityCalendar {
    pub low_windows: Vec<(String, SessionTime)>,
    pub weekends_low: bool,
}

impl Default for LiquidityCalendar {
    fn default() -> Self {
        Self {
            low_windows: vec![
                (
                    "rollover".to_string(),
                    SessionTime {
                        start: (17, 0),
                        end: (19, 0),
                    },
                ),
                (
                    "overnight".to_string(),
                    SessionTime {
                        start: (22, 0),
                        end: (2, 0),
                    },
                ),
            ],
            weekends_low: true,
        }
    }
}

impl LiquidityCalendar {
    /// Name of the low-liquidity window covering `at`, if any.
    pub fn low_window_at(&self, at: DateTime<Utc>) -> Option<&str> {
        let et = at.with_timezone(&Eastern);
        if self.weekends_low && matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
            return Some("weekend");
        }
        let minute = et.hour() * 60 + et.minute();
        self.low_windows
            .iter()
            .find(|(_, w)| w.contains(minute))
            .map(|(name, _)| name.as_str())
    }

    pub fn is_low_liquidity(&self, at: DateTime<Utc>) -> bool {
        self.low_window_at(at).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn make_utc_for_et(day: u32, et_hour: u32, et_minute: u32) -> DateTime<Utc> {
        // January: ET is UTC-5.
        let utc_hour = et_hour + 5;
        let (day_offset, hour) = if utc_hour >= 24 {
            (1, utc_hour - 24)
        } else {
            (0, utc_hour)
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, day + day_offset).unwrap();
        let naive = date.and_hms_opt(hour, et_minute, 0).unwrap();
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn new_york_morning_is_liquid() {
        let cal = LiquidityCalendar::default();
        // Monday 2024-01-15, 10:00 ET
        assert!(!cal.is_low_liquidity(make_utc_for_et(15, 10, 0)));
    }

    #[test]
    fn rollover_and_overnight_are_thin() {
        let cal = LiquidityCalendar::default();
        assert_eq!(cal.low_window_at(make_utc_for_et(15, 17, 30)), Some("rollover"));
        assert_eq!(cal.low_window_at(make_utc_for_et(15, 23, 0)), Some("overnight"));
        assert_eq!(cal.low_window_at(make_utc_for_et(16, 1, 0)), Some("overnight"));
    }

    #[test]
    fn weekends_are_thin() {
        let cal = LiquidityCalendar::default();
        // Saturday 2024-01-13, noon ET
        assert_eq!(cal.low_window_at(make_utc_for_et(13, 12, 0)), Some("weekend"));
    }
}
