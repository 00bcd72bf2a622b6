//! Protected-window schedule.
//!
//! Deactivation is suppressed inside a configured window. Windows are
//! expressed in UTC, one optional window for Monday through Friday, one
//! for Saturday, one for Sunday. A window protects an instant strictly
//! between its endpoints; midnight-crossing windows are rejected at parse
//! time and must be expressed as two windows.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};

use crate::config::ConfigError;

/// A `[from, to]` time-of-day range, `from < to`, both in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    from: NaiveTime,
    to: NaiveTime,
}

impl TimeWindow {
    /// Parse `HH:MM-HH:MM`. The flag name is carried into the error.
    pub fn parse(flag: &str, value: &str) -> Result<Self, ConfigError> {
        let format_err = || ConfigError::WindowFormat {
            flag: flag.to_string(),
            value: value.to_string(),
        };

        let (from_raw, to_raw) = value.split_once('-').ok_or_else(format_err)?;
        let from = NaiveTime::parse_from_str(from_raw, "%H:%M").map_err(|_| format_err())?;
        let to = NaiveTime::parse_from_str(to_raw, "%H:%M").map_err(|_| format_err())?;

        if from >= to {
            return Err(ConfigError::WindowOrder {
                flag: flag.to_string(),
                value: value.to_string(),
            });
        }
        Ok(Self { from, to })
    }

    /// Strict containment: the endpoints themselves are not protected.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.from < t && t < self.to
    }
}

/// The weekly no-deactivation schedule.
#[derive(Debug, Clone, Default)]
pub struct WeeklySchedule {
    pub mo_fr: Option<TimeWindow>,
    pub sat: Option<TimeWindow>,
    pub sun: Option<TimeWindow>,
    /// Force-activate the workload while inside a window.
    pub autostart: bool,
}

impl WeeklySchedule {
    /// Whether the given instant falls inside the applicable window.
    pub fn protected_at(&self, now: DateTime<Utc>) -> bool {
        let window = match now.weekday() {
            Weekday::Sat => self.sat,
            Weekday::Sun => self.sun,
            _ => self.mo_fr,
        };
        window.is_some_and(|w| w.contains(now.time()))
    }

    pub fn is_empty(&self) -> bool {
        self.mo_fr.is_none() && self.sat.is_none() && self.sun.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn window(value: &str) -> TimeWindow {
        TimeWindow::parse("test", value).unwrap()
    }

    /// 2023-06-05 is a Monday.
    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn parse_accepts_valid_window() {
        assert_eq!(
            window("08:30-17:00"),
            TimeWindow {
                from: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
                to: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            }
        );
    }

    #[test]
    fn parse_rejects_malformed_input() {
        for bad in ["", "08:30", "8:3c-17:00", "08:30/17:00", "25:00-26:00"] {
            let err = TimeWindow::parse("noDeactivationMoFrFromToUTC", bad).unwrap_err();
            assert!(
                err.to_string().contains("noDeactivationMoFrFromToUTC"),
                "error for {bad:?} should name the flag: {err}"
            );
        }
    }

    #[test]
    fn parse_rejects_midnight_crossing() {
        let err = TimeWindow::parse("noDeactivationSatFromToUTC", "22:00-06:00").unwrap_err();
        assert!(matches!(err, ConfigError::WindowOrder { .. }));
        // Equal endpoints are an empty window; also rejected.
        assert!(TimeWindow::parse("f", "09:00-09:00").is_err());
    }

    #[test]
    fn containment_is_strict() {
        let w = window("09:00-17:00");
        assert!(!w.contains(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert!(w.contains(NaiveTime::from_hms_opt(9, 0, 1).unwrap()));
        assert!(w.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(17, 0, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(18, 0, 0).unwrap()));
    }

    #[test]
    fn weekday_selects_window() {
        let schedule = WeeklySchedule {
            mo_fr: Some(window("09:00-17:00")),
            sat: Some(window("10:00-12:00")),
            sun: None,
            autostart: false,
        };

        // Monday noon: inside the weekday window.
        assert!(schedule.protected_at(utc(5, 12, 0)));
        // Friday noon.
        assert!(schedule.protected_at(utc(9, 12, 0)));
        // Monday evening: outside.
        assert!(!schedule.protected_at(utc(5, 18, 0)));
        // Saturday: the Sat window applies, not the weekday one.
        assert!(schedule.protected_at(utc(10, 11, 0)));
        assert!(!schedule.protected_at(utc(10, 13, 0)));
        // Sunday: no window configured.
        assert!(!schedule.protected_at(utc(11, 11, 0)));
    }

    #[test]
    fn empty_schedule_protects_nothing() {
        let schedule = WeeklySchedule::default();
        assert!(schedule.is_empty());
        assert!(!schedule.protected_at(utc(5, 12, 0)));
    }
}
