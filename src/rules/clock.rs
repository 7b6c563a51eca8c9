use std::{fmt, str::FromStr};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::RuleError;

/// Rounds up to the next multiple of `unit` minutes counted from midnight.
/// Leftover seconds count as a started minute.
pub fn round_up(t: NaiveDateTime, unit: u32) -> NaiveDateTime {
    let mut base = t.with_second(0).unwrap_or(t).with_nanosecond(0).unwrap_or(t);
    if t.second() > 0 || t.nanosecond() > 0 {
        base += Duration::minutes(1);
    }
    if unit <= 1 {
        return base;
    }
    let minute_of_day = base.hour() * 60 + base.minute();
    let rem = minute_of_day % unit;
    if rem == 0 {
        base
    } else {
        base + Duration::minutes(i64::from(unit - rem))
    }
}

/// Truncates to a multiple of `unit` minutes counted from midnight.
pub fn round_down(t: NaiveDateTime, unit: u32) -> NaiveDateTime {
    let base = t.with_second(0).unwrap_or(t).with_nanosecond(0).unwrap_or(t);
    if unit <= 1 {
        return base;
    }
    let minute_of_day = base.hour() * 60 + base.minute();
    base - Duration::minutes(i64::from(minute_of_day % unit))
}

/// The day a punch is booked on. Punches before `day_change_hour` still
/// belong to the previous day's shift.
pub fn business_date(at: NaiveDateTime, day_change_hour: u32) -> NaiveDate {
    if at.hour() < day_change_hour {
        at.date() - Duration::days(1)
    } else {
        at.date()
    }
}

/// Places a wall-clock time on the business day `date`.
pub fn anchor(date: NaiveDate, time: NaiveTime, day_change_hour: u32) -> NaiveDateTime {
    if time.hour() < day_change_hour {
        (date + Duration::days(1)).and_time(time)
    } else {
        date.and_time(time)
    }
}

pub fn minutes_between(start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    (end - start).num_minutes()
}

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "{:04}-{:02}", year, month)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, RuleError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(RuleError::InvalidMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        // validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last_day();
        self.first_day().iter_days().take_while(move |d| *d <= last)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl FromStr for MonthKey {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleError::InvalidMonth(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(invalid)?;
        let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if y.len() != 4 || m.is_empty() || m.len() > 2 || !digits(y) || !digits(m) {
            return Err(invalid());
        }
        let year = y.parse::<i32>().map_err(|_| invalid())?;
        let month = m.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = MonthKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a month formatted as YYYY-MM")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<MonthKey, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn round_up_moves_to_next_unit() {
        assert_eq!(round_up(at(1, 8, 52, 0), 15), at(1, 9, 0, 0));
        assert_eq!(round_up(at(1, 9, 0, 0), 15), at(1, 9, 0, 0));
        assert_eq!(round_up(at(1, 9, 0, 1), 15), at(1, 9, 15, 0));
    }

    #[test]
    fn round_up_crosses_midnight() {
        assert_eq!(round_up(at(1, 23, 50, 0), 15), at(2, 0, 0, 0));
    }

    #[test]
    fn round_down_truncates() {
        assert_eq!(round_down(at(1, 18, 14, 59), 15), at(1, 18, 0, 0));
        assert_eq!(round_down(at(1, 18, 30, 0), 15), at(1, 18, 30, 0));
    }

    #[test]
    fn unit_of_one_only_drops_seconds() {
        assert_eq!(round_up(at(1, 8, 52, 10), 1), at(1, 8, 53, 0));
        assert_eq!(round_down(at(1, 8, 52, 10), 0), at(1, 8, 52, 0));
    }

    #[test]
    fn early_morning_punch_belongs_to_previous_day() {
        assert_eq!(
            business_date(at(2, 3, 0, 0), 5),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(
            business_date(at(2, 5, 0, 0), 5),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
        );
        assert_eq!(
            business_date(at(2, 0, 30, 0), 0),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
        );
    }

    #[test]
    fn anchor_places_small_hours_on_next_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let two = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(anchor(date, two, 5), at(2, 2, 0, 0));
        assert_eq!(anchor(date, nine, 5), at(1, 9, 0, 0));
        assert_eq!(anchor(date, two, 0), at(1, 2, 0, 0));
    }

    #[test]
    fn month_key_parses_and_displays() {
        let m: MonthKey = "2024-02".parse().unwrap();
        assert_eq!(m.to_string(), "2024-02");
        assert_eq!(m.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(m.days().count(), 29);
        assert!("2024-13".parse::<MonthKey>().is_err());
        assert!("24-01".parse::<MonthKey>().is_err());
        assert!("garbage".parse::<MonthKey>().is_err());
    }

    #[test]
    fn month_key_needs_plain_digits() {
        assert!("+123-05".parse::<MonthKey>().is_err());
        assert!("2024-+5".parse::<MonthKey>().is_err());
        assert!("2024- 5".parse::<MonthKey>().is_err());
        assert_eq!("2024-5".parse::<MonthKey>().unwrap().to_string(), "2024-05");
    }

    #[test]
    fn month_key_rolls_over_december() {
        let m = MonthKey::new(2023, 12).unwrap();
        assert_eq!(m.next(), MonthKey::new(2024, 1).unwrap());
        assert_eq!(m.last_day(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn month_key_serde_uses_string_form() {
        let m: MonthKey = serde_json::from_str("\"2024-07\"").unwrap();
        assert_eq!(serde_json::to_value(m).unwrap(), serde_json::json!("2024-07"));
    }
}
