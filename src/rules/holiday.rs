use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, Weekday};

use super::{clock::MonthKey, worktime::DayKind};

/// Decides which days are workdays, company holidays or legal holidays.
#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    /// Stored holidays and whether each one is a legal holiday.
    holidays: HashMap<NaiveDate, bool>,
    legal_weekday: Option<Weekday>,
    company_weekdays: Vec<Weekday>,
}

impl HolidayCalendar {
    pub fn new(
        holidays: impl IntoIterator<Item = (NaiveDate, bool)>,
        legal_weekday: Option<Weekday>,
        company_weekdays: Vec<Weekday>,
    ) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
            legal_weekday,
            company_weekdays,
        }
    }

    pub fn day_kind(&self, date: NaiveDate) -> DayKind {
        let weekday = date.weekday();
        match self.holidays.get(&date) {
            Some(true) => DayKind::LegalHoliday,
            _ if self.legal_weekday == Some(weekday) => DayKind::LegalHoliday,
            Some(false) => DayKind::Holiday,
            None if self.company_weekdays.contains(&weekday) => DayKind::Holiday,
            None => DayKind::Workday,
        }
    }

    pub fn count_legal_holidays(&self, month: MonthKey) -> u32 {
        self.count(month, DayKind::LegalHoliday)
    }

    pub fn count_workdays(&self, month: MonthKey) -> u32 {
        self.count(month, DayKind::Workday)
    }

    fn count(&self, month: MonthKey, kind: DayKind) -> u32 {
        month.days().filter(|d| self.day_kind(*d) == kind).count() as u32
    }
}

/// Parses `Sun`, `sunday`, `SAT` and friends.
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    s.trim().parse::<Weekday>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn calendar() -> HolidayCalendar {
        HolidayCalendar::new(
            vec![(d(5, 3), true), (d(5, 6), false)],
            Some(Weekday::Sun),
            vec![Weekday::Sat],
        )
    }

    #[test]
    fn classifies_days() {
        let cal = calendar();
        // 2024-05-03 is a Friday marked legal
        assert_eq!(cal.day_kind(d(5, 3)), DayKind::LegalHoliday);
        assert_eq!(cal.day_kind(d(5, 4)), DayKind::Holiday);
        assert_eq!(cal.day_kind(d(5, 5)), DayKind::LegalHoliday);
        assert_eq!(cal.day_kind(d(5, 6)), DayKind::Holiday);
        assert_eq!(cal.day_kind(d(5, 7)), DayKind::Workday);
    }

    #[test]
    fn counts_per_month() {
        let cal = calendar();
        let may = MonthKey::new(2024, 5).unwrap();
        // four Sundays plus May 3rd
        assert_eq!(cal.count_legal_holidays(may), 5);
        // 31 days - 5 legal - 4 Saturdays - May 6th
        assert_eq!(cal.count_workdays(may), 21);
    }

    #[test]
    fn no_weekly_legal_holiday() {
        let cal = HolidayCalendar::new(Vec::new(), None, Vec::new());
        let may = MonthKey::new(2024, 5).unwrap();
        assert_eq!(cal.count_legal_holidays(may), 0);
        assert_eq!(cal.count_workdays(may), 31);
    }

    #[test]
    fn weekday_names() {
        assert_eq!(parse_weekday("Sun"), Some(Weekday::Sun));
        assert_eq!(parse_weekday(" saturday "), Some(Weekday::Sat));
        assert_eq!(parse_weekday("someday"), None);
    }
}
