use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use utoipa::ToSchema;

use super::{
    approval::AttendanceStatus,
    clock::MonthKey,
    holiday::HolidayCalendar,
    worktime::{DayKind, DayWork, WorkType},
};

/// One attendance log as the summary sees it.
#[derive(Debug, Clone)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub has_in: bool,
    pub has_out: bool,
    pub work: Option<DayWork>,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MonthlySummary {
    #[schema(value_type = String, example = "2024-05")]
    pub month: String,
    pub scheduled_workdays: u32,
    pub legal_holidays: u32,
    pub work_days: u32,
    pub absent_days: u32,
    pub holiday_work_days: u32,
    pub legal_holiday_work_days: u32,
    pub total_work_minutes: i64,
    pub total_rest_minutes: i64,
    pub total_overtime_minutes: i64,
    pub total_late_night_minutes: i64,
    pub total_holiday_minutes: i64,
    pub late_count: u32,
    pub early_leave_count: u32,
    pub missing_punch_days: u32,
    pub approved_days: u32,
    pub pending_days: u32,
}

/// Folds a month of attendance into totals. Days after `until` are not
/// counted as absences yet.
pub fn summarize(
    month: MonthKey,
    records: &[DayRecord],
    calendar: &HolidayCalendar,
    until: NaiveDate,
) -> MonthlySummary {
    let by_date: HashMap<NaiveDate, &DayRecord> = records
        .iter()
        .filter(|r| month.contains(r.date))
        .map(|r| (r.date, r))
        .collect();

    let mut s = MonthlySummary {
        month: month.to_string(),
        scheduled_workdays: calendar.count_workdays(month),
        legal_holidays: calendar.count_legal_holidays(month),
        ..Default::default()
    };

    for date in month.days() {
        let record = by_date.get(&date);

        if calendar.day_kind(date) == DayKind::Workday
            && date <= until
            && !record.is_some_and(|r| r.has_in)
        {
            s.absent_days += 1;
        }

        let Some(r) = record else { continue };

        if r.has_in != r.has_out && date < until {
            s.missing_punch_days += 1;
        }

        match r.status {
            AttendanceStatus::Approved => s.approved_days += 1,
            AttendanceStatus::Submitted => s.pending_days += 1,
            _ => {}
        }

        let Some(w) = &r.work else { continue };
        if w.work_minutes > 0 {
            s.work_days += 1;
            match w.work_type {
                WorkType::HolidayWork => s.holiday_work_days += 1,
                WorkType::LegalHolidayWork => s.legal_holiday_work_days += 1,
                WorkType::Normal => {}
            }
        }
        s.total_work_minutes += w.work_minutes;
        s.total_rest_minutes += w.rest_minutes;
        s.total_overtime_minutes += w.overtime_minutes;
        s.total_late_night_minutes += w.late_night_minutes;
        s.total_holiday_minutes += w.holiday_minutes;
        if w.is_late {
            s.late_count += 1;
        }
        if w.is_early_leave {
            s.early_leave_count += 1;
        }
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn work(kind: WorkType, minutes: i64, overtime: i64) -> DayWork {
        DayWork {
            work_type: kind,
            work_minutes: minutes,
            rest_minutes: 60,
            overtime_minutes: overtime,
            late_night_minutes: 0,
            holiday_minutes: if kind == WorkType::LegalHolidayWork {
                minutes
            } else {
                0
            },
            is_late: false,
            is_early_leave: false,
            crosses_day: false,
        }
    }

    fn calendar() -> HolidayCalendar {
        HolidayCalendar::new(Vec::new(), Some(Weekday::Sun), vec![Weekday::Sat])
    }

    #[test]
    fn totals_and_absences() {
        let records = vec![
            DayRecord {
                date: d(1),
                has_in: true,
                has_out: true,
                work: Some(work(WorkType::Normal, 540, 60)),
                status: AttendanceStatus::Approved,
            },
            DayRecord {
                date: d(2),
                has_in: true,
                has_out: true,
                work: Some(DayWork {
                    is_late: true,
                    ..work(WorkType::Normal, 465, 0)
                }),
                status: AttendanceStatus::Submitted,
            },
            DayRecord {
                date: d(3),
                has_in: true,
                has_out: false,
                work: None,
                status: AttendanceStatus::Draft,
            },
            DayRecord {
                date: d(5),
                has_in: true,
                has_out: true,
                work: Some(work(WorkType::LegalHolidayWork, 240, 0)),
                status: AttendanceStatus::Draft,
            },
        ];
        let may = MonthKey::new(2024, 5).unwrap();
        let s = summarize(may, &records, &calendar(), d(7));

        assert_eq!(s.month, "2024-05");
        assert_eq!(s.work_days, 3);
        assert_eq!(s.total_work_minutes, 540 + 465 + 240);
        assert_eq!(s.total_overtime_minutes, 60);
        assert_eq!(s.total_holiday_minutes, 240);
        assert_eq!(s.legal_holiday_work_days, 1);
        assert_eq!(s.late_count, 1);
        assert_eq!(s.missing_punch_days, 1);
        assert_eq!(s.approved_days, 1);
        assert_eq!(s.pending_days, 1);
        // May 6th and 7th are workdays without a clock-in
        assert_eq!(s.absent_days, 2);
        assert_eq!(s.legal_holidays, 4);
        assert_eq!(s.scheduled_workdays, 23);
    }

    #[test]
    fn records_outside_the_month_are_ignored() {
        let records = vec![DayRecord {
            date: NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
            has_in: true,
            has_out: true,
            work: Some(work(WorkType::Normal, 480, 0)),
            status: AttendanceStatus::Approved,
        }];
        let may = MonthKey::new(2024, 5).unwrap();
        let s = summarize(may, &records, &calendar(), d(1));
        assert_eq!(s.work_days, 0);
        assert_eq!(s.approved_days, 0);
        assert_eq!(s.absent_days, 1);
    }

    #[test]
    fn shift_still_open_on_the_cut_off_day_is_not_missing() {
        let open = |date| DayRecord {
            date,
            has_in: true,
            has_out: false,
            work: None,
            status: AttendanceStatus::Draft,
        };
        let may = MonthKey::new(2024, 5).unwrap();
        let records = vec![open(d(7)), open(d(8))];

        let s = summarize(may, &records, &calendar(), d(8));
        assert_eq!(s.missing_punch_days, 1);

        let s = summarize(may, &records, &calendar(), d(9));
        assert_eq!(s.missing_punch_days, 2);
    }
}
