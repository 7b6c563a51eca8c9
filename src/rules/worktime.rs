use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::{
    RuleError,
    clock::{anchor, minutes_between, round_down, round_up},
};

#[derive(Debug, Clone)]
pub struct WorkPolicy {
    pub rounding_unit: u32,
    pub day_change_hour: u32,
    pub standard_minutes: i64,
    pub late_night_start: NaiveTime,
    pub late_night_end: NaiveTime,
}

/// Standard working hours of a group.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum DayKind {
    Workday,
    Holiday,
    LegalHoliday,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkType {
    Normal,
    HolidayWork,
    LegalHolidayWork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        minutes_between(self.start, self.end).max(0)
    }

    pub fn overlap(&self, other: &Span) -> i64 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            minutes_between(start, end)
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DayWork {
    pub work_type: WorkType,
    pub work_minutes: i64,
    pub rest_minutes: i64,
    pub overtime_minutes: i64,
    pub late_night_minutes: i64,
    pub holiday_minutes: i64,
    pub is_late: bool,
    pub is_early_leave: bool,
    pub crosses_day: bool,
}

/// Anchors rest slots to `date`, sorts them and merges overlaps.
fn anchored_rests(date: NaiveDate, rests: &[RestSlot], day_change_hour: u32) -> Vec<Span> {
    let mut spans: Vec<Span> = rests
        .iter()
        .map(|r| {
            let start = anchor(date, r.start, day_change_hour);
            let mut end = anchor(date, r.end, day_change_hour);
            if end <= start {
                end += Duration::days(1);
            }
            Span::new(start, end)
        })
        .collect();
    spans.sort_by_key(|s| s.start);

    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `span` with every rest cut out of it.
fn worked_segments(span: Span, rests: &[Span]) -> Vec<Span> {
    let mut segments = Vec::new();
    let mut cursor = span.start;
    for rest in rests {
        if rest.end <= cursor || rest.start >= span.end {
            continue;
        }
        if rest.start > cursor {
            segments.push(Span::new(cursor, rest.start));
        }
        cursor = cursor.max(rest.end);
        if cursor >= span.end {
            break;
        }
    }
    if cursor < span.end {
        segments.push(Span::new(cursor, span.end));
    }
    segments
}

fn late_night_windows(date: NaiveDate, policy: &WorkPolicy) -> Vec<Span> {
    [-1, 0, 1]
        .into_iter()
        .map(|offset| {
            let day = date + Duration::days(offset);
            let start = day.and_time(policy.late_night_start);
            let mut end = day.and_time(policy.late_night_end);
            if end <= start {
                end += Duration::days(1);
            }
            Span::new(start, end)
        })
        .collect()
}

/// Checks a rest template before it is stored.
pub fn validate_rest_intervals(rests: &[RestSlot], day_change_hour: u32) -> Result<(), RuleError> {
    let date = NaiveDate::default();
    let mut spans = Vec::with_capacity(rests.len());
    for r in rests {
        if r.start == r.end {
            return Err(RuleError::InvalidRestIntervals(format!(
                "interval starting at {} is empty",
                r.start.format("%H:%M")
            )));
        }
        let start = anchor(date, r.start, day_change_hour);
        let mut end = anchor(date, r.end, day_change_hour);
        if end <= start {
            end += Duration::days(1);
        }
        spans.push(Span::new(start, end));
    }
    spans.sort_by_key(|s| s.start);

    for pair in spans.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(RuleError::InvalidRestIntervals(format!(
                "{} overlaps the previous interval",
                pair[1].start.format("%H:%M")
            )));
        }
    }

    let total: i64 = spans.iter().map(Span::minutes).sum();
    if total >= 24 * 60 {
        return Err(RuleError::InvalidRestIntervals(
            "total rest must be shorter than a day".to_string(),
        ));
    }
    Ok(())
}

/// Derives worked, rest, overtime and late-night minutes for one day.
pub fn compute_day(
    date: NaiveDate,
    in_at: NaiveDateTime,
    out_at: NaiveDateTime,
    rests: &[RestSlot],
    schedule: Option<Schedule>,
    kind: DayKind,
    policy: &WorkPolicy,
) -> Result<DayWork, RuleError> {
    if out_at <= in_at {
        return Err(RuleError::InvalidSpan);
    }
    if out_at - in_at > Duration::hours(24) {
        return Err(RuleError::SpanTooLong);
    }

    let rounded_in = round_up(in_at, policy.rounding_unit);
    let rounded_out = round_down(out_at, policy.rounding_unit);

    let (work_minutes, rest_minutes, late_night_minutes) = if rounded_out > rounded_in {
        let span = Span::new(rounded_in, rounded_out);
        let rest_spans = anchored_rests(date, rests, policy.day_change_hour);
        let segments = worked_segments(span, &rest_spans);
        let work: i64 = segments.iter().map(Span::minutes).sum();
        let windows = late_night_windows(date, policy);
        let late_night: i64 = segments
            .iter()
            .map(|s| windows.iter().map(|w| s.overlap(w)).sum::<i64>())
            .sum();
        (work, span.minutes() - work, late_night)
    } else {
        (0, 0, 0)
    };

    let (work_type, overtime_minutes, holiday_minutes) = match kind {
        DayKind::Workday => (
            WorkType::Normal,
            (work_minutes - policy.standard_minutes).max(0),
            0,
        ),
        DayKind::Holiday => (WorkType::HolidayWork, work_minutes, 0),
        DayKind::LegalHoliday => (WorkType::LegalHolidayWork, 0, work_minutes),
    };

    let (is_late, is_early_leave) = match (kind, schedule) {
        (DayKind::Workday, Some(s)) => (
            in_at > anchor(date, s.start, policy.day_change_hour),
            out_at < anchor(date, s.end, policy.day_change_hour),
        ),
        _ => (false, false),
    };

    Ok(DayWork {
        work_type,
        work_minutes,
        rest_minutes,
        overtime_minutes,
        late_night_minutes,
        holiday_minutes,
        is_late,
        is_early_leave,
        crosses_day: out_at.date() > date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    fn at(day_offset: i64, h: u32, m: u32) -> NaiveDateTime {
        (date() + Duration::days(day_offset)).and_time(t(h, m))
    }

    fn policy() -> WorkPolicy {
        WorkPolicy {
            rounding_unit: 15,
            day_change_hour: 5,
            standard_minutes: 480,
            late_night_start: t(22, 0),
            late_night_end: t(5, 0),
        }
    }

    fn lunch() -> Vec<RestSlot> {
        vec![RestSlot {
            start: t(12, 0),
            end: t(13, 0),
        }]
    }

    fn schedule() -> Option<Schedule> {
        Some(Schedule {
            start: t(9, 0),
            end: t(18, 0),
        })
    }

    #[test]
    fn regular_day_has_no_overtime() {
        let day = compute_day(
            date(),
            at(0, 8, 55),
            at(0, 18, 5),
            &lunch(),
            schedule(),
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        assert_eq!(day.work_type, WorkType::Normal);
        assert_eq!(day.work_minutes, 480);
        assert_eq!(day.rest_minutes, 60);
        assert_eq!(day.overtime_minutes, 0);
        assert!(!day.is_late);
        assert!(!day.is_early_leave);
        assert!(!day.crosses_day);
    }

    #[test]
    fn rounding_is_in_favour_of_the_schedule() {
        let day = compute_day(
            date(),
            at(0, 9, 1),
            at(0, 18, 14),
            &lunch(),
            schedule(),
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        // 09:15 .. 18:00 minus lunch
        assert_eq!(day.work_minutes, 465);
        assert!(day.is_late);
    }

    #[test]
    fn overtime_beyond_standard_minutes() {
        let day = compute_day(
            date(),
            at(0, 9, 0),
            at(0, 20, 30),
            &lunch(),
            schedule(),
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        assert_eq!(day.work_minutes, 630);
        assert_eq!(day.overtime_minutes, 150);
    }

    #[test]
    fn day_crossing_shift_counts_late_night() {
        let rests = vec![RestSlot {
            start: t(0, 0),
            end: t(0, 30),
        }];
        let day = compute_day(
            date(),
            at(0, 18, 0),
            at(1, 3, 0),
            &rests,
            None,
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        assert!(day.crosses_day);
        assert_eq!(day.rest_minutes, 30);
        assert_eq!(day.work_minutes, 510);
        // 22:00 .. 03:00 minus the 30 minute rest
        assert_eq!(day.late_night_minutes, 270);
        assert_eq!(day.overtime_minutes, 30);
    }

    #[test]
    fn holiday_work_is_all_overtime() {
        let day = compute_day(
            date(),
            at(0, 10, 0),
            at(0, 15, 0),
            &lunch(),
            schedule(),
            DayKind::Holiday,
            &policy(),
        )
        .unwrap();
        assert_eq!(day.work_type, WorkType::HolidayWork);
        assert_eq!(day.overtime_minutes, 240);
        assert_eq!(day.holiday_minutes, 0);
        assert!(!day.is_late);
    }

    #[test]
    fn legal_holiday_work_is_counted_separately() {
        let day = compute_day(
            date(),
            at(0, 10, 0),
            at(0, 15, 0),
            &lunch(),
            schedule(),
            DayKind::LegalHoliday,
            &policy(),
        )
        .unwrap();
        assert_eq!(day.work_type, WorkType::LegalHolidayWork);
        assert_eq!(day.overtime_minutes, 0);
        assert_eq!(day.holiday_minutes, 240);
    }

    #[test]
    fn early_leave_is_flagged() {
        let day = compute_day(
            date(),
            at(0, 9, 0),
            at(0, 16, 0),
            &lunch(),
            schedule(),
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        assert!(day.is_early_leave);
        assert_eq!(day.work_minutes, 360);
    }

    #[test]
    fn rounding_can_swallow_a_short_span() {
        let day = compute_day(
            date(),
            at(0, 9, 1),
            at(0, 9, 10),
            &[],
            None,
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        assert_eq!(day.work_minutes, 0);
        assert_eq!(day.rest_minutes, 0);
    }

    #[test]
    fn rejects_inverted_and_overlong_spans() {
        let p = policy();
        assert_eq!(
            compute_day(date(), at(0, 18, 0), at(0, 9, 0), &[], None, DayKind::Workday, &p),
            Err(RuleError::InvalidSpan)
        );
        assert_eq!(
            compute_day(date(), at(0, 9, 0), at(1, 9, 1), &[], None, DayKind::Workday, &p),
            Err(RuleError::SpanTooLong)
        );
    }

    #[test]
    fn overlapping_rests_are_merged() {
        let rests = vec![
            RestSlot {
                start: t(12, 0),
                end: t(13, 0),
            },
            RestSlot {
                start: t(12, 30),
                end: t(13, 30),
            },
        ];
        let day = compute_day(
            date(),
            at(0, 9, 0),
            at(0, 18, 0),
            &rests,
            None,
            DayKind::Workday,
            &policy(),
        )
        .unwrap();
        assert_eq!(day.rest_minutes, 90);
        assert_eq!(day.work_minutes, 450);
    }

    #[test]
    fn rest_validation() {
        assert!(validate_rest_intervals(&lunch(), 5).is_ok());
        let empty = vec![RestSlot {
            start: t(12, 0),
            end: t(12, 0),
        }];
        assert!(validate_rest_intervals(&empty, 5).is_err());
        let overlapping = vec![
            RestSlot {
                start: t(12, 0),
                end: t(13, 0),
            },
            RestSlot {
                start: t(12, 45),
                end: t(13, 15),
            },
        ];
        assert!(validate_rest_intervals(&overlapping, 5).is_err());
        let crossing = vec![
            RestSlot {
                start: t(23, 30),
                end: t(0, 30),
            },
            RestSlot {
                start: t(3, 0),
                end: t(3, 15),
            },
        ];
        assert!(validate_rest_intervals(&crossing, 5).is_ok());
    }

    #[test]
    fn rests_may_not_fill_a_whole_day() {
        let split = |h: u32| {
            vec![
                RestSlot {
                    start: t(h, 0),
                    end: t(h + 12, 0),
                },
                RestSlot {
                    start: t(h + 12, 0),
                    end: t(h, 0),
                },
            ]
        };
        // touching but not overlapping, 24h in total
        assert!(validate_rest_intervals(&split(5), 5).is_err());
        assert!(validate_rest_intervals(&split(0), 0).is_err());

        let almost = vec![RestSlot {
            start: t(5, 0),
            end: t(4, 59),
        }];
        assert!(validate_rest_intervals(&almost, 5).is_ok());
    }

    #[test]
    fn midnight_day_change_does_not_carry_small_hours_over() {
        let policy = WorkPolicy {
            day_change_hour: 0,
            ..policy()
        };
        let rests = vec![RestSlot {
            start: t(0, 0),
            end: t(0, 30),
        }];
        let day = compute_day(
            date(),
            at(0, 18, 0),
            at(1, 3, 0),
            &rests,
            None,
            DayKind::Workday,
            &policy,
        )
        .unwrap();
        // the rest sits at 00:00 of the work date, before the shift started
        assert_eq!(day.rest_minutes, 0);
        assert_eq!(day.work_minutes, 540);
        assert_eq!(day.late_night_minutes, 300);
        assert_eq!(day.overtime_minutes, 60);
        assert!(day.crosses_day);
    }

    #[test]
    fn work_type_round_trips_through_strum() {
        assert_eq!(WorkType::LegalHolidayWork.as_ref(), "legal_holiday_work");
        assert_eq!("holiday_work".parse::<WorkType>().unwrap(), WorkType::HolidayWork);
    }
}
