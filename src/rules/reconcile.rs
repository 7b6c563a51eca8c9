use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Punch {
    pub in_at: Option<NaiveDateTime>,
    pub out_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Actual,
    Edited,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MissingPunch {
    In,
    Out,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Reconciled {
    #[schema(value_type = Option<String>, format = "date-time")]
    pub in_at: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub out_at: Option<NaiveDateTime>,
    pub in_source: TimeSource,
    pub out_source: TimeSource,
    pub needs_reason: bool,
    pub discrepancy_minutes: i64,
}

/// Earliest clock-in and latest clock-out across a day's timecard entries.
pub fn actual_from_punches(punches: &[Punch]) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let first_in = punches.iter().filter_map(|p| p.in_at).min();
    let last_out = punches.iter().filter_map(|p| p.out_at).max();
    (first_in, last_out)
}

fn pick(
    actual: Option<NaiveDateTime>,
    edited: Option<NaiveDateTime>,
) -> (Option<NaiveDateTime>, TimeSource) {
    match (edited, actual) {
        (Some(e), _) => (Some(e), TimeSource::Edited),
        (None, Some(a)) => (Some(a), TimeSource::Actual),
        (None, None) => (None, TimeSource::Missing),
    }
}

/// Resolves the effective times of a day from punched and hand-edited values.
///
/// An edit that makes the day longer than the punches show, by more than
/// `tolerance_minutes`, or one that fills in a missing punch, must carry a
/// reason. Shortening the day never does.
pub fn reconcile(
    actual_in: Option<NaiveDateTime>,
    actual_out: Option<NaiveDateTime>,
    edited_in: Option<NaiveDateTime>,
    edited_out: Option<NaiveDateTime>,
    tolerance_minutes: i64,
) -> Reconciled {
    let tolerance = Duration::minutes(tolerance_minutes.max(0));
    let (in_at, in_source) = pick(actual_in, edited_in);
    let (out_at, out_source) = pick(actual_out, edited_out);

    let extends_in = match (edited_in, actual_in) {
        (Some(e), Some(a)) => e < a - tolerance,
        (Some(_), None) => true,
        _ => false,
    };
    let extends_out = match (edited_out, actual_out) {
        (Some(e), Some(a)) => e > a + tolerance,
        (Some(_), None) => true,
        _ => false,
    };

    let diff = |e: Option<NaiveDateTime>, a: Option<NaiveDateTime>| match (e, a) {
        (Some(e), Some(a)) => (e - a).num_minutes().abs(),
        _ => 0,
    };

    Reconciled {
        in_at,
        out_at,
        in_source,
        out_source,
        needs_reason: extends_in || extends_out,
        discrepancy_minutes: diff(edited_in, actual_in) + diff(edited_out, actual_out),
    }
}

pub fn missing_punch(
    in_at: Option<NaiveDateTime>,
    out_at: Option<NaiveDateTime>,
) -> Option<MissingPunch> {
    match (in_at, out_at) {
        (None, None) => Some(MissingPunch::Both),
        (None, Some(_)) => Some(MissingPunch::In),
        (Some(_), None) => Some(MissingPunch::Out),
        (Some(_), Some(_)) => None,
    }
}
