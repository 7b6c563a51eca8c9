use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::{
    RuleError,
    approval::{Actor, ApproveTier},
    clock::anchor,
    worktime::Span,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OvertimeStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvertimeAction {
    Approve,
    Reject,
    Cancel,
}

/// Anchors a planned overtime window on `date`. An end at or before the
/// start runs past midnight.
pub fn planned_span(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    day_change_hour: u32,
) -> Result<Span, RuleError> {
    let start_at = anchor(date, start, day_change_hour);
    let mut end_at = anchor(date, end, day_change_hour);
    if end_at <= start_at {
        end_at += Duration::days(1);
    }
    let span = Span::new(start_at, end_at);
    if span.minutes() <= 0 {
        return Err(RuleError::InvalidSpan);
    }
    if span.minutes() > 24 * 60 {
        return Err(RuleError::SpanTooLong);
    }
    Ok(span)
}

pub fn transition(
    status: OvertimeStatus,
    action: OvertimeAction,
    actor: &Actor,
    owner_id: u64,
) -> Result<OvertimeStatus, RuleError> {
    let invalid = |verb: &str| RuleError::InvalidTransition {
        action: verb.to_string(),
        status: status.to_string(),
    };

    match action {
        OvertimeAction::Approve | OvertimeAction::Reject => {
            let verb = if action == OvertimeAction::Approve {
                "approve"
            } else {
                "reject"
            };
            if status != OvertimeStatus::Pending {
                return Err(invalid(verb));
            }
            if actor.user_id == owner_id {
                return Err(RuleError::NotPermitted(
                    "cannot decide on your own request".to_string(),
                ));
            }
            if !actor.is_admin && actor.tier < ApproveTier::Middle {
                return Err(RuleError::NotPermitted("manager only".to_string()));
            }
            Ok(if action == OvertimeAction::Approve {
                OvertimeStatus::Approved
            } else {
                OvertimeStatus::Rejected
            })
        }
        OvertimeAction::Cancel => {
            let allowed = if actor.is_admin {
                matches!(status, OvertimeStatus::Pending | OvertimeStatus::Approved)
            } else if actor.user_id == owner_id {
                status == OvertimeStatus::Pending
            } else {
                return Err(RuleError::NotPermitted(
                    "only the owner can cancel".to_string(),
                ));
            };
            if !allowed {
                return Err(invalid("cancel"));
            }
            Ok(OvertimeStatus::Cancelled)
        }
    }
}

/// Overtime not covered by approved requests once the tolerance is spent.
pub fn unapproved_minutes(overtime: i64, approved: i64, tolerance: i64) -> i64 {
    (overtime - approved.max(0) - tolerance.max(0)).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn actor(id: u64, tier: ApproveTier, is_admin: bool) -> Actor {
        Actor {
            user_id: id,
            tier,
            is_admin,
        }
    }

    #[test]
    fn span_within_evening() {
        let span = planned_span(date(), t(18, 0), t(20, 30), 5).unwrap();
        assert_eq!(span.minutes(), 150);
    }

    #[test]
    fn span_past_midnight() {
        let span = planned_span(date(), t(22, 0), t(1, 0), 5).unwrap();
        assert_eq!(span.minutes(), 180);
        assert_eq!(span.end.date(), NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());

        let span = planned_span(date(), t(22, 0), t(1, 0), 0).unwrap();
        assert_eq!(span.minutes(), 180);
    }

    #[test]
    fn equal_times_mean_a_full_day() {
        let span = planned_span(date(), t(9, 0), t(9, 0), 5).unwrap();
        assert_eq!(span.minutes(), 24 * 60);
    }

    #[test]
    fn manager_decides_pending_request() {
        let boss = actor(2, ApproveTier::Middle, false);
        assert_eq!(
            transition(OvertimeStatus::Pending, OvertimeAction::Approve, &boss, 9),
            Ok(OvertimeStatus::Approved)
        );
        assert_eq!(
            transition(OvertimeStatus::Pending, OvertimeAction::Reject, &boss, 9),
            Ok(OvertimeStatus::Rejected)
        );
        assert!(matches!(
            transition(OvertimeStatus::Approved, OvertimeAction::Reject, &boss, 9),
            Err(RuleError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn plain_employee_cannot_decide() {
        let peer = actor(3, ApproveTier::None, false);
        assert!(matches!(
            transition(OvertimeStatus::Pending, OvertimeAction::Approve, &peer, 9),
            Err(RuleError::NotPermitted(_))
        ));
        let me = actor(9, ApproveTier::Top, false);
        assert!(matches!(
            transition(OvertimeStatus::Pending, OvertimeAction::Approve, &me, 9),
            Err(RuleError::NotPermitted(_))
        ));
    }

    #[test]
    fn cancellation_rules() {
        let me = actor(9, ApproveTier::None, false);
        assert_eq!(
            transition(OvertimeStatus::Pending, OvertimeAction::Cancel, &me, 9),
            Ok(OvertimeStatus::Cancelled)
        );
        assert!(transition(OvertimeStatus::Approved, OvertimeAction::Cancel, &me, 9).is_err());

        let admin = actor(1, ApproveTier::None, true);
        assert_eq!(
            transition(OvertimeStatus::Approved, OvertimeAction::Cancel, &admin, 9),
            Ok(OvertimeStatus::Cancelled)
        );
        assert!(transition(OvertimeStatus::Rejected, OvertimeAction::Cancel, &admin, 9).is_err());

        let other = actor(4, ApproveTier::Top, false);
        assert!(transition(OvertimeStatus::Pending, OvertimeAction::Cancel, &other, 9).is_err());
    }

    #[test]
    fn uncovered_overtime() {
        assert_eq!(unapproved_minutes(120, 90, 0), 30);
        assert_eq!(unapproved_minutes(120, 90, 30), 0);
        assert_eq!(unapproved_minutes(0, 0, 0), 0);
        assert_eq!(unapproved_minutes(60, 120, 0), 0);
    }
}
