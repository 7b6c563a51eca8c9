//! Loaders shared by the attendance, timecard and summary handlers.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer};
use sqlx::{FromRow, MySqlConnection};
use tracing::{debug, warn};

use crate::{
    auth::auth::AuthUser,
    config::{Config, parse_clock},
    error::AppError,
    model::{
        attendance::{AttendanceLog, attendance_columns},
        rest_time::RestInterval,
        timecard::Timecard,
    },
    rules::{
        approval::AttendanceStatus,
        clock::business_date,
        holiday::HolidayCalendar,
        reconcile::{Reconciled, actual_from_punches, reconcile},
        worktime::{RestSlot, Schedule, compute_day},
    },
};

/// The bits of a user (and their group) that attendance rules depend on.
#[derive(Debug, FromRow)]
pub struct OwnerInfo {
    pub id: u64,
    pub group_id: Option<u64>,
    pub rest_template_id: Option<u64>,
    pub approve_levels: Option<u8>,
    pub work_start: Option<NaiveTime>,
    pub work_end: Option<NaiveTime>,
}

impl OwnerInfo {
    pub fn schedule(&self) -> Option<Schedule> {
        match (self.work_start, self.work_end) {
            (Some(start), Some(end)) => Some(Schedule { start, end }),
            _ => None,
        }
    }

    pub fn required_levels(&self) -> u8 {
        self.approve_levels.unwrap_or(1)
    }
}

/// Current wall-clock time, truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn today(config: &Config) -> NaiveDate {
    business_date(now(), config.day_change_hour)
}

/// Accepts `HH:MM` as well as chrono's own `HH:MM:SS`.
pub fn de_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S")
        .ok()
        .or_else(|| parse_clock(&raw))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid time '{raw}', expected HH:MM")))
}

pub async fn load_owner(conn: &mut MySqlConnection, user_id: u64) -> Result<OwnerInfo, AppError> {
    sqlx::query_as::<_, OwnerInfo>(
        r#"
        SELECT u.id, u.group_id, u.rest_template_id,
               g.approve_levels, g.work_start, g.work_end
        FROM users u
        LEFT JOIN user_groups g ON g.id = u.group_id
        WHERE u.id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub async fn load_rest_slots(
    conn: &mut MySqlConnection,
    template_id: Option<u64>,
) -> Result<Vec<RestSlot>, AppError> {
    let Some(template_id) = template_id else {
        return Ok(Vec::new());
    };
    let intervals = sqlx::query_as::<_, RestInterval>(
        "SELECT template_id, start_time, end_time FROM rest_time_intervals WHERE template_id = ? ORDER BY start_time",
    )
    .bind(template_id)
    .fetch_all(conn)
    .await?;
    Ok(intervals.iter().map(RestSlot::from).collect())
}

pub async fn load_calendar(
    conn: &mut MySqlConnection,
    config: &Config,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<HolidayCalendar, AppError> {
    let rows = sqlx::query_as::<_, (NaiveDate, bool)>(
        "SELECT holiday_date, is_legal FROM holidays WHERE holiday_date BETWEEN ? AND ?",
    )
    .bind(from)
    .bind(to)
    .fetch_all(conn)
    .await?;
    Ok(HolidayCalendar::new(
        rows,
        config.legal_holiday_weekday,
        config.company_holiday_weekdays.clone(),
    ))
}

pub async fn load_log(
    conn: &mut MySqlConnection,
    id: u64,
    for_update: bool,
) -> Result<AttendanceLog, AppError> {
    let sql = format!(
        "SELECT {} FROM attendance_logs WHERE id = ?{}",
        attendance_columns(None),
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, AttendanceLog>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Attendance not found".to_string()))
}

pub async fn load_timecards(
    conn: &mut MySqlConnection,
    attendance_id: u64,
) -> Result<Vec<Timecard>, AppError> {
    Ok(sqlx::query_as::<_, Timecard>(
        r#"
        SELECT id, attendance_id, user_id, punched_in_at, punched_out_at, source, created_at
        FROM timecards
        WHERE attendance_id = ?
        ORDER BY punched_in_at, id
        "#,
    )
    .bind(attendance_id)
    .fetch_all(conn)
    .await?)
}

/// Effective times of a log given its punches.
pub fn reconcile_log(log: &AttendanceLog, timecards: &[Timecard], config: &Config) -> Reconciled {
    let punches: Vec<_> = timecards.iter().map(Timecard::punch).collect();
    let (actual_in, actual_out) = actual_from_punches(&punches);
    reconcile(
        actual_in,
        actual_out,
        log.edited_in_at,
        log.edited_out_at,
        config.edit_tolerance_min,
    )
}

/// Re-derives every computed column of a log from its punches and edits,
/// bumps its version and returns the fresh row.
pub async fn recompute(
    conn: &mut MySqlConnection,
    config: &Config,
    attendance_id: u64,
) -> Result<AttendanceLog, AppError> {
    let log = load_log(conn, attendance_id, false).await?;
    let timecards = load_timecards(conn, attendance_id).await?;
    let punches: Vec<_> = timecards.iter().map(Timecard::punch).collect();
    let (actual_in, actual_out) = actual_from_punches(&punches);
    let effective = reconcile_log(&log, &timecards, config);

    let work = match (effective.in_at, effective.out_at) {
        (Some(in_at), Some(out_at)) => {
            let owner = load_owner(conn, log.user_id).await?;
            let rests = load_rest_slots(conn, owner.rest_template_id).await?;
            let calendar = load_calendar(conn, config, log.work_date, log.work_date).await?;
            Some(compute_day(
                log.work_date,
                in_at,
                out_at,
                &rests,
                owner.schedule(),
                calendar.day_kind(log.work_date),
                &config.work_policy(),
            )?)
        }
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE attendance_logs
        SET in_at = ?, out_at = ?, work_type = ?,
            work_minutes = ?, rest_minutes = ?, overtime_minutes = ?,
            late_night_minutes = ?, holiday_minutes = ?,
            is_late = ?, is_early_leave = ?, crosses_day = ?,
            version = version + 1
        WHERE id = ?
        "#,
    )
    .bind(actual_in)
    .bind(actual_out)
    .bind(work.as_ref().map(|w| w.work_type.as_ref().to_string()))
    .bind(work.as_ref().map_or(0, |w| w.work_minutes))
    .bind(work.as_ref().map_or(0, |w| w.rest_minutes))
    .bind(work.as_ref().map_or(0, |w| w.overtime_minutes))
    .bind(work.as_ref().map_or(0, |w| w.late_night_minutes))
    .bind(work.as_ref().map_or(0, |w| w.holiday_minutes))
    .bind(work.as_ref().is_some_and(|w| w.is_late))
    .bind(work.as_ref().is_some_and(|w| w.is_early_leave))
    .bind(work.as_ref().is_some_and(|w| w.crosses_day))
    .bind(attendance_id)
    .execute(&mut *conn)
    .await?;

    load_log(conn, attendance_id, false).await
}

/// Non-admin approvers act only on users of their own group.
pub fn require_approver_scope(auth: &AuthUser, owner: &OwnerInfo) -> Result<(), AppError> {
    if auth.is_admin() || (owner.group_id.is_some() && owner.group_id == auth.group_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("User is outside your group".to_string()))
    }
}

/// An input of `compute_day` that changed outside the log itself.
#[derive(Debug, Clone, Copy)]
pub enum Affected {
    /// A holiday was added or removed on this date
    Date(NaiveDate),
    /// The group's schedule changed or the group is going away
    Group(u64),
    /// The template's intervals changed or it is going away
    RestTemplate(u64),
    /// The user moved to another group or rest template
    User(u64),
}

fn editable_logs_sql(affected: Affected) -> String {
    let filter = match affected {
        Affected::Date(_) => "a.work_date = ?",
        Affected::Group(_) => "u.group_id = ?",
        Affected::RestTemplate(_) => "u.rest_template_id = ?",
        Affected::User(_) => "a.user_id = ?",
    };
    format!(
        r#"
        SELECT a.id
        FROM attendance_logs a
        JOIN users u ON u.id = a.user_id
        WHERE a.status IN (?, ?) AND {filter}
        ORDER BY a.id
        FOR UPDATE
        "#
    )
}

/// Locks and lists the Draft/Rejected logs that depend on `affected`.
/// Submitted and approved logs keep the figures they were signed off with.
pub async fn editable_logs(
    conn: &mut MySqlConnection,
    affected: Affected,
) -> Result<Vec<u64>, AppError> {
    let sql = editable_logs_sql(affected);
    let query = sqlx::query_scalar::<_, u64>(&sql)
        .bind(AttendanceStatus::Draft.to_string())
        .bind(AttendanceStatus::Rejected.to_string());
    let query = match affected {
        Affected::Date(date) => query.bind(date),
        Affected::Group(id) | Affected::RestTemplate(id) | Affected::User(id) => query.bind(id),
    };
    Ok(query.fetch_all(conn).await?)
}

/// Runs `recompute` over `ids`. A log whose stored times no longer make a
/// valid day is left untouched and logged.
pub async fn recompute_all(
    conn: &mut MySqlConnection,
    config: &Config,
    ids: &[u64],
) -> Result<usize, AppError> {
    let mut refreshed = 0;
    for &id in ids {
        match recompute(conn, config, id).await {
            Ok(_) => refreshed += 1,
            Err(AppError::Rule(e)) => {
                warn!(attendance_id = id, error = %e, "Attendance log not recomputed");
            }
            Err(e) => return Err(e),
        }
    }
    debug!(refreshed, total = ids.len(), "Editable attendance logs recomputed");
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::role::Role, rules::approval::ApproveTier};

    fn owner(group_id: Option<u64>) -> OwnerInfo {
        OwnerInfo {
            id: 7,
            group_id,
            rest_template_id: None,
            approve_levels: None,
            work_start: None,
            work_end: None,
        }
    }

    fn actor(role: Role, group_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            login_name: "boss".to_string(),
            role,
            tier: ApproveTier::Middle,
            group_id,
        }
    }

    #[test]
    fn approvers_stay_within_their_group() {
        let boss = actor(Role::Manager, Some(4));
        assert!(require_approver_scope(&boss, &owner(Some(4))).is_ok());
        assert!(require_approver_scope(&boss, &owner(Some(5))).is_err());
        assert!(require_approver_scope(&boss, &owner(None)).is_err());

        let ungrouped = actor(Role::Manager, None);
        assert!(require_approver_scope(&ungrouped, &owner(None)).is_err());

        let admin = actor(Role::Admin, None);
        assert!(require_approver_scope(&admin, &owner(Some(5))).is_ok());
    }

    #[test]
    fn only_editable_logs_are_selected_for_recompute() {
        for (affected, filter) in [
            (Affected::Date(NaiveDate::from_ymd_opt(2024, 5, 3).unwrap()), "a.work_date = ?"),
            (Affected::Group(2), "u.group_id = ?"),
            (Affected::RestTemplate(9), "u.rest_template_id = ?"),
            (Affected::User(7), "a.user_id = ?"),
        ] {
            let sql = editable_logs_sql(affected);
            assert!(sql.contains("a.status IN (?, ?)"), "{sql}");
            assert!(sql.contains(filter), "{sql}");
            assert!(sql.contains("FOR UPDATE"), "{sql}");
        }
        assert_eq!(AttendanceStatus::Draft.to_string(), "draft");
        assert_eq!(AttendanceStatus::Rejected.to_string(), "rejected");
    }
}
