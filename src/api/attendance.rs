use actix_web::{HttpResponse, web};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::context::{
        load_log, load_owner, load_timecards, now, recompute, reconcile_log,
        require_approver_scope, today,
    },
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::{
        attendance::{AttendanceLog, attendance_columns},
        timecard::{PunchSource, Timecard},
    },
    rules::{
        RuleError,
        approval::{ApprovalAction, awaiting, is_editable, transition},
        clock::{MonthKey, business_date},
        overtime::{OvertimeStatus, unapproved_minutes},
        reconcile::{Reconciled, reconcile},
    },
};

#[derive(Deserialize, IntoParams)]
pub struct AttendanceQuery {
    /// Month to list, `YYYY-MM`. Defaults to the current month.
    #[param(value_type = Option<String>, example = "2024-05")]
    pub month: Option<MonthKey>,
    /// Whose attendance to list. Defaults to the caller.
    pub user_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct AttendanceDetail {
    pub log: AttendanceLog,
    pub effective: Reconciled,
    pub timecards: Vec<Timecard>,
}

#[derive(Deserialize, ToSchema)]
pub struct EditAttendance {
    /// Replaces the hand-edited clock-in; omit to fall back to the punch.
    #[schema(value_type = Option<String>, example = "2024-05-01T08:30:00")]
    pub edited_in_at: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, example = "2024-05-01T19:00:00")]
    pub edited_out_at: Option<NaiveDateTime>,
    #[schema(example = "Forgot to punch in, started with the morning delivery")]
    pub edit_reason: Option<String>,
    pub remark: Option<String>,
    /// Version the client last saw.
    #[schema(example = 3)]
    pub version: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct VersionedAction {
    #[schema(example = 3)]
    pub version: u32,
}

#[derive(Serialize, FromRow, ToSchema)]
pub struct PendingAttendance {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub log: AttendanceLog,
    pub user_name: String,
    #[serde(skip)]
    pub approve_levels: Option<u8>,
}

fn check_version(log: &AttendanceLog, version: u32) -> Result<(), AppError> {
    if log.version != version {
        return Err(AppError::Conflict(format!(
            "Attendance was modified (version {} != {})",
            log.version, version
        )));
    }
    Ok(())
}

fn require_editable(log: &AttendanceLog) -> Result<(), AppError> {
    if !is_editable(log.status()) {
        return Err(AppError::Conflict(format!(
            "Attendance is {} and can no longer be changed",
            log.status()
        )));
    }
    Ok(())
}

/// Edited times must fall on the work date or the night after it.
fn check_edit_window(log: &AttendanceLog, t: NaiveDateTime) -> Result<(), AppError> {
    let from = log.work_date;
    let to = from + Duration::days(1);
    if t.date() < from || t.date() > to {
        return Err(AppError::BadRequest(format!(
            "{t} does not belong to {}",
            log.work_date
        )));
    }
    Ok(())
}

/// Managers decide only for their own group; admins for everyone.
/// Clock in
#[utoipa::path(
    post,
    path = "/api/attendance/clock-in",
    responses(
        (status = 200, description = "Clocked in", body = AttendanceLog),
        (status = 400, description = "Already clocked in", body = Object, example = json!({
            "message": "Already clocked in"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Attendance already submitted or approved")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn clock_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let at = now();
    let work_date = business_date(at, config.day_change_hour);

    let mut tx = pool.begin().await?;

    let open: Option<(u64,)> = sqlx::query_as(
        r#"
        SELECT id FROM timecards
        WHERE user_id = ? AND punched_out_at IS NULL AND punched_in_at >= ?
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(auth.user_id)
    .bind(at - Duration::hours(24))
    .fetch_optional(&mut *tx)
    .await?;

    if open.is_some() {
        return Err(AppError::BadRequest("Already clocked in".to_string()));
    }

    // find-or-create; the no-op update keeps the existing row untouched
    sqlx::query(
        r#"
        INSERT INTO attendance_logs (user_id, work_date)
        VALUES (?, ?)
        ON DUPLICATE KEY UPDATE id = id
        "#,
    )
    .bind(auth.user_id)
    .bind(work_date)
    .execute(&mut *tx)
    .await?;

    let log = sqlx::query_as::<_, AttendanceLog>(&format!(
        "SELECT {} FROM attendance_logs WHERE user_id = ? AND work_date = ? FOR UPDATE",
        attendance_columns(None)
    ))
    .bind(auth.user_id)
    .bind(work_date)
    .fetch_one(&mut *tx)
    .await?;

    require_editable(&log)?;

    sqlx::query(
        "INSERT INTO timecards (attendance_id, user_id, punched_in_at, source) VALUES (?, ?, ?, ?)",
    )
    .bind(log.id)
    .bind(auth.user_id)
    .bind(at)
    .bind(PunchSource::Clock.as_ref())
    .execute(&mut *tx)
    .await?;

    let log = recompute(&mut tx, &config, log.id).await?;
    tx.commit().await?;

    info!(user_id = auth.user_id, %work_date, "Clocked in");
    Ok(HttpResponse::Ok().json(log))
}

/// Clock out
#[utoipa::path(
    post,
    path = "/api/attendance/clock-out",
    responses(
        (status = 200, description = "Clocked out", body = AttendanceLog),
        (status = 400, description = "No open clock-in", body = Object, example = json!({
            "message": "No active clock-in found"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Attendance already submitted or approved")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn clock_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let at = now();
    let mut tx = pool.begin().await?;

    // The open punch may belong to yesterday's business day (night shift)
    let open: Option<(u64, u64, NaiveDateTime)> = sqlx::query_as(
        r#"
        SELECT id, attendance_id, punched_in_at FROM timecards
        WHERE user_id = ? AND punched_out_at IS NULL AND punched_in_at IS NOT NULL
        ORDER BY punched_in_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((timecard_id, attendance_id, punched_in_at)) = open else {
        return Err(AppError::BadRequest("No active clock-in found".to_string()));
    };

    if at - punched_in_at > Duration::hours(24) {
        return Err(AppError::BadRequest(
            "Open clock-in is older than 24 hours, correct it by hand".to_string(),
        ));
    }

    let log = load_log(&mut tx, attendance_id, true).await?;
    require_editable(&log)?;

    sqlx::query("UPDATE timecards SET punched_out_at = ? WHERE id = ?")
        .bind(at)
        .bind(timecard_id)
        .execute(&mut *tx)
        .await?;

    let log = recompute(&mut tx, &config, attendance_id).await?;
    tx.commit().await?;

    info!(
        user_id = auth.user_id,
        work_date = %log.work_date,
        crosses_day = log.crosses_day,
        "Clocked out"
    );
    Ok(HttpResponse::Ok().json(log))
}

/// List a month of attendance
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceQuery),
    responses(
        (status = 200, description = "Attendance logs of the month", body = [AttendanceLog]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not allowed to view this user")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<AttendanceQuery>,
) -> Result<HttpResponse, AppError> {
    let month = query.month.unwrap_or_else(|| MonthKey::of(today(&config)));
    let user_id = query.user_id.unwrap_or(auth.user_id);

    let mut conn = pool.acquire().await?;
    let owner = load_owner(&mut conn, user_id).await?;
    auth.require_view(owner.id, owner.group_id)?;

    let logs = sqlx::query_as::<_, AttendanceLog>(&format!(
        r#"
        SELECT {} FROM attendance_logs
        WHERE user_id = ? AND work_date BETWEEN ? AND ?
        ORDER BY work_date
        "#,
        attendance_columns(None)
    ))
    .bind(user_id)
    .bind(month.first_day())
    .bind(month.last_day())
    .fetch_all(&mut *conn)
    .await?;

    debug!(user_id, %month, count = logs.len(), "Listed attendance");
    Ok(HttpResponse::Ok().json(logs))
}

/// Attendance awaiting the caller's approval
#[utoipa::path(
    get,
    path = "/api/attendance/pending",
    responses(
        (status = 200, description = "Approval inbox", body = [PendingAttendance]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Manager/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn pending_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    auth.require_manager_or_admin()?;

    let mut sql = format!(
        r#"
        SELECT {}, u.name AS user_name, g.approve_levels
        FROM attendance_logs a
        JOIN users u ON u.id = a.user_id
        LEFT JOIN user_groups g ON g.id = u.group_id
        WHERE a.status = 'submitted' AND a.user_id <> ?
        "#,
        attendance_columns(Some("a"))
    );
    if !auth.is_admin() {
        sql.push_str(" AND u.group_id = ?");
    }
    sql.push_str(" ORDER BY a.work_date, a.id");

    let mut q = sqlx::query_as::<_, PendingAttendance>(&sql).bind(auth.user_id);
    if !auth.is_admin() {
        q = q.bind(auth.group_id);
    }
    let rows = q.fetch_all(pool.get_ref()).await?;

    let inbox: Vec<PendingAttendance> = rows
        .into_iter()
        .filter(|r| {
            auth.is_admin()
                || awaiting(
                    auth.tier,
                    &r.log.approval_state(r.approve_levels.unwrap_or(1)),
                )
        })
        .collect();

    Ok(HttpResponse::Ok().json(inbox))
}

/// One attendance log with its punches
#[utoipa::path(
    get,
    path = "/api/attendance/{attendance_id}",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    responses(
        (status = 200, description = "Attendance detail", body = AttendanceDetail),
        (status = 403, description = "Not allowed to view this user"),
        (status = 404, description = "Attendance not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn get_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let log = load_log(&mut conn, path.into_inner(), false).await?;
    let owner = load_owner(&mut conn, log.user_id).await?;
    auth.require_view(owner.id, owner.group_id)?;

    let timecards = load_timecards(&mut conn, log.id).await?;
    let effective = reconcile_log(&log, &timecards, &config);

    Ok(HttpResponse::Ok().json(AttendanceDetail {
        log,
        effective,
        timecards,
    }))
}

/// Edit clock times of a day
#[utoipa::path(
    put,
    path = "/api/attendance/{attendance_id}",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = EditAttendance,
    responses(
        (status = 200, description = "Updated attendance", body = AttendanceLog),
        (status = 400, description = "Reason missing or times invalid"),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Stale version or attendance locked")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn edit_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<EditAttendance>,
) -> Result<HttpResponse, AppError> {
    let mut tx = pool.begin().await?;
    let log = load_log(&mut tx, path.into_inner(), true).await?;

    if log.user_id != auth.user_id {
        return Err(AppError::Forbidden(
            "Only the owner can edit attendance".to_string(),
        ));
    }
    require_editable(&log)?;
    check_version(&log, payload.version)?;

    for t in [payload.edited_in_at, payload.edited_out_at].into_iter().flatten() {
        check_edit_window(&log, t)?;
    }

    let reason = payload
        .edit_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let timecards = load_timecards(&mut tx, log.id).await?;
    let actual = reconcile_log(
        &AttendanceLog {
            edited_in_at: None,
            edited_out_at: None,
            ..log.clone()
        },
        &timecards,
        &config,
    );
    let edited = reconcile(
        actual.in_at,
        actual.out_at,
        payload.edited_in_at,
        payload.edited_out_at,
        config.edit_tolerance_min,
    );
    if edited.needs_reason && reason.is_none() {
        return Err(RuleError::ReasonRequired.into());
    }

    sqlx::query(
        r#"
        UPDATE attendance_logs
        SET edited_in_at = ?, edited_out_at = ?, edit_reason = ?, remark = ?
        WHERE id = ?
        "#,
    )
    .bind(payload.edited_in_at)
    .bind(payload.edited_out_at)
    .bind(reason)
    .bind(payload.remark.as_deref())
    .bind(log.id)
    .execute(&mut *tx)
    .await?;

    let log = recompute(&mut tx, &config, log.id).await?;
    tx.commit().await?;

    info!(attendance_id = log.id, user_id = auth.user_id, "Attendance edited");
    Ok(HttpResponse::Ok().json(log))
}

/// Runs one approval transition under a row lock.
async fn apply_transition(
    auth: &AuthUser,
    pool: &MySqlPool,
    config: &Config,
    attendance_id: u64,
    version: u32,
    action: ApprovalAction,
) -> Result<AttendanceLog, AppError> {
    let mut tx = pool.begin().await?;
    let log = load_log(&mut tx, attendance_id, true).await?;
    check_version(&log, version)?;

    let owner = load_owner(&mut tx, log.user_id).await?;
    if matches!(action, ApprovalAction::Approve | ApprovalAction::Reject) {
        require_approver_scope(auth, &owner)?;
    }

    if action == ApprovalAction::Submit {
        let timecards = load_timecards(&mut tx, log.id).await?;
        let effective = reconcile_log(&log, &timecards, config);
        if effective.in_at.is_none() || effective.out_at.is_none() {
            return Err(RuleError::IncompletePunches.into());
        }
        if effective.needs_reason && log.edit_reason.as_deref().is_none_or(|r| r.trim().is_empty())
        {
            return Err(RuleError::ReasonRequired.into());
        }

        let approved: Option<(i64,)> = sqlx::query_as(
            "SELECT minutes FROM overtime_requests WHERE user_id = ? AND work_date = ? AND status = ?",
        )
        .bind(log.user_id)
        .bind(log.work_date)
        .bind(OvertimeStatus::Approved.as_ref())
        .fetch_optional(&mut *tx)
        .await?;
        let uncovered = unapproved_minutes(
            log.overtime_minutes,
            approved.map_or(0, |(m,)| m),
            config.overtime_tolerance_min,
        );
        if uncovered > 0 {
            return Err(RuleError::UnapprovedOvertime(uncovered).into());
        }
    }

    let next = transition(
        log.approval_state(owner.required_levels()),
        action,
        &auth.actor(),
        log.user_id,
    )?;

    let approved_by = match action {
        ApprovalAction::Approve => Some(auth.user_id),
        ApprovalAction::Reject => log.approved_by,
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE attendance_logs
        SET status = ?, approved_level = ?, approved_by = ?, version = version + 1
        WHERE id = ?
        "#,
    )
    .bind(next.status.as_ref())
    .bind(next.approved_level)
    .bind(approved_by)
    .bind(log.id)
    .execute(&mut *tx)
    .await?;

    let log = load_log(&mut tx, log.id, false).await?;
    tx.commit().await?;

    info!(
        attendance_id = log.id,
        actor = auth.user_id,
        action = action.as_ref(),
        status = %log.status,
        level = log.approved_level,
        "Attendance status changed"
    );
    Ok(log)
}

async fn transition_response(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    attendance_id: u64,
    payload: VersionedAction,
    action: ApprovalAction,
) -> Result<HttpResponse, AppError> {
    let log = apply_transition(&auth, &pool, &config, attendance_id, payload.version, action).await?;
    Ok(HttpResponse::Ok().json(log))
}

/// Submit a day for approval
#[utoipa::path(
    post,
    path = "/api/attendance/{attendance_id}/submit",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = VersionedAction,
    responses(
        (status = 200, description = "Submitted", body = AttendanceLog),
        (status = 400, description = "Punches incomplete, reason missing or overtime not approved", body = Object, example = json!({
            "message": "Both clock-in and clock-out are required"
        })),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Illegal transition or stale version")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn submit_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<VersionedAction>,
) -> Result<HttpResponse, AppError> {
    transition_response(auth, pool, config, path.into_inner(), payload.into_inner(), ApprovalAction::Submit).await
}

/// Withdraw a submission
#[utoipa::path(
    post,
    path = "/api/attendance/{attendance_id}/withdraw",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = VersionedAction,
    responses(
        (status = 200, description = "Back to draft", body = AttendanceLog),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Illegal transition or stale version")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn withdraw_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<VersionedAction>,
) -> Result<HttpResponse, AppError> {
    transition_response(auth, pool, config, path.into_inner(), payload.into_inner(), ApprovalAction::Withdraw).await
}

/// Approve the next stage of a submission
#[utoipa::path(
    post,
    path = "/api/attendance/{attendance_id}/approve",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = VersionedAction,
    responses(
        (status = 200, description = "Stage approved", body = AttendanceLog),
        (status = 403, description = "Tier too low, outside group or own attendance"),
        (status = 409, description = "Illegal transition or stale version")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn approve_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<VersionedAction>,
) -> Result<HttpResponse, AppError> {
    transition_response(auth, pool, config, path.into_inner(), payload.into_inner(), ApprovalAction::Approve).await
}

/// Reject a submission
#[utoipa::path(
    post,
    path = "/api/attendance/{attendance_id}/reject",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = VersionedAction,
    responses(
        (status = 200, description = "Rejected", body = AttendanceLog),
        (status = 403, description = "Tier too low, outside group or own attendance"),
        (status = 409, description = "Illegal transition or stale version")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn reject_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<VersionedAction>,
) -> Result<HttpResponse, AppError> {
    transition_response(auth, pool, config, path.into_inner(), payload.into_inner(), ApprovalAction::Reject).await
}

/// Reopen an approved day (admin)
#[utoipa::path(
    post,
    path = "/api/attendance/{attendance_id}/reopen",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = VersionedAction,
    responses(
        (status = 200, description = "Back to draft", body = AttendanceLog),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Illegal transition or stale version")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn reopen_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<VersionedAction>,
) -> Result<HttpResponse, AppError> {
    transition_response(auth, pool, config, path.into_inner(), payload.into_inner(), ApprovalAction::Reopen).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(version: u32, status: &str) -> AttendanceLog {
        AttendanceLog {
            id: 1,
            user_id: 7,
            work_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            in_at: None,
            out_at: None,
            edited_in_at: None,
            edited_out_at: None,
            edit_reason: None,
            remark: None,
            work_type: None,
            work_minutes: 0,
            rest_minutes: 0,
            overtime_minutes: 0,
            late_night_minutes: 0,
            holiday_minutes: 0,
            is_late: false,
            is_early_leave: false,
            crosses_day: false,
            status: status.to_string(),
            approved_level: 0,
            approved_by: None,
            version,
        }
    }

    #[test]
    fn stale_version_is_a_conflict() {
        assert!(check_version(&log(3, "draft"), 3).is_ok());
        assert!(matches!(
            check_version(&log(3, "draft"), 2),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn submitted_logs_are_locked() {
        assert!(require_editable(&log(1, "draft")).is_ok());
        assert!(require_editable(&log(1, "rejected")).is_ok());
        assert!(require_editable(&log(1, "submitted")).is_err());
        assert!(require_editable(&log(1, "approved")).is_err());
    }

    #[test]
    fn edits_must_fall_near_the_work_date() {
        let l = log(1, "draft");
        let d = l.work_date;
        assert!(check_edit_window(&l, d.and_hms_opt(9, 0, 0).unwrap()).is_ok());
        assert!(check_edit_window(&l, d.succ_opt().unwrap().and_hms_opt(3, 0, 0).unwrap()).is_ok());
        assert!(check_edit_window(&l, d.pred_opt().unwrap().and_hms_opt(23, 0, 0).unwrap()).is_err());
    }
}
