use actix_web::{HttpResponse, web};
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    api::context::{load_log, load_owner, load_timecards, recompute},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::timecard::{PunchSource, Timecard},
    rules::{approval::is_editable, clock::business_date},
};

#[derive(Deserialize, ToSchema)]
pub struct ManualPunch {
    #[schema(value_type = Option<String>, example = "2024-05-01T09:00:00")]
    pub punched_in_at: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, example = "2024-05-01T18:00:00")]
    pub punched_out_at: Option<NaiveDateTime>,
}

/// Only the owner adds or removes punches, admins included.
fn require_owner(auth: &AuthUser, owner_id: u64) -> Result<(), AppError> {
    if auth.user_id == owner_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the owner can change punches".to_string(),
        ))
    }
}

fn validate_manual(
    punch: &ManualPunch,
    work_date: chrono::NaiveDate,
    day_change_hour: u32,
) -> Result<(), AppError> {
    match (punch.punched_in_at, punch.punched_out_at) {
        (None, None) => Err(AppError::BadRequest(
            "Either punched_in_at or punched_out_at is required".to_string(),
        )),
        (Some(i), Some(o)) if o <= i => Err(AppError::BadRequest(
            "punched_out_at must be after punched_in_at".to_string(),
        )),
        (Some(i), Some(o)) if o - i > Duration::hours(24) => Err(AppError::BadRequest(
            "A punch pair cannot span more than 24 hours".to_string(),
        )),
        (Some(i), _) if business_date(i, day_change_hour) != work_date => Err(
            AppError::BadRequest(format!("Clock-in does not fall on {work_date}")),
        ),
        (None, Some(o)) if business_date(o, day_change_hour) != work_date => Err(
            AppError::BadRequest(format!("Clock-out does not fall on {work_date}")),
        ),
        _ => Ok(()),
    }
}

/// Punches of one attendance log
#[utoipa::path(
    get,
    path = "/api/attendance/{attendance_id}/timecards",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    responses(
        (status = 200, description = "Punches in time order", body = [Timecard]),
        (status = 403, description = "Not allowed to view this user"),
        (status = 404, description = "Attendance not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Timecard"
)]
pub async fn list_timecards(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let log = load_log(&mut conn, path.into_inner(), false).await?;
    let owner = load_owner(&mut conn, log.user_id).await?;
    auth.require_view(owner.id, owner.group_id)?;

    let timecards = load_timecards(&mut conn, log.id).await?;
    Ok(HttpResponse::Ok().json(timecards))
}

/// Add a punch by hand
#[utoipa::path(
    post,
    path = "/api/attendance/{attendance_id}/timecards",
    params(("attendance_id" = u64, Path, description = "Attendance log id")),
    request_body = ManualPunch,
    responses(
        (status = 201, description = "Punch added, recomputed log returned", body = crate::model::attendance::AttendanceLog),
        (status = 400, description = "Punch outside the work date"),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Attendance locked")
    ),
    security(("bearer_auth" = [])),
    tag = "Timecard"
)]
pub async fn add_timecard(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<ManualPunch>,
) -> Result<HttpResponse, AppError> {
    let mut tx = pool.begin().await?;
    let log = load_log(&mut tx, path.into_inner(), true).await?;

    require_owner(&auth, log.user_id)?;
    if !is_editable(log.status()) {
        return Err(AppError::Conflict(format!(
            "Attendance is {} and can no longer be changed",
            log.status()
        )));
    }
    validate_manual(&payload, log.work_date, config.day_change_hour)?;

    sqlx::query(
        r#"
        INSERT INTO timecards (attendance_id, user_id, punched_in_at, punched_out_at, source)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(log.id)
    .bind(log.user_id)
    .bind(payload.punched_in_at)
    .bind(payload.punched_out_at)
    .bind(PunchSource::Manual.as_ref())
    .execute(&mut *tx)
    .await?;

    let log = recompute(&mut tx, &config, log.id).await?;
    tx.commit().await?;

    info!(attendance_id = log.id, actor = auth.user_id, "Manual punch added");
    Ok(HttpResponse::Created().json(log))
}

/// Remove a hand-entered punch
#[utoipa::path(
    delete,
    path = "/api/timecards/{timecard_id}",
    params(("timecard_id" = u64, Path, description = "Timecard id")),
    responses(
        (status = 200, description = "Punch removed, recomputed log returned", body = crate::model::attendance::AttendanceLog),
        (status = 400, description = "Clock punches cannot be deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Timecard not found"),
        (status = 409, description = "Attendance locked")
    ),
    security(("bearer_auth" = [])),
    tag = "Timecard"
)]
pub async fn delete_timecard(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let timecard_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let card = sqlx::query_as::<_, Timecard>(
        r#"
        SELECT id, attendance_id, user_id, punched_in_at, punched_out_at, source, created_at
        FROM timecards WHERE id = ?
        FOR UPDATE
        "#,
    )
    .bind(timecard_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Timecard not found".to_string()))?;

    require_owner(&auth, card.user_id)?;
    if card.source != PunchSource::Manual.as_ref() {
        return Err(AppError::BadRequest(
            "Only manually entered punches can be deleted".to_string(),
        ));
    }

    let log = load_log(&mut tx, card.attendance_id, true).await?;
    if !is_editable(log.status()) {
        return Err(AppError::Conflict(format!(
            "Attendance is {} and can no longer be changed",
            log.status()
        )));
    }

    sqlx::query("DELETE FROM timecards WHERE id = ?")
        .bind(timecard_id)
        .execute(&mut *tx)
        .await?;

    let log = recompute(&mut tx, &config, log.id).await?;
    tx.commit().await?;

    info!(timecard_id, actor = auth.user_id, "Manual punch deleted");
    Ok(HttpResponse::Ok().json(log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::role::Role, rules::approval::ApproveTier};

    fn actor(user_id: u64, role: Role) -> AuthUser {
        AuthUser {
            user_id,
            login_name: format!("user{user_id}"),
            role,
            tier: ApproveTier::None,
            group_id: Some(1),
        }
    }

    #[test]
    fn only_the_owner_changes_punches() {
        assert!(require_owner(&actor(7, Role::Employee), 7).is_ok());
        assert!(matches!(
            require_owner(&actor(8, Role::Employee), 7),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            require_owner(&actor(1, Role::Admin), 7),
            Err(AppError::Forbidden(_))
        ));
    }
    use chrono::NaiveDate;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn at(day: u32, h: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, 0, 0)
    }

    #[test]
    fn accepts_pairs_and_single_sides() {
        let p = ManualPunch {
            punched_in_at: at(1, 9),
            punched_out_at: at(1, 18),
        };
        assert!(validate_manual(&p, d(), 5).is_ok());

        let p = ManualPunch {
            punched_in_at: None,
            punched_out_at: at(2, 3),
        };
        assert!(validate_manual(&p, d(), 5).is_ok());
    }

    #[test]
    fn rejects_empty_reversed_and_foreign_punches() {
        let empty = ManualPunch {
            punched_in_at: None,
            punched_out_at: None,
        };
        assert!(validate_manual(&empty, d(), 5).is_err());

        let reversed = ManualPunch {
            punched_in_at: at(1, 18),
            punched_out_at: at(1, 9),
        };
        assert!(validate_manual(&reversed, d(), 5).is_err());

        let other_day = ManualPunch {
            punched_in_at: at(2, 9),
            punched_out_at: None,
        };
        assert!(validate_manual(&other_day, d(), 5).is_err());
    }
}
