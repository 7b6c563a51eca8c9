use actix_web::{HttpResponse, web};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::context::{Affected, editable_logs, load_calendar, recompute_all, today},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::holiday::Holiday,
    rules::clock::MonthKey,
    utils::db_utils::is_constraint_violation,
};

#[derive(Deserialize, IntoParams)]
pub struct YearQuery {
    /// Defaults to the current year
    pub year: Option<i32>,
}

#[derive(Deserialize, IntoParams)]
pub struct MonthQuery {
    #[param(value_type = Option<String>, example = "2024-05")]
    pub month: Option<MonthKey>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateHoliday {
    #[schema(value_type = String, format = "date", example = "2024-05-03")]
    pub holiday_date: NaiveDate,
    #[schema(example = "Constitution Memorial Day")]
    pub name: String,
    #[serde(default)]
    pub is_legal: bool,
}

#[derive(Serialize, ToSchema)]
pub struct LegalHolidayCount {
    #[schema(value_type = String, example = "2024-05")]
    pub month: MonthKey,
    pub legal_holidays: u32,
    pub workdays: u32,
}

/// Holidays of a year
#[utoipa::path(
    get,
    path = "/api/holidays",
    params(YearQuery),
    responses((status = 200, description = "Stored holidays", body = [Holiday])),
    security(("bearer_auth" = [])),
    tag = "Holidays"
)]
pub async fn list_holidays(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<YearQuery>,
) -> Result<HttpResponse, AppError> {
    let year = query.year.unwrap_or_else(|| today(&config).year());
    let (from, to) = NaiveDate::from_ymd_opt(year, 1, 1)
        .zip(NaiveDate::from_ymd_opt(year, 12, 31))
        .ok_or_else(|| AppError::BadRequest(format!("Invalid year {year}")))?;

    let holidays = sqlx::query_as::<_, Holiday>(
        "SELECT id, holiday_date, name, is_legal FROM holidays WHERE holiday_date BETWEEN ? AND ? ORDER BY holiday_date",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool.get_ref())
    .await?;
    Ok(HttpResponse::Ok().json(holidays))
}

/// Register a holiday (admin)
#[utoipa::path(
    post,
    path = "/api/holidays",
    request_body = CreateHoliday,
    responses(
        (status = 201, description = "Created", body = Holiday),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Date already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Holidays"
)]
pub async fn create_holiday(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<CreateHoliday>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Holiday name is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    let id = sqlx::query("INSERT INTO holidays (holiday_date, name, is_legal) VALUES (?, ?, ?)")
        .bind(payload.holiday_date)
        .bind(name)
        .bind(payload.is_legal)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_constraint_violation(&e) {
                AppError::Conflict(format!("{} is already a holiday", payload.holiday_date))
            } else {
                AppError::Database(e)
            }
        })?
        .last_insert_id();

    let logs = editable_logs(&mut tx, Affected::Date(payload.holiday_date)).await?;
    let refreshed = recompute_all(&mut tx, &config, &logs).await?;
    tx.commit().await?;

    info!(holiday_id = id, date = %payload.holiday_date, refreshed, "Holiday registered");
    Ok(HttpResponse::Created().json(Holiday {
        id,
        holiday_date: payload.holiday_date,
        name: name.to_string(),
        is_legal: payload.is_legal,
    }))
}

/// Remove a holiday (admin)
#[utoipa::path(
    delete,
    path = "/api/holidays/{holiday_id}",
    params(("holiday_id" = u64, Path, description = "Holiday id")),
    responses(
        (status = 200, description = "Deleted", body = Object, example = json!({
            "message": "Holiday deleted"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Holiday not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Holidays"
)]
pub async fn delete_holiday(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let holiday_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let date: NaiveDate =
        sqlx::query_scalar("SELECT holiday_date FROM holidays WHERE id = ? FOR UPDATE")
            .bind(holiday_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Holiday not found".to_string()))?;

    sqlx::query("DELETE FROM holidays WHERE id = ?")
        .bind(holiday_id)
        .execute(&mut *tx)
        .await?;

    let logs = editable_logs(&mut tx, Affected::Date(date)).await?;
    let refreshed = recompute_all(&mut tx, &config, &logs).await?;
    tx.commit().await?;

    info!(holiday_id, %date, refreshed, "Holiday deleted");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Holiday deleted"
    })))
}

/// Legal holidays and workdays of a month
#[utoipa::path(
    get,
    path = "/api/holidays/legal-count",
    params(MonthQuery),
    responses((status = 200, description = "Counts for the month", body = LegalHolidayCount)),
    security(("bearer_auth" = [])),
    tag = "Holidays"
)]
pub async fn legal_holiday_count(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<MonthQuery>,
) -> Result<HttpResponse, AppError> {
    let month = query.month.unwrap_or_else(|| MonthKey::of(today(&config)));
    let mut conn = pool.acquire().await?;
    let calendar = load_calendar(&mut conn, &config, month.first_day(), month.last_day()).await?;

    Ok(HttpResponse::Ok().json(LegalHolidayCount {
        month,
        legal_holidays: calendar.count_legal_holidays(month),
        workdays: calendar.count_workdays(month),
    }))
}
