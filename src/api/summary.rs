use actix_web::{HttpResponse, web};
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::IntoParams;

use crate::{
    api::context::{load_calendar, load_owner, today},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::attendance::{AttendanceLog, attendance_columns},
    rules::{
        clock::MonthKey,
        summary::{DayRecord, summarize},
    },
};

#[derive(Deserialize, IntoParams)]
pub struct SummaryQuery {
    #[param(value_type = Option<String>, example = "2024-05")]
    pub month: Option<MonthKey>,
    pub user_id: Option<u64>,
}

impl From<&AttendanceLog> for DayRecord {
    fn from(log: &AttendanceLog) -> Self {
        DayRecord {
            date: log.work_date,
            has_in: log.edited_in_at.or(log.in_at).is_some(),
            has_out: log.edited_out_at.or(log.out_at).is_some(),
            work: log.day_work(),
            status: log.status(),
        }
    }
}

/// Monthly totals for one user
#[utoipa::path(
    get,
    path = "/api/summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Monthly summary", body = crate::rules::summary::MonthlySummary),
        (status = 403, description = "Not allowed to view this user"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Summary"
)]
pub async fn monthly_summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<SummaryQuery>,
) -> Result<HttpResponse, AppError> {
    let today = today(&config);
    let month = query.month.unwrap_or_else(|| MonthKey::of(today));
    let user_id = query.user_id.unwrap_or(auth.user_id);

    let mut conn = pool.acquire().await?;
    let owner = load_owner(&mut conn, user_id).await?;
    auth.require_view(owner.id, owner.group_id)?;

    let logs = sqlx::query_as::<_, AttendanceLog>(&format!(
        "SELECT {} FROM attendance_logs WHERE user_id = ? AND work_date BETWEEN ? AND ?",
        attendance_columns(None)
    ))
    .bind(user_id)
    .bind(month.first_day())
    .bind(month.last_day())
    .fetch_all(&mut *conn)
    .await?;

    let calendar = load_calendar(&mut conn, &config, month.first_day(), month.last_day()).await?;
    let records: Vec<DayRecord> = logs.iter().map(DayRecord::from).collect();
    let summary = summarize(month, &records, &calendar, today);

    debug!(user_id, %month, days = records.len(), "Summary computed");
    Ok(HttpResponse::Ok().json(summary))
}
