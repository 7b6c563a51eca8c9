use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::context::{de_time, load_owner, now, require_approver_scope},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::overtime::{OVERTIME_COLUMNS, OvertimeRequest},
    rules::{
        clock::MonthKey,
        overtime::{OvertimeAction, OvertimeStatus, planned_span, transition},
    },
    utils::db_utils::{Paging, is_constraint_violation},
};

#[derive(Deserialize, ToSchema)]
pub struct CreateOvertime {
    #[schema(value_type = String, format = "date", example = "2024-05-01")]
    pub work_date: NaiveDate,
    /// Planned start, `HH:MM`.
    #[serde(deserialize_with = "de_time")]
    #[schema(value_type = String, example = "18:00")]
    pub start_time: NaiveTime,
    /// Planned end, `HH:MM`. Earlier than the start means after midnight.
    #[serde(deserialize_with = "de_time")]
    #[schema(value_type = String, example = "21:30")]
    pub end_time: NaiveTime,
    #[schema(example = "Month-end closing")]
    pub reason: String,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct DecisionNote {
    #[schema(example = "Approved, keep it under three hours")]
    pub note: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct OvertimeFilter {
    /// Filter by requesting user
    pub user_id: Option<u64>,
    /// pending, approved, rejected or cancelled
    pub status: Option<String>,
    /// Work month, `YYYY-MM`
    #[param(value_type = Option<String>, example = "2024-05")]
    pub month: Option<MonthKey>,
    /// 1-based page number
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct OvertimeListResponse {
    pub data: Vec<OvertimeRequest>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 10)]
    pub per_page: u32,
    #[schema(example = 1)]
    pub total: i64,
}

// Helper enum for typed SQLx binding
enum FilterValue<'a> {
    U64(u64),
    Str(&'a str),
    Date(NaiveDate),
}

async fn fetch_request(
    conn: &mut sqlx::MySqlConnection,
    id: u64,
    for_update: bool,
) -> Result<OvertimeRequest, AppError> {
    let sql = format!(
        "SELECT {OVERTIME_COLUMNS} FROM overtime_requests WHERE id = ?{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, OvertimeRequest>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Overtime request not found".to_string()))
}

/// Request overtime for a day
#[utoipa::path(
    post,
    path = "/api/overtime",
    request_body = CreateOvertime,
    responses(
        (status = 201, description = "Request created", body = OvertimeRequest),
        (status = 400, description = "Invalid window or missing reason"),
        (status = 409, description = "A request for that day already exists", body = Object, example = json!({
            "message": "An overtime request for 2024-05-01 already exists"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn create_overtime(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<CreateOvertime>,
) -> Result<HttpResponse, AppError> {
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("A reason is required".to_string()));
    }

    let span = planned_span(
        payload.work_date,
        payload.start_time,
        payload.end_time,
        config.day_change_hour,
    )?;

    let mut tx = pool.begin().await?;

    let existing: Option<(u64, String)> = sqlx::query_as(
        "SELECT id, status FROM overtime_requests WHERE user_id = ? AND work_date = ? FOR UPDATE",
    )
    .bind(auth.user_id)
    .bind(payload.work_date)
    .fetch_optional(&mut *tx)
    .await?;

    let conflict = || {
        AppError::Conflict(format!(
            "An overtime request for {} already exists",
            payload.work_date
        ))
    };

    let id = match existing {
        // a closed request may be replaced by a fresh one
        Some((id, status))
            if matches!(
                status.parse::<OvertimeStatus>(),
                Ok(OvertimeStatus::Rejected | OvertimeStatus::Cancelled)
            ) =>
        {
            sqlx::query(
                r#"
                UPDATE overtime_requests
                SET start_at = ?, end_at = ?, minutes = ?, reason = ?, status = ?,
                    decided_by = NULL, decided_at = NULL, decision_note = NULL
                WHERE id = ?
                "#,
            )
            .bind(span.start)
            .bind(span.end)
            .bind(span.minutes())
            .bind(reason)
            .bind(OvertimeStatus::Pending.as_ref())
            .bind(id)
            .execute(&mut *tx)
            .await?;
            id
        }
        Some(_) => return Err(conflict()),
        None => sqlx::query(
            r#"
            INSERT INTO overtime_requests (user_id, work_date, start_at, end_at, minutes, reason, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(auth.user_id)
        .bind(payload.work_date)
        .bind(span.start)
        .bind(span.end)
        .bind(span.minutes())
        .bind(reason)
        .bind(OvertimeStatus::Pending.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_constraint_violation(&e) {
                conflict()
            } else {
                AppError::Database(e)
            }
        })?
        .last_insert_id(),
    };

    let request = fetch_request(&mut tx, id, false).await?;
    tx.commit().await?;

    info!(
        overtime_id = id,
        user_id = auth.user_id,
        minutes = request.minutes,
        "Overtime requested"
    );
    Ok(HttpResponse::Created().json(request))
}

/// Overtime requests
#[utoipa::path(
    get,
    path = "/api/overtime",
    params(OvertimeFilter),
    responses(
        (status = 200, description = "Paginated overtime requests", body = OvertimeListResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn list_overtime(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<OvertimeFilter>,
) -> Result<HttpResponse, AppError> {
    let paging = Paging::new(query.page, query.per_page);

    let mut where_sql = String::from(" WHERE 1=1");
    let mut args: Vec<FilterValue> = Vec::new();

    // Visibility: admins see all, managers their group, others themselves
    if !auth.is_admin() {
        match (auth.is_manager(), auth.group_id) {
            (true, Some(group_id)) => {
                where_sql.push_str(" AND (o.user_id = ? OR u.group_id = ?)");
                args.push(FilterValue::U64(auth.user_id));
                args.push(FilterValue::U64(group_id));
            }
            _ => {
                where_sql.push_str(" AND o.user_id = ?");
                args.push(FilterValue::U64(auth.user_id));
            }
        }
    }

    if let Some(user_id) = query.user_id {
        where_sql.push_str(" AND o.user_id = ?");
        args.push(FilterValue::U64(user_id));
    }

    if let Some(status) = query.status.as_deref() {
        if status.parse::<OvertimeStatus>().is_err() {
            return Err(AppError::BadRequest(format!("Unknown status '{status}'")));
        }
        where_sql.push_str(" AND o.status = ?");
        args.push(FilterValue::Str(status));
    }

    if let Some(month) = query.month {
        where_sql.push_str(" AND o.work_date BETWEEN ? AND ?");
        args.push(FilterValue::Date(month.first_day()));
        args.push(FilterValue::Date(month.last_day()));
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM overtime_requests o JOIN users u ON u.id = o.user_id{where_sql}"
    );
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    for arg in &args {
        count_q = match arg {
            FilterValue::U64(v) => count_q.bind(*v),
            FilterValue::Str(s) => count_q.bind(*s),
            FilterValue::Date(d) => count_q.bind(*d),
        };
    }
    let total = count_q.fetch_one(pool.get_ref()).await?;

    let columns = OVERTIME_COLUMNS
        .split(", ")
        .map(|c| format!("o.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let data_sql = format!(
        r#"
        SELECT {columns}
        FROM overtime_requests o
        JOIN users u ON u.id = o.user_id
        {where_sql}
        ORDER BY o.work_date DESC, o.id DESC
        LIMIT ? OFFSET ?
        "#
    );

    let mut data_q = sqlx::query_as::<_, OvertimeRequest>(&data_sql);
    for arg in args {
        data_q = match arg {
            FilterValue::U64(v) => data_q.bind(v),
            FilterValue::Str(s) => data_q.bind(s),
            FilterValue::Date(d) => data_q.bind(d),
        };
    }
    let data = data_q
        .bind(paging.per_page)
        .bind(paging.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(OvertimeListResponse {
        data,
        page: paging.page_u32(),
        per_page: paging.per_page_u32(),
        total,
    }))
}

/// One overtime request
#[utoipa::path(
    get,
    path = "/api/overtime/{overtime_id}",
    params(("overtime_id" = u64, Path, description = "Overtime request id")),
    responses(
        (status = 200, description = "Overtime request", body = OvertimeRequest),
        (status = 403, description = "Not allowed to view this user"),
        (status = 404, description = "Overtime request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn get_overtime(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let request = fetch_request(&mut conn, path.into_inner(), false).await?;
    let owner = load_owner(&mut conn, request.user_id).await?;
    auth.require_view(owner.id, owner.group_id)?;
    Ok(HttpResponse::Ok().json(request))
}

async fn decide(
    auth: &AuthUser,
    pool: &MySqlPool,
    id: u64,
    action: OvertimeAction,
    note: Option<String>,
) -> Result<OvertimeRequest, AppError> {
    let mut tx = pool.begin().await?;
    let request = fetch_request(&mut tx, id, true).await?;

    if action != OvertimeAction::Cancel {
        let owner = load_owner(&mut tx, request.user_id).await?;
        require_approver_scope(auth, &owner)?;
    }

    let next = transition(request.status(), action, &auth.actor(), request.user_id)?;

    sqlx::query(
        r#"
        UPDATE overtime_requests
        SET status = ?, decided_by = ?, decided_at = ?, decision_note = ?
        WHERE id = ?
        "#,
    )
    .bind(next.as_ref())
    .bind(auth.user_id)
    .bind(now())
    .bind(note.as_deref().map(str::trim).filter(|n| !n.is_empty()))
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let request = fetch_request(&mut tx, id, false).await?;
    tx.commit().await?;

    info!(
        overtime_id = id,
        actor = auth.user_id,
        status = %next,
        "Overtime request decided"
    );
    Ok(request)
}

/// Approve an overtime request
#[utoipa::path(
    put,
    path = "/api/overtime/{overtime_id}/approve",
    params(("overtime_id" = u64, Path, description = "Overtime request id")),
    request_body = DecisionNote,
    responses(
        (status = 200, description = "Approved", body = OvertimeRequest),
        (status = 403, description = "Manager of the user's group only"),
        (status = 409, description = "Request is no longer pending")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn approve_overtime(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<DecisionNote>>,
) -> Result<HttpResponse, AppError> {
    let note = payload.and_then(|p| p.into_inner().note);
    let request = decide(&auth, &pool, path.into_inner(), OvertimeAction::Approve, note).await?;
    Ok(HttpResponse::Ok().json(request))
}

/// Reject an overtime request
#[utoipa::path(
    put,
    path = "/api/overtime/{overtime_id}/reject",
    params(("overtime_id" = u64, Path, description = "Overtime request id")),
    request_body = DecisionNote,
    responses(
        (status = 200, description = "Rejected", body = OvertimeRequest),
        (status = 403, description = "Manager of the user's group only"),
        (status = 409, description = "Request is no longer pending")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn reject_overtime(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<DecisionNote>>,
) -> Result<HttpResponse, AppError> {
    let note = payload.and_then(|p| p.into_inner().note);
    let request = decide(&auth, &pool, path.into_inner(), OvertimeAction::Reject, note).await?;
    Ok(HttpResponse::Ok().json(request))
}

/// Cancel an overtime request
#[utoipa::path(
    put,
    path = "/api/overtime/{overtime_id}/cancel",
    params(("overtime_id" = u64, Path, description = "Overtime request id")),
    responses(
        (status = 200, description = "Cancelled", body = OvertimeRequest),
        (status = 403, description = "Owner or admin only"),
        (status = 409, description = "Request can no longer be cancelled")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn cancel_overtime(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let request = decide(&auth, &pool, path.into_inner(), OvertimeAction::Cancel, None).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::role::Role, rules::approval::ApproveTier};
    use std::time::Duration;

    fn unreachable_pool() -> MySqlPool {
        sqlx::mysql::MySqlPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("mysql://nobody@127.0.0.1:1/none")
            .unwrap()
    }

    #[actix_web::test]
    async fn oversized_page_does_not_overflow() {
        let admin = AuthUser {
            user_id: 1,
            login_name: "root".to_string(),
            role: Role::Admin,
            tier: ApproveTier::Top,
            group_id: None,
        };
        let query = OvertimeFilter {
            user_id: None,
            status: None,
            month: None,
            page: Some(u64::MAX),
            per_page: Some(100),
        };
        // reaches the database instead of panicking on the offset
        let result = list_overtime(
            admin,
            web::Data::new(unreachable_pool()),
            web::Query(query),
        )
        .await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[actix_web::test]
    async fn unknown_status_is_rejected_before_querying() {
        let employee = AuthUser {
            user_id: 3,
            login_name: "emi".to_string(),
            role: Role::Employee,
            tier: ApproveTier::None,
            group_id: Some(2),
        };
        let query = OvertimeFilter {
            user_id: None,
            status: Some("maybe".to_string()),
            month: None,
            page: None,
            per_page: None,
        };
        let result = list_overtime(
            employee,
            web::Data::new(unreachable_pool()),
            web::Query(query),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
