use actix_web::{HttpResponse, web};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    api::context::{Affected, de_time, editable_logs, recompute_all},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::rest_time::{RestInterval, RestTimeTemplate},
    rules::worktime::{RestSlot, validate_rest_intervals},
    utils::db_utils::is_constraint_violation,
};

#[derive(Deserialize, ToSchema)]
pub struct IntervalInput {
    #[serde(deserialize_with = "de_time")]
    #[schema(value_type = String, example = "12:00")]
    pub start_time: NaiveTime,
    #[serde(deserialize_with = "de_time")]
    #[schema(value_type = String, example = "13:00")]
    pub end_time: NaiveTime,
}

#[derive(Deserialize, ToSchema)]
pub struct RestTemplateInput {
    #[schema(example = "Day shift")]
    pub name: String,
    pub intervals: Vec<IntervalInput>,
}

#[derive(Serialize, ToSchema)]
pub struct RestTemplateDetail {
    #[serde(flatten)]
    pub template: RestTimeTemplate,
    pub intervals: Vec<RestInterval>,
}

fn validate_input(input: &RestTemplateInput, day_change_hour: u32) -> Result<(), AppError> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("Template name is required".to_string()));
    }
    let slots: Vec<RestSlot> = input
        .intervals
        .iter()
        .map(|i| RestSlot {
            start: i.start_time,
            end: i.end_time,
        })
        .collect();
    validate_rest_intervals(&slots, day_change_hour)?;
    Ok(())
}

fn name_conflict(name: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |e| {
        if is_constraint_violation(&e) {
            AppError::Conflict(format!("Template '{name}' already exists"))
        } else {
            AppError::Database(e)
        }
    }
}

async fn load_detail(conn: &mut MySqlConnection, id: u64) -> Result<RestTemplateDetail, AppError> {
    let template = sqlx::query_as::<_, RestTimeTemplate>(
        "SELECT id, name, updated_at FROM rest_time_templates WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Rest template not found".to_string()))?;

    let intervals = sqlx::query_as::<_, RestInterval>(
        "SELECT template_id, start_time, end_time FROM rest_time_intervals WHERE template_id = ? ORDER BY start_time",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(RestTemplateDetail { template, intervals })
}

async fn replace_intervals(
    conn: &mut MySqlConnection,
    id: u64,
    intervals: &[IntervalInput],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM rest_time_intervals WHERE template_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    for i in intervals {
        sqlx::query(
            "INSERT INTO rest_time_intervals (template_id, start_time, end_time) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(i.start_time)
        .bind(i.end_time)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// All rest templates
#[utoipa::path(
    get,
    path = "/api/rest-templates",
    responses((status = 200, description = "Rest templates", body = [RestTimeTemplate])),
    security(("bearer_auth" = [])),
    tag = "Rest Time"
)]
pub async fn list_rest_templates(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    let templates = sqlx::query_as::<_, RestTimeTemplate>(
        "SELECT id, name, updated_at FROM rest_time_templates ORDER BY name",
    )
    .fetch_all(pool.get_ref())
    .await?;
    Ok(HttpResponse::Ok().json(templates))
}

/// One rest template with its intervals
#[utoipa::path(
    get,
    path = "/api/rest-templates/{template_id}",
    params(("template_id" = u64, Path, description = "Rest template id")),
    responses(
        (status = 200, description = "Rest template", body = RestTemplateDetail),
        (status = 404, description = "Rest template not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Rest Time"
)]
pub async fn get_rest_template(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let detail = load_detail(&mut conn, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// Create a rest template (admin)
#[utoipa::path(
    post,
    path = "/api/rest-templates",
    request_body = RestTemplateInput,
    responses(
        (status = 201, description = "Created", body = RestTemplateDetail),
        (status = 400, description = "Overlapping or empty intervals"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Name already in use")
    ),
    security(("bearer_auth" = [])),
    tag = "Rest Time"
)]
pub async fn create_rest_template(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<RestTemplateInput>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    validate_input(&payload, config.day_change_hour)?;

    let name = payload.name.trim();
    let mut tx = pool.begin().await?;
    let id = sqlx::query("INSERT INTO rest_time_templates (name) VALUES (?)")
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(name_conflict(name))?
        .last_insert_id();

    replace_intervals(&mut tx, id, &payload.intervals).await?;
    let detail = load_detail(&mut tx, id).await?;
    tx.commit().await?;

    info!(template_id = id, name, "Rest template created");
    Ok(HttpResponse::Created().json(detail))
}

/// Replace a rest template (admin)
#[utoipa::path(
    put,
    path = "/api/rest-templates/{template_id}",
    params(("template_id" = u64, Path, description = "Rest template id")),
    request_body = RestTemplateInput,
    responses(
        (status = 200, description = "Updated", body = RestTemplateDetail),
        (status = 400, description = "Overlapping or empty intervals"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Rest template not found"),
        (status = 409, description = "Name already in use")
    ),
    security(("bearer_auth" = [])),
    tag = "Rest Time"
)]
pub async fn update_rest_template(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<RestTemplateInput>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    validate_input(&payload, config.day_change_hour)?;

    let id = path.into_inner();
    let name = payload.name.trim();
    let mut tx = pool.begin().await?;

    let found: Option<(u64,)> =
        sqlx::query_as("SELECT id FROM rest_time_templates WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    if found.is_none() {
        return Err(AppError::NotFound("Rest template not found".to_string()));
    }

    // touch updated_at even when only the intervals change
    sqlx::query("UPDATE rest_time_templates SET name = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(name_conflict(name))?;

    replace_intervals(&mut tx, id, &payload.intervals).await?;
    let logs = editable_logs(&mut tx, Affected::RestTemplate(id)).await?;
    let refreshed = recompute_all(&mut tx, &config, &logs).await?;
    let detail = load_detail(&mut tx, id).await?;
    tx.commit().await?;

    info!(template_id = id, refreshed, "Rest template updated");
    Ok(HttpResponse::Ok().json(detail))
}

/// Delete a rest template (admin)
#[utoipa::path(
    delete,
    path = "/api/rest-templates/{template_id}",
    params(("template_id" = u64, Path, description = "Rest template id")),
    responses(
        (status = 200, description = "Deleted", body = Object, example = json!({
            "message": "Rest template deleted"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Rest template not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Rest Time"
)]
pub async fn delete_rest_template(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let id = path.into_inner();
    let mut tx = pool.begin().await?;

    // collected first: the delete clears the users' template reference
    let logs = editable_logs(&mut tx, Affected::RestTemplate(id)).await?;

    let result = sqlx::query("DELETE FROM rest_time_templates WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Rest template not found".to_string()));
    }

    let refreshed = recompute_all(&mut tx, &config, &logs).await?;
    tx.commit().await?;

    info!(template_id = id, refreshed, "Rest template deleted");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Rest template deleted"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, slots: &[(&str, &str)]) -> RestTemplateInput {
        let intervals = slots
            .iter()
            .map(|(s, e)| serde_json::json!({"start_time": s, "end_time": e}))
            .collect::<Vec<_>>();
        serde_json::from_value(serde_json::json!({"name": name, "intervals": intervals})).unwrap()
    }

    #[test]
    fn accepts_short_and_long_time_forms() {
        let i = input("Day", &[("12:00", "13:00:00")]);
        assert_eq!(i.intervals[0].start_time, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(i.intervals[0].end_time, NaiveTime::from_hms_opt(13, 0, 0).unwrap());
        assert!(validate_input(&i, 5).is_ok());
    }

    #[test]
    fn rejects_blank_names_and_overlaps() {
        assert!(validate_input(&input("  ", &[]), 5).is_err());
        let overlapping = input("Day", &[("12:00", "13:00"), ("12:30", "13:30")]);
        assert!(matches!(
            validate_input(&overlapping, 5),
            Err(AppError::Rule(_))
        ));
    }

    #[test]
    fn rejects_bad_time_strings() {
        let raw = serde_json::json!({
            "name": "Day",
            "intervals": [{"start_time": "noon", "end_time": "13:00"}]
        });
        assert!(serde_json::from_value::<RestTemplateInput>(raw).is_err());
    }
}
