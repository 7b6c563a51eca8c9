use actix_web::{HttpResponse, web};
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    api::context::{Affected, de_time, editable_logs, recompute_all},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::{
        group::Group,
        user::{USER_COLUMNS, User},
    },
    utils::db_utils::{build_update_sql, execute_update, is_constraint_violation},
};

const UPDATABLE: &[&str] = &["name", "approve_levels", "work_start", "work_end"];

const GROUP_COLUMNS: &str = "id, name, approve_levels, work_start, work_end";

#[derive(Deserialize)]
struct Wrap(#[serde(deserialize_with = "de_time")] NaiveTime);

fn de_opt_time<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
    Ok(Option::<Wrap>::deserialize(d)?.map(|Wrap(t)| t))
}

#[derive(Deserialize, ToSchema)]
pub struct CreateGroup {
    #[schema(example = "Logistics")]
    pub name: String,
    /// 1 to 3 approval stages; defaults to 1
    #[schema(example = 2)]
    pub approve_levels: Option<u8>,
    #[serde(default, deserialize_with = "de_opt_time")]
    #[schema(value_type = Option<String>, example = "09:00")]
    pub work_start: Option<NaiveTime>,
    #[serde(default, deserialize_with = "de_opt_time")]
    #[schema(value_type = Option<String>, example = "18:00")]
    pub work_end: Option<NaiveTime>,
}

fn check_levels(levels: u64) -> Result<(), AppError> {
    if (1..=3).contains(&levels) {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "approve_levels must be between 1 and 3".to_string(),
        ))
    }
}

fn check_schedule(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Result<(), AppError> {
    match (start, end) {
        (Some(s), Some(e)) if s == e => Err(AppError::BadRequest(
            "work_start and work_end must differ".to_string(),
        )),
        (Some(_), None) | (None, Some(_)) => Err(AppError::BadRequest(
            "work_start and work_end go together".to_string(),
        )),
        _ => Ok(()),
    }
}

/// The value `key` will have once `body` is applied.
fn merged_time(
    body: &Value,
    key: &str,
    current: Option<NaiveTime>,
) -> Result<Option<NaiveTime>, AppError> {
    match body.get(key) {
        None => Ok(current),
        Some(Value::Null) => Ok(None),
        Some(v) => Wrap::deserialize(v)
            .map(|Wrap(t)| Some(t))
            .map_err(|_| AppError::BadRequest(format!("{key} must be HH:MM"))),
    }
}

fn name_conflict(e: sqlx::Error) -> AppError {
    if is_constraint_violation(&e) {
        AppError::Conflict("Group name already in use".to_string())
    } else {
        AppError::Database(e)
    }
}

async fn fetch_group(pool: &MySqlPool, id: u64) -> Result<Group, AppError> {
    sqlx::query_as::<_, Group>(&format!("SELECT {GROUP_COLUMNS} FROM user_groups WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))
}

/// All groups
#[utoipa::path(
    get,
    path = "/api/groups",
    responses((status = 200, description = "Groups", body = [Group])),
    security(("bearer_auth" = [])),
    tag = "Groups"
)]
pub async fn list_groups(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    let groups =
        sqlx::query_as::<_, Group>(&format!("SELECT {GROUP_COLUMNS} FROM user_groups ORDER BY name"))
            .fetch_all(pool.get_ref())
            .await?;
    Ok(HttpResponse::Ok().json(groups))
}

/// One group
#[utoipa::path(
    get,
    path = "/api/groups/{group_id}",
    params(("group_id" = u64, Path, description = "Group id")),
    responses(
        (status = 200, description = "Group", body = Group),
        (status = 404, description = "Group not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Groups"
)]
pub async fn get_group(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let group = fetch_group(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(group))
}

/// Create a group (admin)
#[utoipa::path(
    post,
    path = "/api/groups",
    request_body = CreateGroup,
    responses(
        (status = 201, description = "Created", body = Group),
        (status = 400, description = "Invalid levels or schedule"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Name already in use")
    ),
    security(("bearer_auth" = [])),
    tag = "Groups"
)]
pub async fn create_group(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateGroup>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Group name is required".to_string()));
    }
    let levels = payload.approve_levels.unwrap_or(1);
    check_levels(levels.into())?;
    check_schedule(payload.work_start, payload.work_end)?;

    let id = sqlx::query(
        "INSERT INTO user_groups (name, approve_levels, work_start, work_end) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(levels)
    .bind(payload.work_start)
    .bind(payload.work_end)
    .execute(pool.get_ref())
    .await
    .map_err(name_conflict)?
    .last_insert_id();

    info!(group_id = id, name, "Group created");
    Ok(HttpResponse::Created().json(fetch_group(pool.get_ref(), id).await?))
}

/// Partially update a group (admin)
#[utoipa::path(
    put,
    path = "/api/groups/{group_id}",
    params(("group_id" = u64, Path, description = "Group id")),
    request_body(content = Object, description = "Any of name, approve_levels, work_start, work_end", example = json!({
        "approve_levels": 3
    })),
    responses(
        (status = 200, description = "Updated", body = Group),
        (status = 400, description = "Field cannot be updated"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Group not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Groups"
)]
pub async fn update_group(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let group_id = path.into_inner();

    if let Some(levels) = body.get("approve_levels") {
        check_levels(levels.as_u64().unwrap_or(0))?;
    }

    // validate the schedule as it will look after the update
    let current = fetch_group(pool.get_ref(), group_id).await?;
    let start = merged_time(&body, "work_start", current.work_start)?;
    let end = merged_time(&body, "work_end", current.work_end)?;
    check_schedule(start, end)?;

    let update = build_update_sql("user_groups", &body, UPDATABLE, "id", group_id)?;
    let mut tx = pool.begin().await?;
    let affected = execute_update(&mut tx, update)
        .await
        .map_err(name_conflict)?;
    if affected == 0 {
        return Err(AppError::NotFound("Group not found".to_string()));
    }

    let refreshed = if (start, end) != (current.work_start, current.work_end) {
        let logs = editable_logs(&mut tx, Affected::Group(group_id)).await?;
        recompute_all(&mut tx, &config, &logs).await?
    } else {
        0
    };
    tx.commit().await?;

    let group = fetch_group(pool.get_ref(), group_id).await?;

    // Logs already part-way through approval keep the stages they have.
    info!(group_id, actor = auth.user_id, refreshed, "Group updated");
    Ok(HttpResponse::Ok().json(group))
}

/// Delete a group (admin); members become ungrouped
#[utoipa::path(
    delete,
    path = "/api/groups/{group_id}",
    params(("group_id" = u64, Path, description = "Group id")),
    responses(
        (status = 200, description = "Deleted", body = Object, example = json!({
            "message": "Group deleted"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Group not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Groups"
)]
pub async fn delete_group(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let group_id = path.into_inner();
    let mut tx = pool.begin().await?;

    // members lose the group schedule once the delete nulls their group_id
    let logs = editable_logs(&mut tx, Affected::Group(group_id)).await?;

    let result = sqlx::query("DELETE FROM user_groups WHERE id = ?")
        .bind(group_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Group not found".to_string()));
    }

    let refreshed = recompute_all(&mut tx, &config, &logs).await?;
    tx.commit().await?;

    info!(group_id, actor = auth.user_id, refreshed, "Group deleted");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Group deleted"
    })))
}

/// Members of a group
#[utoipa::path(
    get,
    path = "/api/groups/{group_id}/members",
    params(("group_id" = u64, Path, description = "Group id")),
    responses(
        (status = 200, description = "Members", body = [User]),
        (status = 403, description = "Admins and the group's managers only")
    ),
    security(("bearer_auth" = [])),
    tag = "Groups"
)]
pub async fn group_members(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let group_id = path.into_inner();
    if !auth.is_admin() && !(auth.is_manager() && auth.group_id == Some(group_id)) {
        return Err(AppError::Forbidden(
            "Admins and the group's managers only".to_string(),
        ));
    }

    let members = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE group_id = ? ORDER BY name"
    ))
    .bind(group_id)
    .fetch_all(pool.get_ref())
    .await?;
    Ok(HttpResponse::Ok().json(members))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h, 0, 0)
    }

    #[test]
    fn levels_are_bounded() {
        assert!(check_levels(0).is_err());
        assert!(check_levels(1).is_ok());
        assert!(check_levels(3).is_ok());
        assert!(check_levels(4).is_err());
    }

    #[test]
    fn schedule_needs_both_ends() {
        assert!(check_schedule(None, None).is_ok());
        assert!(check_schedule(t(9), t(18)).is_ok());
        assert!(check_schedule(t(22), t(6)).is_ok());
        assert!(check_schedule(t(9), None).is_err());
        assert!(check_schedule(t(9), t(9)).is_err());
    }

    #[test]
    fn merges_schedule_updates() {
        let body = serde_json::json!({"work_end": "17:30"});
        assert_eq!(merged_time(&body, "work_start", t(9)).unwrap(), t(9));
        assert_eq!(
            merged_time(&body, "work_end", t(18)).unwrap(),
            NaiveTime::from_hms_opt(17, 30, 0)
        );
        let cleared = serde_json::json!({"work_start": null});
        assert_eq!(merged_time(&cleared, "work_start", t(9)).unwrap(), None);
        let bad = serde_json::json!({"work_start": "late"});
        assert!(merged_time(&bad, "work_start", t(9)).is_err());
    }

    #[test]
    fn parses_optional_times() {
        let g: CreateGroup =
            serde_json::from_value(serde_json::json!({"name": "Ops", "work_start": "09:00"}))
                .unwrap();
        assert_eq!(g.work_start, t(9));
        assert_eq!(g.work_end, None);

        let g: CreateGroup = serde_json::from_value(serde_json::json!({"name": "Ops"})).unwrap();
        assert_eq!(g.approve_levels, None);
        assert_eq!(g.work_start, None);
    }
}
