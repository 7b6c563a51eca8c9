use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::context::{Affected, editable_logs, recompute_all},
    auth::{
        auth::AuthUser,
        password::{hash_password, verify_password},
    },
    config::Config,
    error::AppError,
    model::{
        role::Role,
        user::{USER_COLUMNS, User},
    },
    rules::approval::ApproveTier,
    utils::{
        db_utils::{Paging, build_update_sql, execute_update, is_constraint_violation},
        login_cache, login_filter,
    },
};

/// Columns an admin may change through `PUT /users/{id}`.
const UPDATABLE: &[&str] = &[
    "name",
    "email",
    "role_id",
    "approve_tier",
    "group_id",
    "rest_template_id",
    "is_active",
];

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "aiko")]
    pub login_name: String,
    #[schema(example = "correct horse battery staple")]
    pub password: String,
    #[schema(example = "Aiko Tanaka")]
    pub name: String,
    #[schema(example = "aiko@example.com", format = "email")]
    pub email: String,
    /// 1 admin, 2 manager, 3 employee, 4 system
    #[schema(example = 3)]
    pub role_id: Option<u8>,
    /// 0 none, 1 middle, 2 better, 3 top
    #[schema(example = 0)]
    pub approve_tier: Option<u8>,
    pub group_id: Option<u64>,
    pub rest_template_id: Option<u64>,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePassword {
    /// Required unless an admin resets someone else's password.
    pub current_password: Option<String>,
    #[schema(example = "another long passphrase")]
    pub new_password: String,
}

#[derive(Deserialize, IntoParams)]
pub struct UserFilter {
    pub group_id: Option<u64>,
    /// Matches login name, name or email
    pub q: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub data: Vec<User>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 10)]
    pub per_page: u32,
    #[schema(example = 1)]
    pub total: i64,
}

// Helper enum for typed SQLx binding
enum FilterValue {
    U64(u64),
    Str(String),
}

const MIN_PASSWORD_LEN: usize = 8;

fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn check_role_and_tier(role_id: Option<u64>, tier: Option<u64>) -> Result<(), AppError> {
    if let Some(id) = role_id {
        if u8::try_from(id).ok().and_then(Role::from_id).is_none() {
            return Err(AppError::BadRequest(format!("Unknown role_id {id}")));
        }
    }
    if let Some(level) = tier {
        if u8::try_from(level).ok().and_then(ApproveTier::from_level).is_none() {
            return Err(AppError::BadRequest(format!("Unknown approve_tier {level}")));
        }
    }
    Ok(())
}

/// Whether an update changes the group or rest template a user's days are computed with.
fn moves_schedule(body: &Value) -> bool {
    body.get("group_id").is_some() || body.get("rest_template_id").is_some()
}

fn hash(password: &str) -> Result<String, AppError> {
    hash_password(password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        AppError::Internal("Password could not be hashed".to_string())
    })
}

/// true => login name AVAILABLE
pub async fn is_login_available(login_name: &str, pool: &MySqlPool) -> Result<bool, AppError> {
    // Cuckoo filter: a miss means the name was never taken
    if !login_filter::might_exist(login_name) {
        return Ok(true);
    }
    // Moka cache: a hit means it is taken
    if login_cache::is_taken(login_name).await {
        return Ok(false);
    }

    // EXISTS comes back as BIGINT
    let exists: i64 =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE login_name = ? LIMIT 1)")
            .bind(login_filter::normalize(login_name))
            .fetch_one(pool)
            .await?;
    let exists = exists != 0;

    if exists {
        login_cache::mark_taken(login_name).await;
    }
    Ok(!exists)
}

async fn fetch_user(pool: &MySqlPool, id: u64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Create a user (admin)
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Login name already taken", body = Object, example = json!({
            "message": "Login name already taken"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
#[instrument(skip(pool, payload, auth), fields(login_name = %payload.login_name))]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let login_name = login_filter::normalize(&payload.login_name);
    if login_name.is_empty() || payload.name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "login_name and name are required".to_string(),
        ));
    }
    if !payload.email.contains('@') {
        return Err(AppError::BadRequest("Invalid email".to_string()));
    }
    check_password(&payload.password)?;
    check_role_and_tier(
        payload.role_id.map(u64::from),
        payload.approve_tier.map(u64::from),
    )?;

    if !is_login_available(&login_name, pool.get_ref()).await? {
        debug!("Login name already taken");
        return Err(AppError::Conflict("Login name already taken".to_string()));
    }

    let hashed = hash(&payload.password)?;

    let result = sqlx::query(
        r#"
        INSERT INTO users
            (login_name, password, name, email, role_id, approve_tier, group_id, rest_template_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&login_name)
    .bind(hashed)
    .bind(payload.name.trim())
    .bind(payload.email.trim())
    .bind(payload.role_id.unwrap_or(Role::Employee.id()))
    .bind(payload.approve_tier.unwrap_or(ApproveTier::None.level()))
    .bind(payload.group_id)
    .bind(payload.rest_template_id)
    .execute(pool.get_ref())
    .await
    .map_err(|e| {
        if is_constraint_violation(&e) {
            AppError::Conflict("Login name taken or group/template missing".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    // keep the availability check in step with the table
    login_filter::insert(&login_name);
    login_cache::mark_taken(&login_name).await;

    let user = fetch_user(pool.get_ref(), result.last_insert_id()).await?;
    info!(user_id = user.id, "User created");
    Ok(HttpResponse::Created().json(user))
}

/// List users
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserFilter),
    responses(
        (status = 200, description = "Paginated users", body = UserListResponse),
        (status = 403, description = "Manager/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserFilter>,
) -> Result<HttpResponse, AppError> {
    auth.require_manager_or_admin()?;

    let paging = Paging::new(query.page, query.per_page);

    let mut where_sql = String::from(" WHERE 1=1");
    let mut args: Vec<FilterValue> = Vec::new();

    // managers only see their own group
    let group_id = if auth.is_admin() {
        query.group_id
    } else {
        Some(auth.group_id.ok_or_else(|| {
            AppError::Forbidden("You do not belong to a group".to_string())
        })?)
    };
    if let Some(group_id) = group_id {
        where_sql.push_str(" AND group_id = ?");
        args.push(FilterValue::U64(group_id));
    }

    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        where_sql.push_str(" AND (login_name LIKE ? OR name LIKE ? OR email LIKE ?)");
        let pattern = format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"));
        for _ in 0..3 {
            args.push(FilterValue::Str(pattern.clone()));
        }
    }

    let count_sql = format!("SELECT COUNT(*) FROM users{where_sql}");
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    for arg in &args {
        count_q = match arg {
            FilterValue::U64(v) => count_q.bind(*v),
            FilterValue::Str(s) => count_q.bind(s.as_str()),
        };
    }
    let total = count_q.fetch_one(pool.get_ref()).await?;

    let data_sql = format!(
        "SELECT {USER_COLUMNS} FROM users{where_sql} ORDER BY id LIMIT ? OFFSET ?"
    );
    let mut data_q = sqlx::query_as::<_, User>(&data_sql);
    for arg in args {
        data_q = match arg {
            FilterValue::U64(v) => data_q.bind(v),
            FilterValue::Str(s) => data_q.bind(s),
        };
    }
    let data = data_q
        .bind(paging.per_page)
        .bind(paging.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(UserListResponse {
        data,
        page: paging.page_u32(),
        per_page: paging.per_page_u32(),
        total,
    }))
}

/// The signed-in user
#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let user = fetch_user(pool.get_ref(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// One user
#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Not allowed to view this user"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let user = fetch_user(pool.get_ref(), path.into_inner()).await?;
    auth.require_view(user.id, user.group_id)?;
    Ok(HttpResponse::Ok().json(user))
}

/// Partially update a user (admin)
#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User id")),
    request_body(content = Object, description = "Any of name, email, role_id, approve_tier, group_id, rest_template_id, is_active", example = json!({
        "approve_tier": 2,
        "group_id": 3
    })),
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 400, description = "Field cannot be updated"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    check_role_and_tier(
        body.get("role_id").and_then(Value::as_u64),
        body.get("approve_tier").and_then(Value::as_u64),
    )?;
    for key in ["role_id", "approve_tier"] {
        if body.get(key).is_some_and(|v| !v.is_u64()) {
            return Err(AppError::BadRequest(format!("{key} must be a number")));
        }
    }

    let update = build_update_sql("users", &body, UPDATABLE, "id", user_id)?;
    let mut tx = pool.begin().await?;
    let affected = execute_update(&mut tx, update).await.map_err(|e| {
        if is_constraint_violation(&e) {
            AppError::BadRequest("Referenced group or rest template does not exist".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    if affected == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    if moves_schedule(&body) {
        let logs = editable_logs(&mut tx, Affected::User(user_id)).await?;
        recompute_all(&mut tx, &config, &logs).await?;
    }
    tx.commit().await?;

    // Tokens already issued keep the old role/tier until they expire.
    let user = fetch_user(pool.get_ref(), user_id).await?;
    info!(user_id, actor = auth.user_id, "User updated");
    Ok(HttpResponse::Ok().json(user))
}

/// Delete a user (admin)
#[utoipa::path(
    delete,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "Deleted with all attendance data", body = Object, example = json!({
            "message": "User deleted"
        })),
        (status = 400, description = "Cannot delete yourself"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let user_id = path.into_inner();
    if user_id == auth.user_id {
        return Err(AppError::BadRequest("You cannot delete yourself".to_string()));
    }

    let user = fetch_user(pool.get_ref(), user_id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    login_filter::remove(&user.login_name);
    login_cache::forget(&user.login_name).await;

    info!(user_id, actor = auth.user_id, "User deleted");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "User deleted"
    })))
}

/// Change a password (self, or any user for admins)
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/password",
    params(("user_id" = u64, Path, description = "User id")),
    request_body = ChangePassword,
    responses(
        (status = 200, description = "Password changed", body = Object, example = json!({
            "message": "Password changed"
        })),
        (status = 400, description = "Password too short"),
        (status = 403, description = "Wrong current password or not permitted"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ChangePassword>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let is_self = user_id == auth.user_id;
    if !is_self && !auth.is_admin() {
        return Err(AppError::Forbidden(
            "You can only change your own password".to_string(),
        ));
    }
    check_password(&payload.new_password)?;

    let stored: Option<(String,)> = sqlx::query_as("SELECT password FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool.get_ref())
        .await?;
    let (stored,) = stored.ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    // admins resetting someone else skip the current-password check
    if is_self {
        let current = payload.current_password.as_deref().unwrap_or_default();
        if verify_password(current, &stored).is_err() {
            return Err(AppError::Forbidden("Current password is wrong".to_string()));
        }
    }

    let hashed = hash(&payload.new_password)?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed)
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    // force a fresh login everywhere
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    info!(user_id, actor = auth.user_id, "Password changed");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Password changed"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_length_is_enforced() {
        assert!(check_password("short").is_err());
        assert!(check_password("long enough").is_ok());
    }

    #[test]
    fn role_and_tier_must_be_known() {
        assert!(check_role_and_tier(Some(1), Some(3)).is_ok());
        assert!(check_role_and_tier(None, None).is_ok());
        assert!(check_role_and_tier(Some(9), None).is_err());
        assert!(check_role_and_tier(None, Some(4)).is_err());
        assert!(check_role_and_tier(Some(300), None).is_err());
    }

    #[test]
    fn moving_groups_or_templates_triggers_recompute() {
        assert!(moves_schedule(&serde_json::json!({"group_id": 3})));
        assert!(moves_schedule(&serde_json::json!({"rest_template_id": null})));
        assert!(!moves_schedule(&serde_json::json!({"name": "Aiko", "approve_tier": 1})));
    }

    #[test]
    fn password_and_login_are_not_updatable() {
        assert!(!UPDATABLE.contains(&"password"));
        assert!(!UPDATABLE.contains(&"login_name"));
    }

    #[actix_web::test]
    async fn filter_miss_means_available() {
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://nobody@127.0.0.1:1/none")
            .unwrap();
        // never inserted, so the database is not consulted
        assert!(is_login_available("never.seen.login", &pool).await.unwrap());
    }
}
