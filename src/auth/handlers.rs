use crate::{
    auth::{
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    models::{Claims, LoginReqDto, TokenType, UserSql},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    access_token: String,
    refresh_token: String,
}

const USER_SQL: &str = r#"
    SELECT id, login_name, password, role_id, approve_tier, group_id, is_active
    FROM users
"#;

impl From<&UserSql> for TokenSubject {
    fn from(u: &UserSql) -> Self {
        Self {
            user_id: u.id,
            login_name: u.login_name.clone(),
            role: u.role_id,
            tier: u.approve_tier,
            group_id: u.group_id,
        }
    }
}

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Issues a token pair and stores the refresh token's id.
async fn issue_pair(
    pool: &MySqlPool,
    config: &Config,
    subject: &TokenSubject,
) -> Result<LoginResponse, HttpResponse> {
    let access_token = generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)
        .map_err(|e| {
            error!(error = %e, "Failed to sign access token");
            HttpResponse::InternalServerError().finish()
        })?;

    let (refresh_token, refresh_claims): (String, Claims) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl).map_err(
            |e| {
                error!(error = %e, "Failed to sign refresh token");
                HttpResponse::InternalServerError().finish()
            },
        )?;

    debug!(
        user_id = subject.user_id,
        jti = %refresh_claims.jti,
        "Storing refresh token"
    );

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(subject.user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to store refresh token");
        HttpResponse::InternalServerError().finish()
    })?;

    Ok(LoginResponse {
        access_token,
        refresh_token,
    })
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token pair issued", body = LoginResponse),
        (status = 400, description = "Login name or password missing"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(login_name = %user.login_name)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    info!("Login request received");

    if user.login_name.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty login name or password");
        return HttpResponse::BadRequest().body("Login name or password required");
    }

    debug!("Fetching user from database");

    let db_user = match sqlx::query_as::<_, UserSql>(&format!("{USER_SQL} WHERE login_name = ?"))
        .bind(user.login_name.trim())
        .fetch_optional(pool.get_ref())
        .await
    {
        Ok(Some(user)) if user.is_active => {
            debug!(user_id = user.id, "User found");
            user
        }
        Ok(Some(_)) => {
            info!("Invalid credentials: user disabled");
            return HttpResponse::Unauthorized().body("Invalid credentials");
        }
        Ok(None) => {
            info!("Invalid credentials: user not found");
            return HttpResponse::Unauthorized().body("Invalid credentials");
        }
        Err(e) => {
            error!(error = %e, "Database error while fetching user");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return HttpResponse::Unauthorized().body("Invalid credentials");
    }

    debug!("Password verified");

    let pair = match issue_pair(pool.get_ref(), &config, &TokenSubject::from(&db_user)).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    // not fatal for the login itself
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!("Login successful");

    HttpResponse::Ok().json(pair)
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Rotated token pair", body = LoginResponse),
        (status = 401, description = "Refresh token missing, revoked or expired")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let token = match bearer(&req) {
        Some(t) => t,
        None => return HttpResponse::Unauthorized().body("No token"),
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(_) => return HttpResponse::Unauthorized().finish(),
    };

    if claims.token_type != TokenType::Refresh {
        return HttpResponse::Unauthorized().finish();
    }

    // Revoke the presented token; zero rows means unknown or already used
    let revoked = sqlx::query(
        "UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ? AND revoked = FALSE",
    )
    .bind(&claims.jti)
    .execute(pool.get_ref())
    .await;

    match revoked {
        Ok(r) if r.rows_affected() == 1 => {}
        Ok(_) => return HttpResponse::Unauthorized().finish(),
        Err(e) => {
            error!(error = %e, "Failed to revoke refresh token");
            return HttpResponse::InternalServerError().finish();
        }
    }

    // Re-read the user so role, tier and group changes apply on rotation
    let db_user = match sqlx::query_as::<_, UserSql>(&format!("{USER_SQL} WHERE id = ?"))
        .bind(claims.user_id)
        .fetch_optional(pool.get_ref())
        .await
    {
        Ok(Some(u)) if u.is_active => u,
        Ok(_) => return HttpResponse::Unauthorized().finish(),
        Err(e) => {
            error!(error = %e, "Database error while refreshing token");
            return HttpResponse::InternalServerError().finish();
        }
    };

    match issue_pair(pool.get_ref(), &config, &TokenSubject::from(&db_user)).await {
        Ok(pair) => HttpResponse::Ok().json(pair),
        Err(resp) => resp,
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Refresh token revoked")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let token = match bearer(&req) {
        Some(t) => t,
        None => return HttpResponse::NoContent().finish(),
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(_) => return HttpResponse::NoContent().finish(),
    };

    // only refresh tokens can log out
    if claims.token_type != TokenType::Refresh {
        return HttpResponse::NoContent().finish();
    }

    // idempotent
    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token on logout");
    }

    HttpResponse::NoContent().finish()
}
