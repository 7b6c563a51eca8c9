use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::models::TokenType;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use serde_json::json;
use tracing::debug;

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?;

    let header_value = match req.headers().get("Authorization") {
        Some(h) => h.to_str().map_err(|_| {
            actix_web::error::ErrorUnauthorized(
                json!({"error": "Invalid Authorization header encoding"}),
            )
        })?,
        None => {
            let resp =
                HttpResponse::Unauthorized().json(json!({"error": "Missing Authorization header"}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    let token = match header_value.strip_prefix("Bearer ") {
        Some(t) => t,
        None => {
            let resp = HttpResponse::Unauthorized()
                .json(json!({"error": "Authorization header must start with Bearer"}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            let resp = HttpResponse::Unauthorized()
                .json(json!({"error": "Invalid or expired token", "details": e}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    if claims.token_type != TokenType::Access {
        let resp = HttpResponse::Unauthorized().json(json!({"error": "Access token required"}));
        return Ok(req.into_response(resp.map_into_boxed_body()));
    }

    let auth_user = match AuthUser::from_claims(claims) {
        Some(user) => user,
        None => {
            let resp = HttpResponse::Unauthorized().json(json!({"error": "Invalid role"}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    debug!(
        user_id = auth_user.user_id,
        login_name = %auth_user.login_name,
        path = %req.path(),
        "Request authenticated"
    );
    req.extensions_mut().insert(auth_user);

    next.call(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{TokenSubject, generate_access_token, generate_refresh_token};
    use actix_web::{App, HttpResponse, http::StatusCode, middleware::from_fn, test, web};

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().body(user.login_name)
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 3,
            login_name: "sora".to_string(),
            role: 3,
            tier: 0,
            group_id: None,
        }
    }

    #[actix_web::test]
    async fn guards_protected_scope() {
        let config = Config::for_tests();
        let secret = config.jwt_secret.clone();
        let app = test::init_service(
            App::new().app_data(Data::new(config)).service(
                web::scope("/api")
                    .wrap(from_fn(auth_middleware))
                    .route("/me", web::get().to(whoami)),
            ),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/me").to_request())
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let access = generate_access_token(&subject(), &secret, 60).unwrap();
        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {access}")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "sora");

        let (refresh, _) = generate_refresh_token(&subject(), &secret, 60).unwrap();
        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {refresh}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", "Token abc"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
