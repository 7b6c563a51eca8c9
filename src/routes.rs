use crate::{
    api::{attendance, group, holiday, mail, overtime, rest_time, summary, timecard, user},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request((60_000 / u64::from(requests_per_min)).max(1))
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .expect("rate limit period and burst are non-zero");
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(protected_limiter)
            .service(
                web::scope("/attendance")
                    .service(
                        web::resource("").route(web::get().to(attendance::list_attendance)),
                    )
                    // fixed segments before /{id}
                    .service(
                        web::resource("/clock-in").route(web::post().to(attendance::clock_in)),
                    )
                    .service(
                        web::resource("/clock-out").route(web::post().to(attendance::clock_out)),
                    )
                    .service(
                        web::resource("/pending")
                            .route(web::get().to(attendance::pending_attendance)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(attendance::get_attendance))
                            .route(web::put().to(attendance::edit_attendance)),
                    )
                    .service(
                        web::resource("/{id}/timecards")
                            .route(web::get().to(timecard::list_timecards))
                            .route(web::post().to(timecard::add_timecard)),
                    )
                    .service(
                        web::resource("/{id}/submit")
                            .route(web::post().to(attendance::submit_attendance)),
                    )
                    .service(
                        web::resource("/{id}/withdraw")
                            .route(web::post().to(attendance::withdraw_attendance)),
                    )
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::post().to(attendance::approve_attendance)),
                    )
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::post().to(attendance::reject_attendance)),
                    )
                    .service(
                        web::resource("/{id}/reopen")
                            .route(web::post().to(attendance::reopen_attendance)),
                    ),
            )
            .service(
                web::resource("/timecards/{id}").route(web::delete().to(timecard::delete_timecard)),
            )
            .service(
                web::scope("/overtime")
                    .service(
                        web::resource("")
                            .route(web::get().to(overtime::list_overtime))
                            .route(web::post().to(overtime::create_overtime)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(overtime::get_overtime)))
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::put().to(overtime::approve_overtime)),
                    )
                    .service(
                        web::resource("/{id}/reject").route(web::put().to(overtime::reject_overtime)),
                    )
                    .service(
                        web::resource("/{id}/cancel").route(web::put().to(overtime::cancel_overtime)),
                    ),
            )
            .service(
                web::scope("/rest-templates")
                    .service(
                        web::resource("")
                            .route(web::get().to(rest_time::list_rest_templates))
                            .route(web::post().to(rest_time::create_rest_template)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(rest_time::get_rest_template))
                            .route(web::put().to(rest_time::update_rest_template))
                            .route(web::delete().to(rest_time::delete_rest_template)),
                    ),
            )
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::get().to(user::list_users))
                            .route(web::post().to(user::create_user)),
                    )
                    .service(web::resource("/me").route(web::get().to(user::me)))
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(user::get_user))
                            .route(web::put().to(user::update_user))
                            .route(web::delete().to(user::delete_user)),
                    )
                    .service(
                        web::resource("/{id}/password").route(web::put().to(user::change_password)),
                    ),
            )
            .service(
                web::scope("/groups")
                    .service(
                        web::resource("")
                            .route(web::get().to(group::list_groups))
                            .route(web::post().to(group::create_group)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(group::get_group))
                            .route(web::put().to(group::update_group))
                            .route(web::delete().to(group::delete_group)),
                    )
                    .service(
                        web::resource("/{id}/members").route(web::get().to(group::group_members)),
                    ),
            )
            .service(
                web::scope("/holidays")
                    .service(
                        web::resource("")
                            .route(web::get().to(holiday::list_holidays))
                            .route(web::post().to(holiday::create_holiday)),
                    )
                    .service(
                        web::resource("/legal-count")
                            .route(web::get().to(holiday::legal_holiday_count)),
                    )
                    .service(
                        web::resource("/{id}").route(web::delete().to(holiday::delete_holiday)),
                    ),
            )
            .service(
                web::scope("/mail-templates")
                    .service(web::resource("").route(web::get().to(mail::list_templates)))
                    .service(web::resource("/{code}").route(web::put().to(mail::upsert_template)))
                    .service(
                        web::resource("/{code}/preview")
                            .route(web::post().to(mail::preview_template)),
                    ),
            )
            .service(
                web::resource("/notifications/reminders").route(web::get().to(mail::reminders)),
            )
            .service(web::resource("/summary").route(web::get().to(summary::monthly_summary))),
    );
}

// LOGIN
//  ├─ access_token (ACCESS_TOKEN_TTL)
//  └─ refresh_token (REFRESH_TOKEN_TTL, stored by jti)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ old refresh token revoked, new pair returned

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test, web::Data};

    #[actix_web::test]
    async fn protected_routes_need_a_token() {
        let config = Config::for_tests();
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://nobody@127.0.0.1:1/none")
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(Data::new(pool))
                .app_data(Data::new(config.clone()))
                .configure(|cfg| configure(cfg, config.clone())),
        )
        .await;

        for uri in ["/api/attendance/pending", "/api/users/me", "/api/summary"] {
            let req = test::TestRequest::get()
                .uri(uri)
                .peer_addr("127.0.0.1:40000".parse().unwrap())
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
}
