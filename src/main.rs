use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use dotenvy::dotenv;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod rules;
mod utils;

use config::Config;
use db::{init_db, run_migrations};

use crate::docs::ApiDoc;
use crate::utils::login_cache;
use crate::utils::login_filter;
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Timecard service"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    let config = Config::from_env();

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "timecard.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config.database_url).await;

    if config.run_migrations {
        run_migrations(&pool)
            .await
            .map_err(|e| std::io::Error::other(format!("migrations failed: {e}")))?;
    }

    let pool_for_filter_warmup = pool.clone();
    let pool_for_cache_warmup = pool.clone();
    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    actix_web::rt::spawn(async move {
        if let Err(e) = login_filter::warmup_login_filter(&pool_for_filter_warmup, 100).await {
            error!(error = %e, "Failed to warm up login filter");
        }
    });

    actix_web::rt::spawn(async move {
        // last 30 days of active users, 250 at a time
        if let Err(e) = login_cache::warmup_login_cache(&pool_for_cache_warmup, 30, 250).await {
            error!(error = %e, "Failed to warm up login cache");
        }
    });

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // wildcard so the UI's JS/CSS assets resolve
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .service(index)
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await
}
