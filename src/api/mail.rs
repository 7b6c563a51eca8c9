use std::collections::HashMap;

use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::context::{load_calendar, today},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::mail_template::MailTemplate,
    rules::{
        mail::{TemplateCode, check_placeholders, placeholders, render},
        reconcile::{MissingPunch, missing_punch},
        worktime::DayKind,
    },
};

#[derive(Deserialize, ToSchema)]
pub struct TemplateInput {
    #[schema(example = "Missing punch on {{date}}")]
    pub subject: String,
    #[schema(example = "Hello {{name}}, your {{missing}} punch on {{date}} is missing.")]
    pub body: String,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct PreviewInput {
    /// Values for the template's placeholders
    #[serde(default)]
    #[schema(example = json!({"name": "Aiko", "date": "2024-05-01", "missing": "clock-out"}))]
    pub vars: HashMap<String, String>,
}

#[derive(Serialize, ToSchema)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

#[derive(Serialize, ToSchema)]
pub struct Reminder {
    pub user_id: u64,
    #[schema(example = "aiko@example.com")]
    pub email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Deserialize, IntoParams)]
pub struct ReminderQuery {
    /// Business date to check; defaults to today
    #[param(value_type = Option<String>, example = "2024-05-01")]
    pub date: Option<NaiveDate>,
}

#[derive(FromRow)]
struct ReminderRow {
    user_id: u64,
    name: String,
    email: String,
    attendance_id: Option<u64>,
    in_at: Option<NaiveDateTime>,
    out_at: Option<NaiveDateTime>,
    edited_in_at: Option<NaiveDateTime>,
    edited_out_at: Option<NaiveDateTime>,
}

fn missing_label(missing: MissingPunch) -> &'static str {
    match missing {
        MissingPunch::In => "clock-in",
        MissingPunch::Out => "clock-out",
        MissingPunch::Both => "clock-in and clock-out",
    }
}

/// Built-in codes may only use the variables the service supplies; any
/// other code just has to be well formed.
fn validate_template(code: &str, input: &TemplateInput) -> Result<(), AppError> {
    if input.subject.trim().is_empty() {
        return Err(AppError::BadRequest("Subject is required".to_string()));
    }
    match code.parse::<TemplateCode>() {
        Ok(known) => {
            check_placeholders(&input.subject, known.variables())?;
            check_placeholders(&input.body, known.variables())?;
        }
        Err(_) => {
            placeholders(&input.subject)?;
            placeholders(&input.body)?;
        }
    }
    Ok(())
}

fn render_mail(
    template: &MailTemplate,
    vars: &HashMap<String, String>,
) -> Result<RenderedMail, AppError> {
    Ok(RenderedMail {
        subject: render(&template.subject, vars)?,
        body: render(&template.body, vars)?,
    })
}

fn reminder_for(
    row: &ReminderRow,
    date: NaiveDate,
    kind: DayKind,
    template: &MailTemplate,
) -> Result<Option<Reminder>, AppError> {
    let missing = if row.attendance_id.is_some() {
        missing_punch(
            row.edited_in_at.or(row.in_at),
            row.edited_out_at.or(row.out_at),
        )
    } else if kind == DayKind::Workday {
        Some(MissingPunch::Both)
    } else {
        None
    };
    let Some(missing) = missing else {
        return Ok(None);
    };

    let vars = HashMap::from([
        ("name".to_string(), row.name.clone()),
        ("date".to_string(), date.to_string()),
        ("missing".to_string(), missing_label(missing).to_string()),
    ]);
    let mail = render_mail(template, &vars)?;
    Ok(Some(Reminder {
        user_id: row.user_id,
        email: row.email.clone(),
        subject: mail.subject,
        body: mail.body,
    }))
}

async fn fetch_template(pool: &MySqlPool, code: &str) -> Result<MailTemplate, AppError> {
    sqlx::query_as::<_, MailTemplate>(
        "SELECT code, subject, body, updated_at FROM mail_templates WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Mail template '{code}' not found")))
}

/// All mail templates
#[utoipa::path(
    get,
    path = "/api/mail-templates",
    responses(
        (status = 200, description = "Templates", body = [MailTemplate]),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Mail"
)]
pub async fn list_templates(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let templates = sqlx::query_as::<_, MailTemplate>(
        "SELECT code, subject, body, updated_at FROM mail_templates ORDER BY code",
    )
    .fetch_all(pool.get_ref())
    .await?;
    Ok(HttpResponse::Ok().json(templates))
}

/// Create or replace a mail template (admin)
#[utoipa::path(
    put,
    path = "/api/mail-templates/{code}",
    params(("code" = String, Path, description = "Template code, e.g. missing_punch")),
    request_body = TemplateInput,
    responses(
        (status = 200, description = "Stored template", body = MailTemplate),
        (status = 400, description = "Malformed template or unknown placeholder", body = Object, example = json!({
            "message": "unknown placeholder 'salary'"
        })),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Mail"
)]
pub async fn upsert_template(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    payload: web::Json<TemplateInput>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let code = path.into_inner();
    if code.is_empty()
        || code.len() > 64
        || !code.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(AppError::BadRequest(
            "Template codes use lowercase letters, digits and underscores".to_string(),
        ));
    }
    validate_template(&code, &payload)?;

    sqlx::query(
        r#"
        INSERT INTO mail_templates (code, subject, body)
        VALUES (?, ?, ?)
        ON DUPLICATE KEY UPDATE subject = VALUES(subject), body = VALUES(body)
        "#,
    )
    .bind(&code)
    .bind(payload.subject.trim())
    .bind(&payload.body)
    .execute(pool.get_ref())
    .await?;

    info!(code = %code, actor = auth.user_id, "Mail template stored");
    Ok(HttpResponse::Ok().json(fetch_template(pool.get_ref(), &code).await?))
}

/// Render a template with sample values
#[utoipa::path(
    post,
    path = "/api/mail-templates/{code}/preview",
    params(("code" = String, Path, description = "Template code")),
    request_body = PreviewInput,
    responses(
        (status = 200, description = "Rendered mail", body = RenderedMail),
        (status = 400, description = "A placeholder has no value"),
        (status = 404, description = "Template not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Mail"
)]
pub async fn preview_template(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    payload: Option<web::Json<PreviewInput>>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let template = fetch_template(pool.get_ref(), &path.into_inner()).await?;
    let vars = payload.map(|p| p.into_inner().vars).unwrap_or_default();
    Ok(HttpResponse::Ok().json(render_mail(&template, &vars)?))
}

/// Missing-punch reminders for a day
#[utoipa::path(
    get,
    path = "/api/notifications/reminders",
    params(ReminderQuery),
    responses(
        (status = 200, description = "Rendered reminders, nothing is sent", body = [Reminder]),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Mail"
)]
pub async fn reminders(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<ReminderQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let date = query.date.unwrap_or_else(|| today(&config));

    let template = fetch_template(pool.get_ref(), TemplateCode::MissingPunch.as_ref()).await?;

    let mut conn = pool.acquire().await?;
    let kind = load_calendar(&mut conn, &config, date, date)
        .await?
        .day_kind(date);

    let rows = sqlx::query_as::<_, ReminderRow>(
        r#"
        SELECT u.id AS user_id, u.name, u.email,
               a.id AS attendance_id,
               a.in_at, a.out_at, a.edited_in_at, a.edited_out_at
        FROM users u
        LEFT JOIN attendance_logs a ON a.user_id = u.id AND a.work_date = ?
        WHERE u.is_active = TRUE
        ORDER BY u.id
        "#,
    )
    .bind(date)
    .fetch_all(&mut *conn)
    .await?;

    let mut out = Vec::new();
    for row in &rows {
        if let Some(reminder) = reminder_for(row, date, kind, &template)? {
            out.push(reminder);
        }
    }

    debug!(%date, checked = rows.len(), reminders = out.len(), "Reminders rendered");
    Ok(HttpResponse::Ok().json(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn template() -> MailTemplate {
        MailTemplate {
            code: "missing_punch".to_string(),
            subject: "Missing punch on {{date}}".to_string(),
            body: "Hello {{ name }}, your {{missing}} punch is missing.".to_string(),
            updated_at: NaiveDateTime::default(),
        }
    }

    fn row(has_log: bool, in_h: Option<u32>, out_h: Option<u32>) -> ReminderRow {
        let d = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        ReminderRow {
            user_id: 7,
            name: "Aiko".to_string(),
            email: "aiko@example.com".to_string(),
            attendance_id: has_log.then_some(1),
            in_at: in_h.and_then(|h| d.and_hms_opt(h, 0, 0)),
            out_at: out_h.and_then(|h| d.and_hms_opt(h, 0, 0)),
            edited_in_at: None,
            edited_out_at: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn missing_clock_out_is_reported() {
        let r = reminder_for(&row(true, Some(9), None), date(), DayKind::Workday, &template())
            .unwrap()
            .unwrap();
        assert_eq!(r.subject, "Missing punch on 2024-05-01");
        assert_eq!(r.body, "Hello Aiko, your clock-out punch is missing.");
    }

    #[test]
    fn complete_days_and_free_days_are_quiet() {
        assert!(
            reminder_for(&row(true, Some(9), Some(18)), date(), DayKind::Workday, &template())
                .unwrap()
                .is_none()
        );
        assert!(
            reminder_for(&row(false, None, None), date(), DayKind::Holiday, &template())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn absent_workday_misses_both() {
        let r = reminder_for(&row(false, None, None), date(), DayKind::Workday, &template())
            .unwrap()
            .unwrap();
        assert!(r.body.contains("clock-in and clock-out"));
    }

    #[test]
    fn edited_time_fills_the_gap() {
        let mut r = row(true, Some(9), None);
        r.edited_out_at = date().and_hms_opt(18, 0, 0);
        assert!(
            reminder_for(&r, date(), DayKind::Workday, &template())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn built_in_codes_restrict_variables() {
        let ok = TemplateInput {
            subject: "{{date}}".to_string(),
            body: "{{name}} {{missing}}".to_string(),
        };
        assert!(validate_template("missing_punch", &ok).is_ok());

        let bad = TemplateInput {
            subject: "{{date}}".to_string(),
            body: "{{salary}}".to_string(),
        };
        assert!(validate_template("missing_punch", &bad).is_err());
        // custom codes accept any well-formed placeholder
        assert!(validate_template("custom_notice", &bad).is_ok());

        let broken = TemplateInput {
            subject: "{{date".to_string(),
            body: String::new(),
        };
        assert!(validate_template("custom_notice", &broken).is_err());
    }
}
