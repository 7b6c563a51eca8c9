use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct MailTemplate {
    #[schema(example = "missing_punch")]
    pub code: String,
    #[schema(example = "Missing punch on {{date}}")]
    pub subject: String,
    #[schema(example = "Hello {{name}}, your {{missing}} punch on {{date}} is missing.")]
    pub body: String,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
}
