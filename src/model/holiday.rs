use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Holiday {
    pub id: u64,
    #[schema(value_type = String, format = "date", example = "2024-05-03")]
    pub holiday_date: NaiveDate,
    #[schema(example = "Constitution Memorial Day")]
    pub name: String,
    /// Legal holidays are paid at the legal-holiday rate instead of overtime.
    pub is_legal: bool,
}
