use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Group {
    #[schema(example = 2)]
    pub id: u64,
    #[schema(example = "Logistics")]
    pub name: String,
    /// Approval stages an attendance log of this group goes through (1-3).
    #[schema(example = 2)]
    pub approve_levels: u8,
    #[schema(value_type = Option<String>, example = "09:00:00")]
    pub work_start: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "18:00:00")]
    pub work_end: Option<NaiveTime>,
}
