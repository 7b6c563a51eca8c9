use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::rules::worktime::RestSlot;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct RestTimeTemplate {
    pub id: u64,
    #[schema(example = "Day shift")]
    pub name: String,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct RestInterval {
    #[serde(skip_serializing)]
    pub template_id: u64,
    #[schema(value_type = String, example = "12:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "13:00:00")]
    pub end_time: NaiveTime,
}

impl From<&RestInterval> for RestSlot {
    fn from(i: &RestInterval) -> Self {
        RestSlot {
            start: i.start_time,
            end: i.end_time,
        }
    }
}
