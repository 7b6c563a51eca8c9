use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::rules::overtime::OvertimeStatus;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct OvertimeRequest {
    pub id: u64,
    pub user_id: u64,
    #[schema(value_type = String, format = "date", example = "2024-05-01")]
    pub work_date: NaiveDate,
    #[schema(value_type = String, format = "date-time")]
    pub start_at: NaiveDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub end_at: NaiveDateTime,
    pub minutes: i64,
    pub reason: String,
    #[schema(example = "pending")]
    pub status: String,
    pub decided_by: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub decided_at: Option<NaiveDateTime>,
    pub decision_note: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
}

pub const OVERTIME_COLUMNS: &str = "id, user_id, work_date, start_at, end_at, minutes, reason, \
     status, decided_by, decided_at, decision_note, created_at";

impl OvertimeRequest {
    pub fn status(&self) -> OvertimeStatus {
        self.status.parse().unwrap_or(OvertimeStatus::Pending)
    }
}
