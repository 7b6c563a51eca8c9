use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::rules::{
    approval::{ApprovalState, AttendanceStatus},
    worktime::{DayWork, WorkType},
};

/// One user's attendance for one business day.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceLog {
    pub id: u64,
    pub user_id: u64,
    #[schema(value_type = String, format = "date", example = "2024-05-01")]
    pub work_date: NaiveDate,
    /// Earliest punched clock-in.
    #[schema(value_type = Option<String>, format = "date-time")]
    pub in_at: Option<NaiveDateTime>,
    /// Latest punched clock-out.
    #[schema(value_type = Option<String>, format = "date-time")]
    pub out_at: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub edited_in_at: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub edited_out_at: Option<NaiveDateTime>,
    pub edit_reason: Option<String>,
    pub remark: Option<String>,
    #[schema(example = "normal")]
    pub work_type: Option<String>,
    pub work_minutes: i64,
    pub rest_minutes: i64,
    pub overtime_minutes: i64,
    pub late_night_minutes: i64,
    pub holiday_minutes: i64,
    pub is_late: bool,
    pub is_early_leave: bool,
    pub crosses_day: bool,
    #[schema(example = "draft")]
    pub status: String,
    pub approved_level: u8,
    pub approved_by: Option<u64>,
    /// Optimistic-lock counter, bumped on every write.
    pub version: u32,
}

const ATTENDANCE_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "work_date",
    "in_at",
    "out_at",
    "edited_in_at",
    "edited_out_at",
    "edit_reason",
    "remark",
    "work_type",
    "work_minutes",
    "rest_minutes",
    "overtime_minutes",
    "late_night_minutes",
    "holiday_minutes",
    "is_late",
    "is_early_leave",
    "crosses_day",
    "status",
    "approved_level",
    "approved_by",
    "version",
];

/// Select list for `AttendanceLog`, optionally qualified by a table alias.
pub fn attendance_columns(alias: Option<&str>) -> String {
    ATTENDANCE_COLUMNS
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{a}.{c}"),
            None => (*c).to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl AttendanceLog {
    pub fn status(&self) -> AttendanceStatus {
        // the column only ever holds values written from AttendanceStatus
        self.status.parse().unwrap_or(AttendanceStatus::Draft)
    }

    pub fn approval_state(&self, required_levels: u8) -> ApprovalState {
        ApprovalState::new(self.status(), self.approved_level, required_levels)
    }

    /// The computed figures, if the day has been computed at all.
    pub fn day_work(&self) -> Option<DayWork> {
        let work_type = self.work_type.as_deref()?.parse::<WorkType>().ok()?;
        Some(DayWork {
            work_type,
            work_minutes: self.work_minutes,
            rest_minutes: self.rest_minutes,
            overtime_minutes: self.overtime_minutes,
            late_night_minutes: self.late_night_minutes,
            holiday_minutes: self.holiday_minutes,
            is_late: self.is_late,
            is_early_leave: self.is_early_leave,
            crosses_day: self.crosses_day,
        })
    }
}
