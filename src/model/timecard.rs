use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::rules::reconcile::Punch;

/// A raw punch pair. A day may hold several.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Timecard {
    pub id: u64,
    pub attendance_id: u64,
    pub user_id: u64,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub punched_in_at: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub punched_out_at: Option<NaiveDateTime>,
    #[schema(example = "clock")]
    pub source: String,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PunchSource {
    /// Recorded by the clock-in/clock-out endpoints.
    Clock,
    /// Entered by hand.
    Manual,
}

impl Timecard {
    pub fn punch(&self) -> Punch {
        Punch {
            in_at: self.punched_in_at,
            out_at: self.punched_out_at,
        }
    }
}
