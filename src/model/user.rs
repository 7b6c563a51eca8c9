use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A user as listed by the admin screens. The password hash never leaves
/// the database through this type.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 7,
    "login_name": "aiko",
    "name": "Aiko Tanaka",
    "email": "aiko@example.com",
    "role_id": 3,
    "approve_tier": 0,
    "group_id": 2,
    "rest_template_id": 1,
    "is_active": true,
    "last_login_at": null,
    "created_at": "2024-04-01T09:00:00"
}))]
pub struct User {
    pub id: u64,
    pub login_name: String,
    pub name: String,
    pub email: String,
    pub role_id: u8,
    pub approve_tier: u8,
    pub group_id: Option<u64>,
    pub rest_template_id: Option<u64>,
    pub is_active: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

pub const USER_COLUMNS: &str = "id, login_name, name, email, role_id, approve_tier, group_id, \
     rest_template_id, is_active, last_login_at, created_at";
