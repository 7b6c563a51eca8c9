use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "aiko")]
    pub login_name: String,
    #[schema(example = "correct horse battery staple")]
    pub password: String,
}

#[derive(FromRow)]
pub struct UserSql {
    pub id: u64, // matches BIGINT UNSIGNED
    pub login_name: String,
    pub password: String,
    pub role_id: u8,
    pub approve_tier: u8,
    pub group_id: Option<u64>,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: u8, // role id
    /// Approval tier level, 0 when the user approves nothing
    pub tier: u8,
    pub group_id: Option<u64>,
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}
