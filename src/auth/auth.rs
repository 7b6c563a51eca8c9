use crate::config::Config;
use crate::error::AppError;
use crate::rules::approval::{Actor, ApproveTier};
use crate::{model::role::Role, models::Claims};
use actix_web::{
    FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorUnauthorized, web::Data,
};
use futures::future::{Ready, ready};
use jsonwebtoken::decode;
use jsonwebtoken::{DecodingKey, Validation};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub login_name: String,
    pub role: Role,
    pub tier: ApproveTier,
    pub group_id: Option<u64>,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Option<Self> {
        Some(AuthUser {
            user_id: claims.user_id,
            login_name: claims.sub,
            role: Role::from_id(claims.role)?,
            tier: ApproveTier::from_level(claims.tier)?,
            group_id: claims.group_id,
        })
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // auth_middleware already did the work on protected routes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(ErrorUnauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(actix_web::error::ErrorInternalServerError(
                    "Config missing",
                )));
            }
        };

        let data = match decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(d) => d,
            Err(_) => return ready(Err(ErrorUnauthorized("Invalid token"))),
        };

        match AuthUser::from_claims(data.claims) {
            Some(user) => ready(Ok(user)),
            None => ready(Err(ErrorUnauthorized("Invalid role"))),
        }
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin only".to_string()))
        }
    }

    /// Anyone holding an approval tier counts as a manager.
    pub fn is_manager(&self) -> bool {
        self.tier >= ApproveTier::Middle
    }

    pub fn require_manager_or_admin(&self) -> Result<(), AppError> {
        if self.is_admin() || self.is_manager() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Manager/Admin only".to_string()))
        }
    }

    pub fn require_view(&self, owner_id: u64, owner_group: Option<u64>) -> Result<(), AppError> {
        if self.can_view(owner_id, owner_group) {
            Ok(())
        } else {
            Err(AppError::Forbidden("Not allowed to view this user".to_string()))
        }
    }

    /// Whether this user may read another user's attendance data.
    pub fn can_view(&self, owner_id: u64, owner_group: Option<u64>) -> bool {
        self.user_id == owner_id
            || self.is_admin()
            || (self.is_manager() && owner_group.is_some() && owner_group == self.group_id)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            tier: self.tier,
            is_admin: self.is_admin(),
        }
    }
}
