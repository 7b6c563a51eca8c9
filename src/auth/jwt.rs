use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{Claims, TokenType};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

/// Identity carried inside both token kinds.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: u64,
    pub login_name: String,
    pub role: u8,
    pub tier: u8,
    pub group_id: Option<u64>,
}

impl From<&Claims> for TokenSubject {
    fn from(c: &Claims) -> Self {
        Self {
            user_id: c.user_id,
            login_name: c.sub.clone(),
            role: c.role,
            tier: c.tier,
            group_id: c.group_id,
        }
    }
}

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

fn issue(
    subject: &TokenSubject,
    token_type: TokenType,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), jsonwebtoken::errors::Error> {
    let claims = Claims {
        user_id: subject.user_id,
        sub: subject.login_name.clone(),
        role: subject.role,
        tier: subject.tier,
        group_id: subject.group_id,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn generate_access_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<String, jsonwebtoken::errors::Error> {
    issue(subject, TokenType::Access, secret, ttl).map(|(token, _)| token)
}

pub fn generate_refresh_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), jsonwebtoken::errors::Error> {
    issue(subject, TokenType::Refresh, secret, ttl)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 7,
            login_name: "aiko".to_string(),
            role: 3,
            tier: 1,
            group_id: Some(2),
        }
    }

    #[test]
    fn access_token_carries_identity() {
        let token = generate_access_token(&subject(), "secret", 60).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "aiko");
        assert_eq!(claims.tier, 1);
        assert_eq!(claims.group_id, Some(2));
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_tokens_get_unique_ids() {
        let (_, a) = generate_refresh_token(&subject(), "secret", 60).unwrap();
        let (_, b) = generate_refresh_token(&subject(), "secret", 60).unwrap();
        assert_eq!(a.token_type, TokenType::Refresh);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(&subject(), "secret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }
}
