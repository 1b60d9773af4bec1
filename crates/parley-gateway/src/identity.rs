use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use parley_types::api::Claims;

use crate::error::ChatError;

const TOKEN_TTL_DAYS: i64 = 30;

/// Issues and verifies HS256 identity tokens.
#[derive(Clone)]
pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: Uuid, name: &str) -> Result<String, ChatError> {
        let claims = Claims {
            sub: user_id,
            name: name.to_string(),
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            debug!("Token encoding failed: {}", e);
            ChatError::Internal
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ChatError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Token rejected: {}", e);
                ChatError::Unauthenticated
            })
    }
}
