//! Optional admission check for relay connections. When a secret is
//! configured, a client must present an HS256 token before it gets an id.
//! Admission never influences which id is assigned.

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Clone)]
pub struct Admission {
    key: Option<DecodingKey>,
}

impl Admission {
    pub fn open() -> Self {
        Self { key: None }
    }

    pub fn with_secret(secret: &str) -> Self {
        Self {
            key: Some(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Self::with_secret(secret),
            _ => Self::open(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.key.is_none()
    }

    /// Returns the token subject, or `None` when admission is open.
    pub fn check(&self, token: Option<&str>) -> Result<Option<String>, RelayError> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let token = token.ok_or(RelayError::Unauthorized)?;
        let data = decode::<Claims>(token, key, &Validation::default())
            .map_err(|_| RelayError::Unauthorized)?;
        Ok(Some(data.claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn token(secret: &str, exp_offset: i64) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let claims = Claims {
            sub: "user-1".into(),
            exp: (now + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn open_admission_lets_everyone_in() {
        let admission = Admission::from_secret(None);
        assert!(admission.is_open());
        assert_eq!(admission.check(None).unwrap(), None);
    }

    #[test]
    fn valid_token_is_admitted() {
        let admission = Admission::with_secret("s3cret");
        let subject = admission.check(Some(&token("s3cret", 600))).unwrap();
        assert_eq!(subject.as_deref(), Some("user-1"));
    }

    #[test]
    fn missing_wrong_or_expired_tokens_are_refused() {
        let admission = Admission::with_secret("s3cret");
        assert!(admission.check(None).is_err());
        assert!(admission.check(Some(&token("other", 600))).is_err());
        assert!(admission.check(Some(&token("s3cret", -600))).is_err());
    }
}
