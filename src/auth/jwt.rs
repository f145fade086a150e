//! HS256 JWT validation.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use super::{Claims, TokenError, TokenValidator};

/// [`TokenValidator`] for HS256-signed JWTs carrying [`Claims`].
#[derive(Clone)]
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

/// Sign a token for `subject` valid for `ttl`.
///
/// Issuing is owned by the login flow; this is the matching encoder for it
/// and for tests.
pub fn issue_token(
    subject: &str,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: subject.to_string(),
        iat: now,
        exp: now + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_round_trip_subject() {
        let token = issue_token("user-42", SECRET, Duration::from_secs(300)).unwrap();
        let claims = JwtValidator::new(SECRET).validate(&token).unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = issue_token("user-42", SECRET, Duration::from_secs(300)).unwrap();
        let err = JwtValidator::new("other-secret").validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims {
            sub: "user-42".to_string(),
            iat: Utc::now().timestamp() - 120,
            exp: Utc::now().timestamp() - 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = JwtValidator::new(SECRET).validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn test_garbage_is_invalid() {
        let err = JwtValidator::new(SECRET).validate("not.a.jwt").unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
    }
}
