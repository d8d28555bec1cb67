//! Locally issued session tokens (HS256 JWT).

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use schoolbus_auth_common::Role;
use serde::{Deserialize, Serialize};

/// Claims this service puts into a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPayload {
    pub user_id: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub firebase_uid: String,
}

/// Decoded session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub firebase_uid: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to sign session token: {0}")]
    Encode(String),
    #[error("Invalid session token: {0}")]
    Invalid(String),
    #[error("Session token expired")]
    Expired,
}

/// Signs and verifies session tokens with a shared secret.
pub struct SessionCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl SessionCodec {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Sign a payload, stamping `iat` now and `exp` after the configured lifetime.
    pub fn sign(&self, payload: &SessionPayload) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| SessionError::Encode(format!("Session lifetime {:?} is out of range", self.ttl)))?;
        let claims = SessionClaims {
            sub: payload.user_id.clone(),
            email: payload.email.clone(),
            roles: payload.roles.clone(),
            firebase_uid: payload.firebase_uid.clone(),
            iat: now,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Encode(e.to_string()))
    }

    /// Verify signature, algorithm and expiry of a session token.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SessionPayload {
        SessionPayload {
            user_id: "3f0c6f0e-user".to_string(),
            email: "jane@example.com".to_string(),
            roles: vec![Role::Parent],
            firebase_uid: "firebase-uid-1".to_string(),
        }
    }

    #[test]
    fn test_sign_then_verify_carries_claims() {
        let codec = SessionCodec::new("secret", Duration::from_secs(3600));
        let token = codec.sign(&payload()).unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.sub, "3f0c6f0e-user");
        assert_eq!(claims.email, "jane@example.com");
        assert_eq!(claims.roles, vec![Role::Parent]);
        assert_eq!(claims.firebase_uid, "firebase-uid-1");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_claims_use_wire_names() {
        let codec = SessionCodec::new("secret", Duration::from_secs(60));
        let token = codec.sign(&payload()).unwrap();
        let claims = codec.verify(&token).unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["firebaseUid"], "firebase-uid-1");
        assert_eq!(json["roles"][0], "parent");
        assert!(json.get("firebase_uid").is_none());
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let codec = SessionCodec::new("secret", Duration::from_secs(3600));
        let other = SessionCodec::new("other-secret", Duration::from_secs(3600));
        let token = other.sign(&payload()).unwrap();

        assert!(matches!(codec.verify(&token), Err(SessionError::Invalid(_))));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let codec = SessionCodec::new("secret", Duration::from_secs(3600));
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "u".to_string(),
            email: "u@example.com".to_string(),
            roles: vec![Role::Parent],
            firebase_uid: "uid".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(matches!(codec.verify(&token), Err(SessionError::Expired)));
    }

    #[test]
    fn test_sign_rejects_out_of_range_lifetime() {
        let codec = SessionCodec::new("secret", Duration::from_secs(u64::MAX));
        assert!(matches!(codec.sign(&payload()), Err(SessionError::Encode(_))));

        let codec = SessionCodec::new("secret", Duration::from_secs(i64::MAX as u64));
        assert!(matches!(codec.sign(&payload()), Err(SessionError::Encode(_))));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let codec = SessionCodec::new("secret", Duration::from_secs(3600));
        assert!(codec.verify("not-a-jwt").is_err());
        assert!(codec.verify("").is_err());
    }
}
