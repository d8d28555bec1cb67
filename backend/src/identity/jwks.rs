use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{DecodedIdentity, ProviderError};

/// Unknown `kid`s trigger a refetch at most this often.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Clock skew tolerated on `exp`, `iat` and `auth_time`.
const LEEWAY_SECS: u64 = 60;

const MAX_UID_LEN: usize = 128;

/// JWKS key set response.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[allow(dead_code)]
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

/// Firebase ID token claims.
#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    auth_time: i64,
    iat: i64,
}

struct KeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

/// Verifies Firebase ID tokens against Google's published signing keys.
pub struct FirebaseTokenVerifier {
    http_client: Client,
    jwks_url: String,
    project_id: String,
    key_set: RwLock<KeySet>,
}

impl FirebaseTokenVerifier {
    /// Create a verifier and load the current signing keys.
    pub async fn new(
        http_client: Client,
        jwks_url: &str,
        project_id: &str,
    ) -> Result<Self, ProviderError> {
        let verifier = Self {
            http_client,
            jwks_url: jwks_url.to_string(),
            project_id: project_id.to_string(),
            key_set: RwLock::new(KeySet {
                keys: HashMap::new(),
                fetched_at: None,
            }),
        };

        verifier.refresh_keys().await?;

        Ok(verifier)
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn refresh_keys(&self) -> Result<(), ProviderError> {
        tracing::info!("Fetching JWKS from {}", self.jwks_url);

        let response: JwksResponse = self.http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| ProviderError::KeyFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::KeyFetch(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in response.keys {
            if jwk.kty == "RSA" {
                if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                    match DecodingKey::from_rsa_components(n, e) {
                        Ok(key) => {
                            keys.insert(jwk.kid.clone(), key);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse RSA key {}: {}", jwk.kid, e);
                        }
                    }
                }
            }
        }

        tracing::info!("Loaded {} JWKS keys", keys.len());

        let mut key_set = self.key_set.write().await;
        key_set.keys = keys;
        key_set.fetched_at = Some(Instant::now());
        Ok(())
    }

    /// Find the key for `kid`, refetching once if it is unknown (key rotation).
    async fn key_for(&self, kid: &str) -> Result<DecodingKey, ProviderError> {
        let stale = {
            let key_set = self.key_set.read().await;
            if let Some(key) = key_set.keys.get(kid) {
                return Ok(key.clone());
            }
            key_set
                .fetched_at
                .map_or(true, |at| at.elapsed() >= MIN_REFRESH_INTERVAL)
        };

        if stale {
            self.refresh_keys().await?;
            if let Some(key) = self.key_set.read().await.keys.get(kid) {
                return Ok(key.clone());
            }
        }

        Err(ProviderError::KeyNotFound(kid.to_string()))
    }

    /// Verify signature and claims of a Firebase ID token.
    pub async fn verify(&self, token: &str) -> Result<DecodedIdentity, ProviderError> {
        let header = decode_header(token)
            .map_err(|e| ProviderError::InvalidToken(e.to_string()))?;

        if header.alg != Algorithm::RS256 {
            return Err(ProviderError::InvalidToken(format!(
                "Unexpected algorithm {:?}",
                header.alg
            )));
        }

        let kid = header.kid
            .ok_or_else(|| ProviderError::InvalidToken("Missing kid in token header".to_string()))?;

        let key = self.key_for(&kid).await?;

        let issuer = self.issuer();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let claims = decode::<FirebaseClaims>(token, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ProviderError::TokenExpired,
                _ => ProviderError::InvalidToken(e.to_string()),
            })?
            .claims;

        if claims.sub.is_empty() || claims.sub.len() > MAX_UID_LEN {
            return Err(ProviderError::InvalidToken("Invalid sub claim".to_string()));
        }

        let latest = Utc::now().timestamp() + LEEWAY_SECS as i64;
        if claims.iat > latest {
            return Err(ProviderError::InvalidToken("Token issued in the future".to_string()));
        }
        if claims.auth_time > latest {
            return Err(ProviderError::InvalidToken("auth_time is in the future".to_string()));
        }

        Ok(DecodedIdentity {
            uid: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
        })
    }
}
