use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ProviderError;

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const ADMIN_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
     https://www.googleapis.com/auth/firebase \
     https://www.googleapis.com/auth/identitytoolkit \
     https://www.googleapis.com/auth/userinfo.email";

/// Access tokens are replaced this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Google service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Credentials used for provider admin calls.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Explicit service-account key.
    ServiceAccount(ServiceAccountKey),
    /// Platform default: the compute metadata server.
    Metadata { base_url: String },
}

impl Credentials {
    /// Parse an inline service-account JSON blob.
    pub fn from_json(json: &str) -> Result<Self, ProviderError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| ProviderError::Credentials(e.to_string()))?;
        EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::Credentials(format!("private_key: {}", e)))?;
        Ok(Credentials::ServiceAccount(key))
    }

    /// Read a service-account key file.
    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Credentials(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Pick credentials: the inline blob if configured, else application-default
    /// credentials (a key file, else the metadata server).
    pub fn resolve(
        inline: Option<&str>,
        adc_file: Option<PathBuf>,
        metadata_url: &str,
    ) -> Result<Self, ProviderError> {
        if let Some(json) = inline.filter(|s| !s.trim().is_empty()) {
            tracing::info!("Using inline service-account credentials");
            return Self::from_json(json);
        }
        if let Some(path) = adc_file {
            tracing::info!("Using service-account credentials from {}", path.display());
            return Self::from_file(&path);
        }
        tracing::info!("Using metadata server credentials at {}", metadata_url);
        Ok(Credentials::Metadata {
            base_url: metadata_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Credentials::ServiceAccount(key) => key.project_id.as_deref(),
            Credentials::Metadata { .. } => None,
        }
    }

    /// Ask the metadata server which project this instance runs in.
    pub async fn discover_project_id(&self, http_client: &Client) -> Option<String> {
        let Credentials::Metadata { base_url } = self else {
            return self.project_id().map(String::from);
        };

        let response = http_client
            .get(format!("{}/computeMetadata/v1/project/project-id", base_url))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;

        response
            .text()
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// JWT assertion for the OAuth2 JWT-bearer grant.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

/// OAuth2 access tokens for provider admin APIs, reused until close to expiry.
pub struct AccessTokenSource {
    http_client: Client,
    credentials: Credentials,
    cached: RwLock<Option<CachedToken>>,
}

impl AccessTokenSource {
    pub fn new(http_client: Client, credentials: Credentials) -> Self {
        Self {
            http_client,
            credentials,
            cached: RwLock::new(None),
        }
    }

    /// A valid bearer token for Google APIs.
    pub async fn token(&self) -> Result<String, ProviderError> {
        let now = Utc::now().timestamp();
        let margin = EXPIRY_MARGIN.as_secs() as i64;

        if let Some(token) = self.cached.read().await.as_ref() {
            if token.expires_at - margin > now {
                return Ok(token.value.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if token.expires_at - margin > now {
                return Ok(token.value.clone());
            }
        }

        let response = match &self.credentials {
            Credentials::ServiceAccount(key) => self.fetch_with_assertion(key).await?,
            Credentials::Metadata { base_url } => self.fetch_from_metadata(base_url).await?,
        };

        let token = CachedToken {
            value: response.access_token,
            expires_at: Utc::now().timestamp() + response.expires_in as i64,
        };
        tracing::debug!("Obtained provider access token (expires in {}s)", response.expires_in);

        *cached = Some(token.clone());
        Ok(token.value)
    }

    async fn fetch_with_assertion(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<TokenResponse, ProviderError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: ADMIN_SCOPES,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::Credentials(e.to_string()))?;
        let assertion = encode(&header, &claims, &signing_key)
            .map_err(|e| ProviderError::Credentials(e.to_string()))?;

        self.http_client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::AccessToken(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::AccessToken(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::AccessToken(e.to_string()))
    }

    async fn fetch_from_metadata(&self, base_url: &str) -> Result<TokenResponse, ProviderError> {
        self.http_client
            .get(format!(
                "{}/computeMetadata/v1/instance/service-accounts/default/token",
                base_url
            ))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ProviderError::AccessToken(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::AccessToken(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::AccessToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::service_account_json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_from_json_reads_service_account() {
        let creds = Credentials::from_json(&service_account_json("https://oauth.test/token")).unwrap();
        assert_eq!(creds.project_id(), Some(crate::test_util::TEST_PROJECT_ID));
        match creds {
            Credentials::ServiceAccount(key) => {
                assert_eq!(key.token_uri, "https://oauth.test/token");
                assert!(key.client_email.ends_with("iam.gserviceaccount.com"));
            }
            other => panic!("expected service account, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            Credentials::from_json("{not json"),
            Err(ProviderError::Credentials(_))
        ));
        assert!(matches!(
            Credentials::from_json(r#"{"private_key": "nope", "client_email": "a@b"}"#),
            Err(ProviderError::Credentials(_))
        ));
    }

    #[test]
    fn test_resolve_prefers_inline_then_file_then_metadata() {
        let json = service_account_json("https://oauth.test/token");

        let inline = Credentials::resolve(Some(&json), None, "http://metadata").unwrap();
        assert!(matches!(inline, Credentials::ServiceAccount(_)));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sa.json");
        std::fs::write(&file, &json).unwrap();
        let from_file = Credentials::resolve(Some("  "), Some(file), "http://metadata").unwrap();
        assert!(matches!(from_file, Credentials::ServiceAccount(_)));

        let metadata = Credentials::resolve(None, None, "http://metadata/").unwrap();
        match metadata {
            Credentials::Metadata { base_url } => assert_eq!(base_url, "http://metadata"),
            other => panic!("expected metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_service_account_token_exchange_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .and(body_string_contains("assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
        let source = AccessTokenSource::new(Client::new(), creds);

        assert_eq!(source.token().await.unwrap(), "ya29.test");
        assert_eq!(source.token().await.unwrap(), "ya29.test");
    }

    #[tokio::test]
    async fn test_metadata_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "metadata-token",
                "expires_in": 1800
            })))
            .mount(&server)
            .await;

        let source = AccessTokenSource::new(
            Client::new(),
            Credentials::Metadata { base_url: server.uri() },
        );
        assert_eq!(source.token().await.unwrap(), "metadata-token");
    }

    #[tokio::test]
    async fn test_token_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let creds = Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
        let source = AccessTokenSource::new(Client::new(), creds);
        assert!(matches!(source.token().await, Err(ProviderError::AccessToken(_))));
    }

    #[tokio::test]
    async fn test_discover_project_id_from_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/project/project-id"))
            .respond_with(ResponseTemplate::new(200).set_body_string("schoolbus-prod\n"))
            .mount(&server)
            .await;

        let creds = Credentials::Metadata { base_url: server.uri() };
        assert_eq!(
            creds.discover_project_id(&Client::new()).await.as_deref(),
            Some("schoolbus-prod")
        );
    }
}
