use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use schoolbus_auth_common::Role;
use serde::Serialize;

use crate::auth::AuthService;
use crate::config::{
    Config, CorsConfig, DatabaseConfig, FirebaseConfig, JwtConfig, LoggingConfig, ServerConfig,
};
use crate::identity::{DecodedIdentity, IdentityProvider, ProviderError, ProviderUserRecord};
use crate::routes::route_policy;
use crate::session::{SessionClaims, SessionCodec};
use crate::users::SqliteUserRepository;
use crate::AppState;

pub const TEST_PROJECT_ID: &str = "schoolbus-test";
pub const TEST_KID: &str = "test-key-1";
pub const TEST_JWT_SECRET: &str = "test-secret";

/// RSA key standing in for Google's token signing key.
pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("fixtures/provider_key.pem");

const TEST_KEY_MODULUS: &str = "rxrXW_VF8fbiSXrGfEtmGGpn6VK_CVGCYIywVJxNKzbFWsncL5n2CggZucA8AEe4w-ZBk-i0_T1sG3oTCcSxASEsdcRiaTFtvlT7Z3JYsHGdWi9lcS4FBi1EBUaM6H9Dn7mIEKIzv3V8vTFj2aPFtcTXNDSapRuVczegZh36v06z55GFDULBVDrXoKV9yRt1tg8LiLNImJlo5NuXVi6fOMfIQVIPmXtTyAcBFrp_Rql_R0bCBJg4HuijY9_2CimVf3sdRgr66X1WNWiDJPntfTg6PDiIfVKh6hhzTQN0x2C7wUol1A7xJvdRze9dJF-z5X5sZnghws17fbmFfiY6Qw";
const TEST_KEY_EXPONENT: &str = "AQAB";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3001,
        },
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            expires_in: "1h".to_string(),
        },
        firebase: FirebaseConfig {
            project_id: Some(TEST_PROJECT_ID.to_string()),
            ..FirebaseConfig::default()
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        cors: CorsConfig {
            origins: "*".to_string(),
        },
    }
}

pub fn test_session_codec() -> SessionCodec {
    SessionCodec::new(TEST_JWT_SECRET, Duration::from_secs(3600))
}

/// Session token for `user_id` signed with the test secret, expired an hour ago.
pub fn expired_session_token(user_id: &str, firebase_uid: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        email: "expired@example.com".to_string(),
        roles: vec![Role::Parent],
        firebase_uid: firebase_uid.to_string(),
        iat: now - 7200,
        exp: now - 3600,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode JWT")
}

/// Application state over an in-memory user store and the given provider.
pub fn create_test_state(provider: Arc<dyn IdentityProvider>) -> Arc<AppState> {
    let users = SqliteUserRepository::new(&test_config().database.url)
        .expect("Failed to open in-memory user store");

    Arc::new(AppState {
        auth: AuthService::new(provider, Arc::new(users), test_session_codec()),
        route_policy: route_policy(),
    })
}

pub fn decoded_identity(uid: &str, email: Option<&str>, name: Option<&str>) -> DecodedIdentity {
    DecodedIdentity {
        uid: uid.to_string(),
        email: email.map(String::from),
        name: name.map(String::from),
        picture: None,
    }
}

/// In-memory identity provider with scripted answers.
///
/// Tokens not registered through [`accept`](Self::accept) or
/// [`reject`](Self::reject) fail verification as invalid. Every call yields
/// once to the scheduler so that concurrent logins interleave the way they
/// would against the remote provider.
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: Mutex<HashMap<String, Result<DecodedIdentity, ProviderError>>>,
    records: Mutex<HashMap<String, ProviderUserRecord>>,
    lookups: AtomicUsize,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&self, token: &str, identity: DecodedIdentity) {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), Ok(identity));
    }

    pub fn reject(&self, token: &str, error: ProviderError) {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), Err(error));
    }

    pub fn add_record(&self, record: ProviderUserRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.uid.clone(), record);
    }

    /// Number of account lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_id_token(&self, token: &str) -> Result<DecodedIdentity, ProviderError> {
        tokio::task::yield_now().await;
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::InvalidToken("unknown token".to_string())))
    }

    async fn get_user(&self, uid: &str) -> Result<ProviderUserRecord, ProviderError> {
        tokio::task::yield_now().await;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| ProviderError::UserNotFound(uid.to_string()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<ProviderUserRecord, ProviderError> {
        tokio::task::yield_now().await;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.email.as_deref() == Some(email))
            .cloned()
            .ok_or_else(|| ProviderError::UserNotFound(email.to_string()))
    }
}

/// JWKS document publishing the test signing key under `kid`.
pub fn jwks_json(kid: &str) -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": TEST_KEY_MODULUS,
            "e": TEST_KEY_EXPONENT,
        }]
    })
}

/// Claims of a Firebase ID token, as Google would mint them.
#[derive(Debug, Clone, Serialize)]
pub struct FirebaseTestClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub auth_time: i64,
    pub iat: i64,
    pub exp: i64,
}

impl FirebaseTestClaims {
    /// Claims for `uid` that pass verification against [`TEST_PROJECT_ID`].
    pub fn valid(uid: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            iss: format!("https://securetoken.google.com/{}", TEST_PROJECT_ID),
            aud: TEST_PROJECT_ID.to_string(),
            sub: uid.to_string(),
            email: None,
            email_verified: false,
            name: None,
            picture: None,
            auth_time: now - 60,
            iat: now - 60,
            exp: now + 3600,
        }
    }
}

pub fn sign_firebase_token(claims: &FirebaseTestClaims, kid: &str) -> String {
    let header = Header {
        alg: Algorithm::RS256,
        kid: Some(kid.to_string()),
        ..Default::default()
    };
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY_PEM.as_bytes())
        .expect("Failed to load test signing key");

    encode(&header, claims, &key).expect("Failed to encode JWT")
}

/// Service-account key file contents with `token_uri` pointing at a test server.
pub fn service_account_json(token_uri: &str) -> String {
    serde_json::json!({
        "type": "service_account",
        "project_id": TEST_PROJECT_ID,
        "private_key_id": TEST_KID,
        "private_key": TEST_PRIVATE_KEY_PEM,
        "client_email": format!("firebase-adminsdk@{}.iam.gserviceaccount.com", TEST_PROJECT_ID),
        "token_uri": token_uri,
    })
    .to_string()
}
