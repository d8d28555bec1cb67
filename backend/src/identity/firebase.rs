use std::env;
use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    AccessTokenSource, Credentials, DecodedIdentity, FirebaseTokenVerifier, IdentityProvider,
    ProviderError, ProviderUserRecord,
};
use crate::config::FirebaseConfig;

/// Identity Toolkit `accounts:lookup` response.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    disabled: bool,
}

impl From<AccountInfo> for ProviderUserRecord {
    fn from(info: AccountInfo) -> Self {
        Self {
            uid: info.local_id,
            email: info.email,
            display_name: info.display_name,
            phone_number: info.phone_number,
            photo_url: info.photo_url,
            disabled: info.disabled,
        }
    }
}

/// Firebase Authentication, talking to Google's public endpoints.
pub struct FirebaseAuth {
    http_client: Client,
    project_id: String,
    identity_toolkit_url: String,
    verifier: FirebaseTokenVerifier,
    access_tokens: AccessTokenSource,
}

impl FirebaseAuth {
    /// Build the provider from configuration and ambient credentials.
    ///
    /// Credentials come from `firebase.credentials`, else the file named by
    /// `GOOGLE_APPLICATION_CREDENTIALS`, else the metadata server.
    pub async fn initialize(config: &FirebaseConfig) -> Result<Self, ProviderError> {
        let adc_file = env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from);
        let credentials = Credentials::resolve(
            config.credentials.as_deref(),
            adc_file,
            &config.metadata_url,
        )?;
        Self::with_credentials(config, credentials).await
    }

    /// Build the provider with explicit credentials.
    pub async fn with_credentials(
        config: &FirebaseConfig,
        credentials: Credentials,
    ) -> Result<Self, ProviderError> {
        let http_client = Client::new();

        let project_id = match config
            .project_id
            .clone()
            .or_else(|| credentials.project_id().map(String::from))
            .or_else(|| env::var("GOOGLE_CLOUD_PROJECT").ok())
        {
            Some(id) => id,
            None => credentials
                .discover_project_id(&http_client)
                .await
                .ok_or(ProviderError::MissingProjectId)?,
        };

        let verifier =
            FirebaseTokenVerifier::new(http_client.clone(), &config.jwks_url, &project_id).await?;

        tracing::info!("Firebase Auth initialized for project {}", project_id);

        Ok(Self {
            access_tokens: AccessTokenSource::new(http_client.clone(), credentials),
            http_client,
            project_id,
            identity_toolkit_url: config.identity_toolkit_url.trim_end_matches('/').to_string(),
            verifier,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn lookup(
        &self,
        body: serde_json::Value,
        subject: &str,
    ) -> Result<ProviderUserRecord, ProviderError> {
        let token = self.access_tokens.token().await?;
        let url = format!(
            "{}/v1/projects/{}/accounts:lookup",
            self.identity_toolkit_url, self.project_id
        );

        let response = self.http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Lookup(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Lookup(format!("{}: {}", status, text)));
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Lookup(e.to_string()))?;

        lookup
            .users
            .into_iter()
            .next()
            .map(ProviderUserRecord::from)
            .ok_or_else(|| ProviderError::UserNotFound(subject.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    async fn verify_id_token(&self, token: &str) -> Result<DecodedIdentity, ProviderError> {
        self.verifier.verify(token).await
    }

    async fn get_user(&self, uid: &str) -> Result<ProviderUserRecord, ProviderError> {
        self.lookup(json!({ "localId": [uid] }), uid).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<ProviderUserRecord, ProviderError> {
        self.lookup(json!({ "email": [email] }), email).await
    }
}
