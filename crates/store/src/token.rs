use crate::{Cloud, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tokio::sync::Mutex;

/// Tokens within this margin of expiry are refreshed before use.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// A bearer token with its expiration time.
#[derive(Clone, Debug)]
pub struct AccessToken {
    /// The token value.
    pub token: String,

    /// When the token stops being accepted.
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        self.expires_on > Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES)
    }
}

/// An abstract source of bearer tokens.
///
/// The pipeline does not prescribe how tokens are acquired; anything that
/// can produce a token for an OAuth scope will do. Production deployments
/// use [ClientSecretProvider]; tests use [StaticTokenProvider].
#[async_trait]
pub trait TokenProvider: Send + Sync + Debug {
    /// Acquires a token for the given scope.
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// A token provider that always returns the same token.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    /// Creates a new static token provider.
    pub fn new(token: impl ToString) -> StaticTokenProvider {
        StaticTokenProvider(token.to_string())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _: &str) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.0.clone(),
            expires_on: Utc::now() + Duration::hours(24),
        })
    }
}

/// Acquires tokens with the OAuth client credentials flow.
///
/// Reads `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, and `AZURE_CLIENT_SECRET`
/// from the environment, the same variables the Azure SDK's environment
/// credential uses.
#[derive(Debug)]
pub struct ClientSecretProvider {
    cloud: Cloud,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl ClientSecretProvider {
    /// Creates a provider from the environment.
    pub fn from_env(cloud: Cloud) -> Result<ClientSecretProvider> {
        Ok(ClientSecretProvider {
            cloud,
            tenant_id: std::env::var("AZURE_TENANT_ID")
                .map_err(|_| Error::MissingConfig("AZURE_TENANT_ID"))?,
            client_id: std::env::var("AZURE_CLIENT_ID")
                .map_err(|_| Error::MissingConfig("AZURE_CLIENT_ID"))?,
            client_secret: std::env::var("AZURE_CLIENT_SECRET")
                .map_err(|_| Error::MissingConfig("AZURE_CLIENT_SECRET"))?,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientSecretProvider {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.cloud.authority, self.tenant_id);
        tracing::debug!("requesting token for scope {scope}");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("scope", scope),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(AccessToken {
            token: token.access_token,
            expires_on: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

/// A process-wide cache of bearer tokens, keyed by scope.
///
/// Tokens are refreshed when they are within five minutes of expiry. The
/// cache serializes refreshes, so concurrent callers never race to mint
/// duplicate tokens for the same scope.
#[derive(Clone, Debug)]
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    tokens: Arc<Mutex<HashMap<String, AccessToken>>>,
}

impl TokenCache {
    /// Creates a new cache over a provider.
    pub fn new(provider: Arc<dyn TokenProvider>) -> TokenCache {
        TokenCache {
            provider,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a fresh token for the scope, refreshing if needed.
    pub async fn get(&self, scope: &str) -> Result<AccessToken> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(scope) {
            if token.is_fresh() {
                return Ok(token.clone());
            }
            tracing::debug!("token for scope {scope} is within the refresh margin");
        }
        let token = self.provider.get_token(scope).await?;
        let _ = tokens.insert(scope.to_string(), token.clone());
        Ok(token)
    }
}
