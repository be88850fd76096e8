use crate::{
    DEFAULT_API_VERSION, Error, Result, SourceSummary,
    models::{
        IngestionResponse, IngestionSource, RunResponse, SAS_TOKEN_SOURCE_TYPE, SourceList,
    },
};
use chrono::{Duration, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use stacforge_store::{BlobStore, BlobUrl, Permissions, StoreProvider, TokenCache, retry_transient};
use std::collections::HashMap;
use url::Url;

/// When to refresh and how long new credentials live.
///
/// An existing credential is refreshed when it expires within `min_hours`;
/// a freshly minted credential lives for `default_hours`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    /// The refresh grace window, in hours.
    pub min_hours: i64,

    /// The lifetime of newly minted credentials, in hours.
    pub default_hours: i64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy {
            min_hours: 12,
            default_hours: 24,
        }
    }
}

impl TtlPolicy {
    /// Reads the policy from `MIN_SAS_TOKEN_EXPIRATION_HOURS` and
    /// `DEFAULT_SAS_TOKEN_EXPIRATION_HOURS`, defaulting to 12 and 24.
    pub fn from_env() -> TtlPolicy {
        let hours = |name: &str, fallback: i64| {
            std::env::var(name)
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(fallback)
        };
        TtlPolicy {
            min_hours: hours("MIN_SAS_TOKEN_EXPIRATION_HOURS", 12),
            default_hours: hours("DEFAULT_SAS_TOKEN_EXPIRATION_HOURS", 24),
        }
    }
}

/// A client for the catalog ingestion API.
///
/// Every request carries a bearer token from the shared token cache and
/// the `api-version` query parameter. Transient failures (408, 429, 5xx)
/// are retried three times at a fixed two second interval.
#[derive(Clone, Debug)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenCache,
    scope: String,
    api_version: String,
    policy: TtlPolicy,
}

impl CatalogClient {
    /// Creates a new client for a catalog.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use stacforge_catalog::CatalogClient;
    /// use stacforge_store::{StaticTokenProvider, TokenCache};
    ///
    /// let tokens = TokenCache::new(Arc::new(StaticTokenProvider::new("token")));
    /// let client = CatalogClient::new(
    ///     "https://example.geocatalog.spatio.azure.com",
    ///     "https://geocatalog.spatio.azure.com/.default",
    ///     tokens,
    /// )
    /// .unwrap();
    /// ```
    pub fn new(catalog_url: &str, scope: impl ToString, tokens: TokenCache) -> Result<CatalogClient> {
        Ok(CatalogClient {
            http: reqwest::Client::builder()
                .user_agent(concat!("stacforge/", env!("CARGO_PKG_VERSION")))
                .build()?,
            base_url: Url::parse(catalog_url)?,
            tokens,
            scope: scope.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            policy: TtlPolicy::from_env(),
        })
    }

    /// Overrides the API version sent with every request.
    pub fn with_api_version(mut self, api_version: impl ToString) -> CatalogClient {
        self.api_version = api_version.to_string();
        self
    }

    /// Overrides the credential TTL policy.
    pub fn with_policy(mut self, policy: TtlPolicy) -> CatalogClient {
        self.policy = policy;
        self
    }

    async fn request<R>(&self, method: Method, url: Url, body: Option<&Value>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        retry_transient("catalog request", || {
            self.attempt(method.clone(), url.clone(), body)
        })
        .await
    }

    async fn attempt<R>(&self, method: Method, url: Url, body: Option<&Value>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        tracing::debug!("{method} {url}");
        let token = self.tokens.get(&self.scope).await?;
        let mut request = self
            .http
            .request(method, url)
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&token.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(Error::from)
        } else {
            Err(Error::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn get<R>(&self, url: Url) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.request(Method::GET, url, None).await
    }

    async fn post<R>(&self, url: Url, body: &Value) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.request(Method::POST, url, Some(body)).await
    }

    async fn put<R>(&self, url: Url, body: &Value) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.request(Method::PUT, url, Some(body)).await
    }

    fn sources_url(&self) -> Result<Url> {
        self.base_url
            .join("/api/ingestion-sources")
            .map_err(Error::from)
    }

    /// Returns the credential-backed ingestion sources, keyed by container
    /// URL.
    ///
    /// The listing endpoint only returns ids, so each source is fetched
    /// for its details. Sources whose credential has no expiration
    /// (policy-based credentials) are skipped.
    pub async fn ingestion_sources(&self) -> Result<HashMap<String, SourceSummary>> {
        tracing::info!("getting ingestion sources for {}", self.base_url);
        let list_url = self.sources_url()?;
        let list: SourceList = self.get(list_url.clone()).await?;
        let mut sources = HashMap::new();
        for source_id in list.value {
            let url = list_url.join(&format!("ingestion-sources/{}", source_id.id))?;
            let source: IngestionSource = self.get(url).await?;
            if source.source_type != SAS_TOKEN_SOURCE_TYPE {
                continue;
            }
            let container_url = source.connection_info.container_url;
            if let Some(expiration) = source.connection_info.expiration {
                let _ = sources.insert(
                    container_url,
                    SourceSummary {
                        id: source.id,
                        expiration,
                    },
                );
            } else {
                tracing::info!("container {container_url} has a policy based credential");
            }
        }
        tracing::info!("found {} ingestion sources", sources.len());
        Ok(sources)
    }

    /// Creates an ingestion source for a container.
    pub async fn create_ingestion_source(
        &self,
        container_url: &str,
        sas_token: &str,
    ) -> Result<IngestionSource> {
        tracing::info!("creating ingestion source for {container_url}");
        let body = json!({
            "sourceType": SAS_TOKEN_SOURCE_TYPE,
            "connectionInfo": {
                "containerUrl": container_url,
                "sasToken": sas_token,
            },
        });
        self.post(self.sources_url()?, &body).await
    }

    /// Replaces the credential on an existing ingestion source.
    pub async fn update_ingestion_source(
        &self,
        id: &str,
        container_url: &str,
        new_sas_token: &str,
    ) -> Result<()> {
        tracing::info!("updating ingestion source {id}");
        let url = self
            .sources_url()?
            .join(&format!("ingestion-sources/{id}"))?;
        let body = json!({
            "id": id,
            "sourceType": SAS_TOKEN_SOURCE_TYPE,
            "connectionInfo": {
                "containerUrl": container_url,
                "sasToken": new_sas_token,
            },
        });
        let _: Value = self.put(url, &body).await?;
        Ok(())
    }

    /// Makes sure the catalog holds a live credential for a container.
    ///
    /// With no source registered for the container, a fresh `{read, list}`
    /// credential is minted and a source created. With a source whose
    /// credential expires within the policy's grace window, a fresh
    /// credential replaces it. Otherwise the existing source is reused.
    pub async fn ensure_ingestion_source(
        &self,
        container_url: &str,
        store: &dyn BlobStore,
    ) -> Result<()> {
        let sources = self.ingestion_sources().await?;
        let expiry = Utc::now() + Duration::hours(self.policy.default_hours);
        match sources.get(container_url) {
            None => {
                tracing::info!("no ingestion source found for {container_url}");
                let sas_token = store.container_sas(expiry, Permissions::read_list()).await?;
                let _ = self.create_ingestion_source(container_url, &sas_token).await?;
            }
            Some(source) => {
                tracing::info!(
                    "found ingestion source for {container_url} with id {}",
                    source.id
                );
                if Utc::now() + Duration::hours(self.policy.min_hours) >= source.expiration {
                    tracing::info!(
                        "the credential for source {} is expired or about to expire",
                        source.id
                    );
                    let sas_token =
                        store.container_sas(expiry, Permissions::read_list()).await?;
                    self.update_ingestion_source(&source.id, container_url, &sas_token)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Starts a bulk ingestion of a static collection.
    ///
    /// The container root is derived from the collection URL (scheme, host,
    /// and first path segment), its ingestion source is created or
    /// refreshed, and a StaticCatalog ingestion plus a run are posted.
    /// Returns the ingestion id and the run's operation id.
    pub async fn bulk_ingest(
        &self,
        collection_id: &str,
        collection_url: &str,
        provider: &dyn StoreProvider,
    ) -> Result<(String, String)> {
        let container_url = container_root(collection_url)?;
        tracing::info!("container url: {container_url}");
        let blob_url = BlobUrl::parse(collection_url)?;
        let store = provider.store(&blob_url.account, &blob_url.container, false)?;
        self.ensure_ingestion_source(&container_url, store.as_ref())
            .await?;

        let ingestions_url = self
            .base_url
            .join(&format!("/api/collections/{collection_id}/ingestions"))?;
        tracing::debug!("creating ingestion for {collection_url} at {ingestions_url}");
        let ingestion: IngestionResponse = self
            .post(
                ingestions_url.clone(),
                &json!({
                    "importType": "StaticCatalog",
                    "sourceCatalogUrl": collection_url,
                    "skipExistingItems": false,
                    "keepOriginalAssets": false,
                }),
            )
            .await?;
        tracing::debug!("ingestion created with id {}", ingestion.ingestion_id);

        let runs_url = self.base_url.join(&format!(
            "/api/collections/{collection_id}/ingestions/{}/runs",
            ingestion.ingestion_id
        ))?;
        let run: RunResponse = self.post(runs_url, &json!({})).await?;
        let run_id = run.operation.operation_id;
        tracing::debug!(
            "ingestion {} running with id {run_id}",
            ingestion.ingestion_id
        );
        Ok((ingestion.ingestion_id, run_id))
    }
}

/// Derives the container root URL from a collection URL: scheme, host, and
/// the first path segment.
fn container_root(collection_url: &str) -> Result<String> {
    let url = Url::parse(collection_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidCollectionUrl(collection_url.to_string()))?;
    let first_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| Error::InvalidCollectionUrl(collection_url.to_string()))?;
    Ok(format!("{}://{}/{}", url.scheme(), host, first_segment))
}

#[cfg(test)]
mod tests {
    use super::{CatalogClient, TtlPolicy, container_root};
    use chrono::{Duration, Utc};
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use stacforge_store::{
        MemoryStoreProvider, StaticTokenProvider, StoreProvider, TokenCache,
    };
    use std::sync::Arc;

    fn client(server: &ServerGuard) -> CatalogClient {
        let tokens = TokenCache::new(Arc::new(StaticTokenProvider::new("test-token")));
        CatalogClient::new(&server.url(), "scope", tokens).unwrap()
    }

    fn api_version() -> Matcher {
        Matcher::UrlEncoded("api-version".into(), "2024-01-31-preview".into())
    }

    #[test]
    fn container_root_from_collection_url() {
        assert_eq!(
            container_root(
                "https://acct.blob.core.windows.net/collections/instance/collection.json"
            )
            .unwrap(),
            "https://acct.blob.core.windows.net/collections"
        );
        assert!(container_root("https://acct.blob.core.windows.net/").is_err());
    }

    #[tokio::test]
    async fn ingestion_sources_two_step() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/api/ingestion-sources")
            .match_query(api_version())
            .match_header("authorization", "Bearer test-token")
            .with_body(json!({"value": [{"id": "one"}, {"id": "two"}]}).to_string())
            .create_async()
            .await;
        let one = server
            .mock("GET", "/api/ingestion-sources/one")
            .match_query(api_version())
            .with_body(
                json!({
                    "id": "one",
                    "sourceType": "SasToken",
                    "connectionInfo": {
                        "containerUrl": "https://acct.blob.core.windows.net/collections",
                        "sasToken": "sig=abc",
                        "expiration": "2030-01-01T00:00:00Z"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        // Policy-based credential, no expiration: skipped.
        let two = server
            .mock("GET", "/api/ingestion-sources/two")
            .match_query(api_version())
            .with_body(
                json!({
                    "id": "two",
                    "sourceType": "SasToken",
                    "connectionInfo": {
                        "containerUrl": "https://acct.blob.core.windows.net/other"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let sources = client(&server).ingestion_sources().await.unwrap();
        list.assert_async().await;
        one.assert_async().await;
        two.assert_async().await;
        assert_eq!(sources.len(), 1);
        assert_eq!(
            sources["https://acct.blob.core.windows.net/collections"].id,
            "one"
        );
    }

    #[tokio::test]
    async fn bulk_ingest_refreshes_expiring_source() {
        let mut server = Server::new_async().await;
        let expiration = Utc::now() + Duration::hours(1);
        let _list = server
            .mock("GET", "/api/ingestion-sources")
            .match_query(api_version())
            .with_body(json!({"value": [{"id": "one"}]}).to_string())
            .create_async()
            .await;
        let _detail = server
            .mock("GET", "/api/ingestion-sources/one")
            .match_query(api_version())
            .with_body(
                json!({
                    "id": "one",
                    "sourceType": "SasToken",
                    "connectionInfo": {
                        "containerUrl": "https://acct.blob.core.windows.net/collections",
                        "sasToken": "sig=old",
                        "expiration": expiration.to_rfc3339()
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/api/ingestion-sources/one")
            .match_query(api_version())
            .match_body(Matcher::Regex("\"sasToken\":\"s".to_string()))
            .with_body("{}")
            .create_async()
            .await;
        let ingestion = server
            .mock("POST", "/api/collections/c1/ingestions")
            .match_query(api_version())
            .match_body(Matcher::Json(json!({
                "importType": "StaticCatalog",
                "sourceCatalogUrl":
                    "https://acct.blob.core.windows.net/collections/instance/collection.json",
                "skipExistingItems": false,
                "keepOriginalAssets": false,
            })))
            .with_body(json!({"ingestionId": "ing-1"}).to_string())
            .create_async()
            .await;
        let run = server
            .mock("POST", "/api/collections/c1/ingestions/ing-1/runs")
            .match_query(api_version())
            .with_body(json!({"operation": {"operationId": "run-1"}}).to_string())
            .create_async()
            .await;

        let provider = MemoryStoreProvider::new("acct", "collections");
        let (ingestion_id, run_id) = client(&server)
            .bulk_ingest(
                "c1",
                "https://acct.blob.core.windows.net/collections/instance/collection.json",
                &provider,
            )
            .await
            .unwrap();
        update.assert_async().await;
        ingestion.assert_async().await;
        run.assert_async().await;
        assert_eq!(ingestion_id, "ing-1");
        assert_eq!(run_id, "run-1");
    }

    #[tokio::test]
    async fn fresh_source_is_reused() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/api/ingestion-sources")
            .match_query(api_version())
            .with_body(json!({"value": [{"id": "one"}]}).to_string())
            .create_async()
            .await;
        let _detail = server
            .mock("GET", "/api/ingestion-sources/one")
            .match_query(api_version())
            .with_body(
                json!({
                    "id": "one",
                    "sourceType": "SasToken",
                    "connectionInfo": {
                        "containerUrl": "https://acct.blob.core.windows.net/collections",
                        "sasToken": "sig=current",
                        "expiration": (Utc::now() + Duration::hours(48)).to_rfc3339()
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/api/ingestion-sources/one")
            .expect(0)
            .create_async()
            .await;

        let provider = MemoryStoreProvider::new("acct", "collections");
        let store = provider.store("acct", "collections", false).unwrap();
        client(&server)
            .ensure_ingestion_source(
                "https://acct.blob.core.windows.net/collections",
                store.as_ref(),
            )
            .await
            .unwrap();
        update.assert_async().await;
    }

    #[tokio::test]
    async fn missing_source_is_created() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/api/ingestion-sources")
            .match_query(api_version())
            .with_body(json!({"value": []}).to_string())
            .create_async()
            .await;
        let create = server
            .mock("POST", "/api/ingestion-sources")
            .match_query(api_version())
            .match_body(Matcher::PartialJson(json!({
                "sourceType": "SasToken",
                "connectionInfo": {
                    "containerUrl": "https://acct.blob.core.windows.net/collections"
                }
            })))
            .with_body(
                json!({
                    "id": "new",
                    "sourceType": "SasToken",
                    "connectionInfo": {
                        "containerUrl": "https://acct.blob.core.windows.net/collections",
                        "sasToken": "sig=new",
                        "expiration": (Utc::now() + Duration::hours(24)).to_rfc3339()
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = MemoryStoreProvider::new("acct", "collections");
        let store = provider.store("acct", "collections", false).unwrap();
        client(&server)
            .ensure_ingestion_source(
                "https://acct.blob.core.windows.net/collections",
                store.as_ref(),
            )
            .await
            .unwrap();
        create.assert_async().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_in_four_attempts() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/api/ingestion-sources")
            .match_query(api_version())
            .with_status(500)
            .expect(4)
            .create_async()
            .await;
        let result = client(&server).ingestion_sources().await;
        list.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/api/ingestion-sources")
            .match_query(api_version())
            .with_status(400)
            .expect(1)
            .create_async()
            .await;
        let result = client(&server).ingestion_sources().await;
        list.assert_async().await;
        assert!(result.is_err());
    }

    #[test]
    fn policy_defaults() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.min_hours, 12);
        assert_eq!(policy.default_hours, 24);
    }
}
