use crate::{
    Cloud, Error, Permissions, Result, TokenCache,
    glob::translate,
    retry::retry_transient,
    sas::{UserDelegationKey, format_time, key_request_body, sign_container_sas, start_time},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{
    ObjectStore, PutMode, PutOptions, PutPayload,
    azure::{AzureCredential, MicrosoftAzureBuilder},
    memory::InMemory,
    path::Path,
};
use std::{collections::HashMap, fmt::Debug, sync::Arc, sync::Mutex};
use url::Url;

const STORAGE_API_VERSION: &str = "2022-11-02";

/// The pieces of a canonical blob URL
/// (`https://<account>.blob.<suffix>/<container>/<key>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobUrl {
    /// The storage account name.
    pub account: String,

    /// The container name.
    pub container: String,

    /// The blob key within the container.
    pub blob: String,
}

impl BlobUrl {
    /// Parses a canonical blob URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use stacforge_store::BlobUrl;
    ///
    /// let url = BlobUrl::parse("https://acct.blob.core.windows.net/scenes/a/b.tif").unwrap();
    /// assert_eq!(url.account, "acct");
    /// assert_eq!(url.container, "scenes");
    /// assert_eq!(url.blob, "a/b.tif");
    /// ```
    pub fn parse(url: &str) -> Result<BlobUrl> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidBlobUrl(url.to_string()))?;
        let account = host
            .split_once('.')
            .filter(|(_, rest)| rest.starts_with("blob."))
            .map(|(account, _)| account.to_string())
            .ok_or_else(|| Error::InvalidBlobUrl(url.to_string()))?;
        let mut segments = parsed
            .path_segments()
            .ok_or_else(|| Error::InvalidBlobUrl(url.to_string()))?;
        let container = segments
            .next()
            .filter(|container| !container.is_empty())
            .ok_or_else(|| Error::InvalidBlobUrl(url.to_string()))?
            .to_string();
        let blob = segments.collect::<Vec<_>>().join("/");
        if blob.is_empty() {
            return Err(Error::InvalidBlobUrl(url.to_string()));
        }
        Ok(BlobUrl {
            account,
            container,
            blob,
        })
    }
}

/// A uniform read/write/list/delegation surface over one blob container.
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// The storage account this store talks to.
    fn account(&self) -> &str;

    /// The container this store is scoped to.
    fn container(&self) -> &str;

    /// The canonical URL of a blob in this container.
    fn url_for(&self, name: &str) -> String;

    /// The canonical URL of the container itself.
    fn container_url(&self) -> String;

    /// Stores a blob and returns its canonical URL.
    ///
    /// Read-only handles reject the call.
    async fn upload(&self, name: &str, data: Bytes, overwrite: bool) -> Result<String>;

    /// Lists blobs, optionally under a prefix, optionally filtered by a
    /// shell-style glob applied to the blob name. Returns canonical URLs.
    async fn list(&self, prefix: Option<&str>, pattern: Option<&str>) -> Result<Vec<String>>;

    /// Downloads a blob's full body.
    async fn download(&self, name: &str) -> Result<Bytes>;

    /// Creates the container if it is missing.
    ///
    /// Read-only handles reject the call.
    async fn ensure_container(&self) -> Result<()>;

    /// Mints a time-limited delegation credential scoped to the container.
    ///
    /// The credential's start time is backdated five minutes to tolerate
    /// clock skew.
    async fn container_sas(&self, expiry: DateTime<Utc>, permissions: Permissions)
    -> Result<String>;
}

fn filter_names<I>(names: I, base_url: &str, pattern: Option<&str>) -> Result<Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let regex = pattern.map(translate).transpose()?;
    Ok(names
        .into_iter()
        .filter(|name| regex.as_ref().is_none_or(|regex| regex.is_match(name)))
        .map(|name| format!("{base_url}/{name}"))
        .collect())
}

#[derive(Debug)]
struct BearerCredentialProvider {
    tokens: TokenCache,
    scope: &'static str,
}

#[async_trait]
impl object_store::CredentialProvider for BearerCredentialProvider {
    type Credential = AzureCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AzureCredential>> {
        let token = self
            .tokens
            .get(self.scope)
            .await
            .map_err(|err| object_store::Error::Generic {
                store: "MicrosoftAzure",
                source: Box::new(err),
            })?;
        Ok(Arc::new(AzureCredential::BearerToken(token.token)))
    }
}

/// A [BlobStore] over an Azure blob container.
#[derive(Debug)]
pub struct AzureBlobStore {
    account: String,
    container: String,
    cloud: Cloud,
    tokens: TokenCache,
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    read_only: bool,
}

impl AzureBlobStore {
    /// Creates a new store for a container.
    pub fn new(
        account: impl ToString,
        container: impl ToString,
        cloud: Cloud,
        tokens: TokenCache,
        read_only: bool,
    ) -> Result<AzureBlobStore> {
        let account = account.to_string();
        let container = container.to_string();
        let credentials = Arc::new(BearerCredentialProvider {
            tokens: tokens.clone(),
            scope: cloud.storage_scope,
        });
        let store = MicrosoftAzureBuilder::new()
            .with_account(&account)
            .with_container_name(&container)
            .with_endpoint(cloud.blob_endpoint(&account))
            .with_credentials(credentials)
            .build()?;
        Ok(AzureBlobStore {
            account,
            container,
            cloud,
            tokens,
            store: Arc::new(store),
            http: reqwest::Client::new(),
            read_only,
        })
    }

    async fn bearer(&self) -> Result<String> {
        let token = self.tokens.get(self.cloud.storage_scope).await?;
        Ok(format!("Bearer {}", token.token))
    }

    async fn try_put(&self, path: &Path, data: Bytes, options: PutOptions) -> Result<()> {
        let _ = self
            .store
            .put_opts(path, PutPayload::from(data), options)
            .await?;
        Ok(())
    }

    async fn try_list(&self, prefix: Option<&Path>) -> Result<Vec<String>> {
        self.store
            .list(prefix)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(Error::from)
    }

    async fn try_get(&self, path: &Path) -> Result<Bytes> {
        self.store
            .get(path)
            .await?
            .bytes()
            .await
            .map_err(Error::from)
    }

    async fn try_delegation_key(&self, url: &str, body: &str) -> Result<String> {
        let response = self
            .http
            .post(url)
            .header("Authorization", self.bearer().await?)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("Content-Type", "application/xml")
            .body(body.to_string())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.text().await?)
        } else {
            Err(Error::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn fetch_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey> {
        let url = format!(
            "{}/?restype=service&comp=userdelegationkey",
            self.cloud.blob_endpoint(&self.account)
        );
        let body = key_request_body(start, expiry);
        let response = retry_transient("user delegation key request", || {
            self.try_delegation_key(&url, &body)
        })
        .await?;
        UserDelegationKey::from_xml(&response)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn account(&self) -> &str {
        &self.account
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.container_url(), name)
    }

    fn container_url(&self) -> String {
        format!(
            "{}/{}",
            self.cloud.blob_endpoint(&self.account),
            self.container
        )
    }

    async fn upload(&self, name: &str, data: Bytes, overwrite: bool) -> Result<String> {
        if self.read_only {
            return Err(Error::ReadOnly("upload"));
        }
        tracing::debug!(
            "uploading blob {name} to container {} at {}",
            self.container,
            self.account
        );
        let path = Path::parse(name)?;
        let options = PutOptions::from(if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::Create
        });
        retry_transient("blob upload", || {
            self.try_put(&path, data.clone(), options.clone())
        })
        .await?;
        Ok(self.url_for(name))
    }

    async fn list(&self, prefix: Option<&str>, pattern: Option<&str>) -> Result<Vec<String>> {
        tracing::debug!(
            prefix = prefix.unwrap_or("none"),
            pattern = pattern.unwrap_or("none"),
            "listing blobs in container {} at {}",
            self.container,
            self.account
        );
        let prefix = prefix.map(Path::parse).transpose()?;
        let names: Vec<String> =
            retry_transient("blob listing", || self.try_list(prefix.as_ref())).await?;
        let blobs = filter_names(names, &self.container_url(), pattern)?;
        tracing::debug!("found {} blobs", blobs.len());
        Ok(blobs)
    }

    async fn download(&self, name: &str) -> Result<Bytes> {
        tracing::debug!(
            "downloading blob {name} from container {} at {}",
            self.container,
            self.account
        );
        let path = Path::parse(name)?;
        retry_transient("blob download", || self.try_get(&path)).await
    }

    async fn ensure_container(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly("ensure_container"));
        }
        let url = format!("{}?restype=container", self.container_url());
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.bearer().await?)
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() != 404 {
            return Err(Error::Http {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        tracing::info!(
            "creating container {} at {}",
            self.container,
            self.account
        );
        let response = self
            .http
            .put(&url)
            .header("Authorization", self.bearer().await?)
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Http {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn container_sas(
        &self,
        expiry: DateTime<Utc>,
        permissions: Permissions,
    ) -> Result<String> {
        let start = start_time();
        tracing::debug!(
            "generating delegation credential for container {} at {} with permissions '{}' expiring at {}",
            self.container,
            self.account,
            permissions,
            format_time(expiry),
        );
        let key = self.fetch_delegation_key(start, expiry).await?;
        sign_container_sas(
            &key,
            &self.account,
            &self.container,
            start,
            expiry,
            permissions,
        )
    }
}

/// A [BlobStore] over an in-memory object store.
///
/// Instances handed out by one [MemoryStoreProvider] for the same account
/// and container share contents, so activities and assertions see each
/// other's writes.
#[derive(Clone, Debug)]
pub struct MemoryBlobStore {
    account: String,
    container: String,
    store: Arc<InMemory>,
    read_only: bool,
}

impl MemoryBlobStore {
    /// Creates a new, empty in-memory store.
    pub fn new(account: impl ToString, container: impl ToString) -> MemoryBlobStore {
        MemoryBlobStore {
            account: account.to_string(),
            container: container.to_string(),
            store: Arc::new(InMemory::new()),
            read_only: false,
        }
    }

    fn with_read_only(&self, read_only: bool) -> MemoryBlobStore {
        MemoryBlobStore {
            read_only,
            ..self.clone()
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn account(&self) -> &str {
        &self.account
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.container_url(), name)
    }

    fn container_url(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}",
            self.account, self.container
        )
    }

    async fn upload(&self, name: &str, data: Bytes, overwrite: bool) -> Result<String> {
        if self.read_only {
            return Err(Error::ReadOnly("upload"));
        }
        let path = Path::parse(name)?;
        let options = PutOptions::from(if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::Create
        });
        let _ = self
            .store
            .put_opts(&path, PutPayload::from(data), options)
            .await?;
        Ok(self.url_for(name))
    }

    async fn list(&self, prefix: Option<&str>, pattern: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.map(Path::parse).transpose()?;
        let names: Vec<String> = self
            .store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        filter_names(names, &self.container_url(), pattern)
    }

    async fn download(&self, name: &str) -> Result<Bytes> {
        let path = Path::parse(name)?;
        self.store
            .get(&path)
            .await?
            .bytes()
            .await
            .map_err(Error::from)
    }

    async fn ensure_container(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly("ensure_container"));
        }
        Ok(())
    }

    async fn container_sas(
        &self,
        expiry: DateTime<Utc>,
        permissions: Permissions,
    ) -> Result<String> {
        Ok(format!(
            "sv={STORAGE_API_VERSION}&sr=c&sp={permissions}&st={}&se={}&sig=memory",
            format_time(start_time()),
            format_time(expiry),
        ))
    }
}

/// Hands out [BlobStore]s for containers.
///
/// Crawlers, activities, and the ingestion source manager acquire their
/// gateways through this trait so tests can substitute in-memory storage.
pub trait StoreProvider: Send + Sync + Debug {
    /// Returns a store for the given account and container.
    fn store(&self, account: &str, container: &str, read_only: bool) -> Result<Arc<dyn BlobStore>>;

    /// Returns the store that generated items and collections are written
    /// to, per the `DATA_STORAGE_ACCOUNT`/`DATA_CONTAINER` configuration.
    fn export_store(&self) -> Result<Arc<dyn BlobStore>>;
}

/// The production [StoreProvider], backed by Azure storage.
#[derive(Clone, Debug)]
pub struct AzureStoreProvider {
    cloud: Cloud,
    tokens: TokenCache,
}

impl AzureStoreProvider {
    /// Creates a new provider.
    pub fn new(cloud: Cloud, tokens: TokenCache) -> AzureStoreProvider {
        AzureStoreProvider { cloud, tokens }
    }
}

impl StoreProvider for AzureStoreProvider {
    fn store(&self, account: &str, container: &str, read_only: bool) -> Result<Arc<dyn BlobStore>> {
        Ok(Arc::new(AzureBlobStore::new(
            account,
            container,
            self.cloud,
            self.tokens.clone(),
            read_only,
        )?))
    }

    fn export_store(&self) -> Result<Arc<dyn BlobStore>> {
        let account = std::env::var("DATA_STORAGE_ACCOUNT")
            .or_else(|_| std::env::var("AzureWebJobsStorage__accountName"))
            .map_err(|_| Error::MissingConfig("DATA_STORAGE_ACCOUNT"))?;
        let container =
            std::env::var("DATA_CONTAINER").unwrap_or_else(|_| "collections".to_string());
        self.store(&account, &container, false)
    }
}

/// An in-memory [StoreProvider] for tests and local runs.
#[derive(Debug)]
pub struct MemoryStoreProvider {
    account: String,
    container: String,
    stores: Mutex<HashMap<(String, String), MemoryBlobStore>>,
}

impl MemoryStoreProvider {
    /// Creates a provider whose export store lives in the given account
    /// and container.
    pub fn new(account: impl ToString, container: impl ToString) -> MemoryStoreProvider {
        MemoryStoreProvider {
            account: account.to_string(),
            container: container.to_string(),
            stores: Mutex::new(HashMap::new()),
        }
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn store(&self, account: &str, container: &str, read_only: bool) -> Result<Arc<dyn BlobStore>> {
        let mut stores = self.stores.lock().unwrap();
        let store = stores
            .entry((account.to_string(), container.to_string()))
            .or_insert_with(|| MemoryBlobStore::new(account, container));
        Ok(Arc::new(store.with_read_only(read_only)))
    }

    fn export_store(&self) -> Result<Arc<dyn BlobStore>> {
        self.store(&self.account, &self.container, false)
    }
}

/// Downloads a blob's full body given its canonical URL.
///
/// The URL is parsed into account, container, and blob, and a one-shot
/// read-only store performs the read.
pub async fn download_from_url(provider: &dyn StoreProvider, url: &str) -> Result<Bytes> {
    let blob_url = BlobUrl::parse(url)?;
    let store = provider.store(&blob_url.account, &blob_url.container, true)?;
    store.download(&blob_url.blob).await
}

#[cfg(test)]
mod tests {
    use super::{BlobStore, BlobUrl, MemoryBlobStore, MemoryStoreProvider, StoreProvider};
    use crate::{Error, Permissions, download_from_url};
    use chrono::{Duration, Utc};

    #[test]
    fn parse_blob_url() {
        let url = BlobUrl::parse("https://acct.blob.core.windows.net/in/scenes/a.tif").unwrap();
        assert_eq!(url.account, "acct");
        assert_eq!(url.container, "in");
        assert_eq!(url.blob, "scenes/a.tif");
    }

    #[test]
    fn parse_blob_url_rejects_non_blob_hosts() {
        assert!(BlobUrl::parse("https://example.com/in/a.tif").is_err());
        assert!(BlobUrl::parse("https://acct.blob.core.windows.net/onlycontainer").is_err());
    }

    #[tokio::test]
    async fn upload_and_download() {
        let store = MemoryBlobStore::new("acct", "in");
        let url = store.upload("a/b.json", "{}".into(), true).await.unwrap();
        assert_eq!(url, "https://acct.blob.core.windows.net/in/a/b.json");
        let body = store.download("a/b.json").await.unwrap();
        assert_eq!(body.as_ref(), b"{}");
    }

    #[tokio::test]
    async fn upload_without_overwrite() {
        let store = MemoryBlobStore::new("acct", "in");
        let _ = store.upload("a.json", "{}".into(), false).await.unwrap();
        assert!(store.upload("a.json", "{}".into(), false).await.is_err());
        let _ = store.upload("a.json", "{}".into(), true).await.unwrap();
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let provider = MemoryStoreProvider::new("acct", "collections");
        let store = provider.store("acct", "in", true).unwrap();
        let err = store.upload("a.json", "{}".into(), true).await.unwrap_err();
        assert!(matches!(err, Error::ReadOnly(_)));
        assert!(store.ensure_container().await.is_err());
    }

    #[tokio::test]
    async fn list_with_glob() {
        let store = MemoryBlobStore::new("acct", "in");
        for name in [
            "scenes/a.tif",
            "scenes/2024/b.tif",
            "scenes/c.json",
            "L2A_x.json",
            "L1C_y.json",
        ] {
            let _ = store.upload(name, "x".into(), true).await.unwrap();
        }
        let tifs = store.list(None, Some("**/*.tif")).await.unwrap();
        assert_eq!(
            tifs,
            vec![
                "https://acct.blob.core.windows.net/in/scenes/2024/b.tif",
                "https://acct.blob.core.windows.net/in/scenes/a.tif",
            ]
        );
        let l2a = store.list(None, Some("L2A_*.json")).await.unwrap();
        assert_eq!(l2a, vec!["https://acct.blob.core.windows.net/in/L2A_x.json"]);
        let nothing = store.list(None, Some("*.nonexistent")).await.unwrap();
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn list_with_prefix() {
        let store = MemoryBlobStore::new("acct", "out");
        let _ = store.upload("run-1/items/a.json", "{}".into(), true).await.unwrap();
        let _ = store.upload("run-1/collection.json", "{}".into(), true).await.unwrap();
        let _ = store.upload("run-2/items/b.json", "{}".into(), true).await.unwrap();
        let items = store
            .list(Some("run-1/items"), Some("*.json"))
            .await
            .unwrap();
        assert_eq!(
            items,
            vec!["https://acct.blob.core.windows.net/out/run-1/items/a.json"]
        );
    }

    #[tokio::test]
    async fn provider_shares_contents() {
        let provider = MemoryStoreProvider::new("acct", "collections");
        let writer = provider.store("acct", "in", false).unwrap();
        let _ = writer.upload("a.json", "{}".into(), true).await.unwrap();
        let reader = provider.store("acct", "in", true).unwrap();
        assert_eq!(reader.download("a.json").await.unwrap().as_ref(), b"{}");
        let body = download_from_url(&provider, "https://acct.blob.core.windows.net/in/a.json")
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"{}");
    }

    #[tokio::test]
    async fn memory_sas_shape() {
        let store = MemoryBlobStore::new("acct", "in");
        let sas = store
            .container_sas(Utc::now() + Duration::hours(24), Permissions::read_list())
            .await
            .unwrap();
        assert!(sas.contains("sr=c"));
        assert!(sas.contains("sp=rl"));
    }
}
