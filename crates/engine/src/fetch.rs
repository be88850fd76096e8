use crate::{Error, Result};
use stacforge_store::{Cloud, StoreProvider, TokenCache, download_from_url};
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tokio::runtime::Handle;

/// Blocking access to remote resources for template helpers.
///
/// Template rendering runs on a blocking worker thread, so the helpers
/// that reach out to storage (`get_text`, `get_xml`, `get_json`, raster
/// opens) go through this trait rather than through async I/O directly.
pub trait RemoteFetcher: Send + Sync + Debug {
    /// Fetches a remote text resource.
    fn fetch_text(&self, url: &str) -> Result<String>;

    /// Returns a storage bearer token for raster access, if one is
    /// available in this deployment.
    fn storage_token(&self) -> Result<Option<String>>;
}

/// The production fetcher: reads through a [StoreProvider], re-entering
/// the runtime that owns the store's I/O.
#[derive(Debug)]
pub struct StoreFetcher {
    provider: Arc<dyn StoreProvider>,
    tokens: Option<TokenCache>,
    cloud: Cloud,
    handle: Handle,
}

impl StoreFetcher {
    /// Creates a fetcher over a provider.
    ///
    /// Must be called within a tokio runtime; the runtime's handle is
    /// captured so that blocking workers can drive the async reads.
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        tokens: Option<TokenCache>,
        cloud: Cloud,
    ) -> StoreFetcher {
        StoreFetcher {
            provider,
            tokens,
            cloud,
            handle: Handle::current(),
        }
    }
}

impl RemoteFetcher for StoreFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self
            .handle
            .block_on(download_from_url(self.provider.as_ref(), url))?;
        String::from_utf8(bytes.to_vec()).map_err(Error::from)
    }

    fn storage_token(&self) -> Result<Option<String>> {
        match &self.tokens {
            Some(tokens) => {
                let token = self.handle.block_on(tokens.get(self.cloud.storage_scope))?;
                Ok(Some(token.token))
            }
            None => Ok(None),
        }
    }
}

/// A canned fetcher for tests: URLs map to fixed bodies.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    texts: HashMap<String, String>,
}

impl StaticFetcher {
    /// Creates a fetcher serving the given URL to body mapping.
    pub fn new<I, K, V>(texts: I) -> StaticFetcher
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        StaticFetcher {
            texts: texts
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl RemoteFetcher for StaticFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        self.texts
            .get(url)
            .cloned()
            .ok_or_else(|| Error::TemplateRuntime(format!("no fixture for url: {url}")))
    }

    fn storage_token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
