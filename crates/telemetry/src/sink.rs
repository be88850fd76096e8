use crate::Entity;
use async_trait::async_trait;
use stacforge_store::{Cloud, Error, Result, TokenCache};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

const TABLES_API_VERSION: &str = "2019-02-02";

/// A destination for shipped log entities.
#[async_trait]
pub trait TableSink: Send + Sync + Debug {
    /// Writes (or replaces) one entity.
    async fn write(&self, entity: Entity) -> Result<()>;
}

/// A sink that upserts entities into an Azure storage table.
#[derive(Debug)]
pub struct AzureTableSink {
    endpoint: String,
    table: String,
    cloud: Cloud,
    tokens: TokenCache,
    http: reqwest::Client,
}

impl AzureTableSink {
    /// Creates a sink for a table, creating the table if it is missing.
    pub fn new(account: &str, table: impl ToString, cloud: Cloud, tokens: TokenCache) -> AzureTableSink {
        AzureTableSink {
            endpoint: cloud.table_endpoint(account),
            table: table.to_string(),
            cloud,
            tokens,
            http: reqwest::Client::new(),
        }
    }

    /// Creates a sink from the `LOGS_STORAGE_ACCOUNT` (falling back to the
    /// host-provided web-jobs account) and `LOGS_TABLE` environment
    /// variables.
    pub fn from_env(cloud: Cloud, tokens: TokenCache) -> Result<AzureTableSink> {
        let account = std::env::var("LOGS_STORAGE_ACCOUNT")
            .or_else(|_| std::env::var("AzureWebJobsStorage__accountName"))
            .map_err(|_| Error::MissingConfig("LOGS_STORAGE_ACCOUNT"))?;
        let table = std::env::var("LOGS_TABLE").unwrap_or_else(|_| "logs".to_string());
        Ok(AzureTableSink::new(&account, table, cloud, tokens))
    }

    async fn bearer(&self) -> Result<String> {
        let token = self.tokens.get(self.cloud.storage_scope).await?;
        Ok(format!("Bearer {}", token.token))
    }

    /// Creates the table; a conflict means it already exists.
    pub async fn ensure_table(&self) -> Result<()> {
        let url = format!("{}/Tables", self.endpoint);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer().await?)
            .header("x-ms-version", TABLES_API_VERSION)
            .header("Accept", "application/json;odata=nometadata")
            .json(&serde_json::json!({"TableName": self.table}))
            .send()
            .await?;
        let status = response.status().as_u16();
        if response.status().is_success() || status == 409 {
            Ok(())
        } else {
            Err(Error::Http {
                status,
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl TableSink for AzureTableSink {
    async fn write(&self, entity: Entity) -> Result<()> {
        let partition_key = entity
            .get("PartitionKey")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();
        let row_key = entity
            .get("RowKey")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();
        let url = format!(
            "{}/{}(PartitionKey='{partition_key}',RowKey='{row_key}')",
            self.endpoint, self.table
        );
        let response = self
            .http
            .put(&url)
            .header("Authorization", self.bearer().await?)
            .header("x-ms-version", TABLES_API_VERSION)
            .header("Accept", "application/json;odata=nometadata")
            .json(&entity)
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
}

/// An in-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    entities: Mutex<Vec<Entity>>,
}

impl MemorySink {
    /// Creates a new, empty sink.
    pub fn new() -> Arc<MemorySink> {
        Arc::new(MemorySink::default())
    }

    /// Returns a copy of everything written so far.
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn write(&self, entity: Entity) -> Result<()> {
        self.entities.lock().unwrap().push(entity);
        Ok(())
    }
}
