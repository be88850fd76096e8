use serde_json::Value;
use stacforge::{
    GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME, OrchestrationContext, OrchestrationStatus,
    Orchestrator,
};
use stacforge_catalog::CatalogClient;
use stacforge_store::{StoreProvider, TokenCache};
use std::{collections::HashMap, sync::Arc, sync::RwLock};
use uuid::Uuid;

/// The in-memory store of live and finished orchestration instances.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    instances: Arc<RwLock<HashMap<String, Arc<OrchestrationContext>>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    fn insert(&self, id: &str, context: Arc<OrchestrationContext>) {
        let _ = self
            .instances
            .write()
            .unwrap()
            .insert(id.to_string(), context);
    }

    /// Returns the status of an instance, if it exists.
    pub fn status(&self, id: &str) -> Option<OrchestrationStatus> {
        self.instances
            .read()
            .unwrap()
            .get(id)
            .map(|context| context.status())
    }
}

/// Everything the HTTP surface needs to start and observe
/// orchestrations.
#[derive(Clone, Debug)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    provider: Arc<dyn StoreProvider>,
    tokens: TokenCache,
    catalog_scope: Option<String>,
    registry: Registry,
}

impl AppState {
    /// Creates the state over an orchestrator and the gateways the
    /// post-run ingestion hand-off needs.
    pub fn new(
        orchestrator: Orchestrator,
        provider: Arc<dyn StoreProvider>,
        tokens: TokenCache,
        catalog_scope: Option<String>,
    ) -> AppState {
        AppState {
            orchestrator: Arc::new(orchestrator),
            provider,
            tokens,
            catalog_scope,
            registry: Registry::new(),
        }
    }

    /// The instance registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Starts the named orchestration and returns its instance id, or
    /// `None` when no orchestration goes by that name.
    pub fn start(&self, name: &str, input: Option<Value>) -> Option<String> {
        if name != GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME {
            return None;
        }
        let instance_id = Uuid::new_v4().to_string();
        tracing::info!("starting orchestration {name} with id {instance_id}");
        let context = Arc::new(OrchestrationContext::new(&instance_id));
        self.registry.insert(&instance_id, context.clone());

        let state = self.clone();
        drop(tokio::spawn(async move {
            let output = state.orchestrator.run(&context, input.clone()).await;
            state.ingest_if_requested(&input, &output).await;
        }));
        Some(instance_id)
    }

    /// Hands the collection to the catalog when the input asked for it
    /// and the run produced one.
    async fn ingest_if_requested(&self, input: &Option<Value>, output: &Value) {
        let Some(collection_url) = output.get("collectionUrl").and_then(Value::as_str) else {
            return;
        };
        let catalog_url = input
            .as_ref()
            .and_then(|input| input.get("targetCatalogUrl"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| std::env::var("GEOCATALOG_URL").ok());
        let Some(catalog_url) = catalog_url else {
            return;
        };
        let Some(collection_id) = input
            .as_ref()
            .and_then(|input| input.get("targetCollectionId"))
            .and_then(Value::as_str)
        else {
            return;
        };
        let Some(scope) = self.catalog_scope.clone() else {
            tracing::warn!("no catalog scope configured, skipping ingestion");
            return;
        };
        tracing::info!("handing {collection_url} to {catalog_url} for ingestion");
        let result = async {
            let client = CatalogClient::new(&catalog_url, scope, self.tokens.clone())?;
            client
                .bulk_ingest(collection_id, collection_url, self.provider.as_ref())
                .await
        }
        .await;
        match result {
            Ok((ingestion_id, run_id)) => {
                tracing::info!("ingestion {ingestion_id} running with id {run_id}");
            }
            Err(err) => tracing::error!("ingestion hand-off failed: {err}"),
        }
    }
}
