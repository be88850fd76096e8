use crate::{
    ActivityInfo, Error, Result, Scene,
    crawler::{crawl_files, crawl_index},
};
use serde::{Deserialize, Serialize};
use stac::{Bbox, Collection, Link, Version};
use stacforge_engine::Environment;
use stacforge_store::StoreProvider;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// The file crawl activity name.
pub const FILE_CRAWL_ACTIVITY_NAME: &str = "file_crawl";

/// The index crawl activity name.
pub const INDEX_CRAWL_ACTIVITY_NAME: &str = "index_crawl";

/// The scene transform activity name.
pub const TRANSFORM_SCENE_ACTIVITY_NAME: &str = "transform_scene";

/// The collection build activity name.
pub const BUILD_COLLECTION_ACTIVITY_NAME: &str = "build_collection";

/// Input for the file crawl activity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCrawlInput {
    /// Correlation ids.
    #[serde(flatten)]
    pub info: ActivityInfo,

    /// The storage account holding the scenes.
    pub storage_account_name: String,

    /// The container holding the scenes.
    pub container_name: String,

    /// An optional glob over blob names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Input for the index crawl activity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCrawlInput {
    /// Correlation ids.
    #[serde(flatten)]
    pub info: ActivityInfo,

    /// The storage account holding the index.
    pub storage_account_name: String,

    /// The container holding the index.
    pub container_name: String,

    /// The index blob path.
    pub index_file: String,

    /// Whether the index lines are NDJSON records.
    #[serde(default)]
    pub is_ndjson: bool,

    /// Lines starting with this prefix are dropped.
    #[serde(default)]
    pub ignore_lines_starting_with: String,
}

/// Input for the scene transform activity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSceneInput {
    /// Correlation ids.
    #[serde(flatten)]
    pub info: ActivityInfo,

    /// The scene to render, passed to the template verbatim.
    pub scene: Scene,

    /// Where the GeoTemplate lives.
    pub template_url: String,

    /// The output prefix items are uploaded under.
    pub items_path: String,

    /// Whether to schema-validate the rendered item.
    #[serde(default)]
    pub validate: bool,
}

/// Input for the collection build activity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCollectionInput {
    /// Correlation ids.
    #[serde(flatten)]
    pub info: ActivityInfo,

    /// The per-orchestration output prefix.
    pub base_dir: String,
}

/// The pipeline's side-effect units.
///
/// Every activity acquires its gateways through the configured
/// providers, installs a logging scope carrying its correlation ids, and
/// returns a JSON-serializable result.
#[derive(Clone, Debug)]
pub struct Activities {
    provider: Arc<dyn StoreProvider>,
    environment: Arc<Environment>,
}

impl Activities {
    /// Creates the activity set over a store provider and a template
    /// environment.
    pub fn new(provider: Arc<dyn StoreProvider>, environment: Arc<Environment>) -> Activities {
        Activities {
            provider,
            environment,
        }
    }

    /// Crawls the source container for scene files.
    pub async fn file_crawl(&self, input: FileCrawlInput) -> Result<Vec<String>> {
        let span = tracing::info_span!(
            "activity",
            orchestration_id = %input.info.orchestration_id,
            orchestration_name = %input.info.orchestration_name,
            activity_name = FILE_CRAWL_ACTIVITY_NAME,
            activity_id = %Uuid::new_v4(),
        );
        async move {
            tracing::info!(
                "starting file crawling for container {} at {}",
                input.container_name,
                input.storage_account_name
            );
            match &input.pattern {
                Some(pattern) => tracing::info!("pattern is \"{pattern}\""),
                None => tracing::info!("no pattern"),
            }
            let store = self
                .provider
                .store(&input.storage_account_name, &input.container_name, true)
                .map_err(|err| {
                    tracing::error!("error creating the source gateway: {err}");
                    Error::Crawling("Error crawling files".to_string())
                })?;
            crawl_files(store.as_ref(), input.pattern.as_deref()).await
        }
        .instrument(span)
        .await
    }

    /// Crawls an index file for scenes.
    pub async fn index_crawl(&self, input: IndexCrawlInput) -> Result<Vec<Scene>> {
        let span = tracing::info_span!(
            "activity",
            orchestration_id = %input.info.orchestration_id,
            orchestration_name = %input.info.orchestration_name,
            activity_name = INDEX_CRAWL_ACTIVITY_NAME,
            activity_id = %Uuid::new_v4(),
        );
        async move {
            tracing::info!(
                "starting index crawling with file {} at {}@{}",
                input.index_file,
                input.container_name,
                input.storage_account_name
            );
            tracing::info!(
                "index file {} NDJSON",
                if input.is_ndjson { "is" } else { "is not" }
            );
            let store = self
                .provider
                .store(&input.storage_account_name, &input.container_name, true)
                .map_err(|err| {
                    tracing::error!("error creating the source gateway: {err}");
                    Error::Crawling("Error crawling index".to_string())
                })?;
            crawl_index(
                store.as_ref(),
                &input.index_file,
                input.is_ndjson,
                &input.ignore_lines_starting_with,
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Transforms one scene into a STAC item blob.
    ///
    /// Never errors: any failure is logged with the scene in context and
    /// reported as `false`, so the fan-out keeps going. The invocation id
    /// names the uploaded blob, which keeps retried invocations from
    /// colliding.
    pub async fn transform_scene(&self, input: TransformSceneInput) -> bool {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "activity",
            orchestration_id = %input.info.orchestration_id,
            orchestration_name = %input.info.orchestration_name,
            activity_name = TRANSFORM_SCENE_ACTIVITY_NAME,
            activity_id = %invocation_id,
            scene = %input.scene,
        );
        async move {
            tracing::info!("received scene {}", input.scene);
            match self.try_transform_scene(&input, invocation_id).await {
                Ok(url) => {
                    tracing::info!("STAC item uploaded to {url}");
                    true
                }
                Err(err) => {
                    tracing::warn!("transformation failed for scene {}: {err}", input.scene);
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_transform_scene(
        &self,
        input: &TransformSceneInput,
        invocation_id: Uuid,
    ) -> Result<String> {
        tracing::info!("retrieving template from {}", input.template_url);
        let template = self.environment.get_template(&input.template_url).await?;

        tracing::info!("converting scene to STAC item");
        let item = template.render_stac(&input.scene, input.validate).await?;
        let body = serde_json::to_string(&item)?;

        let item_path = format!("{}/{invocation_id}.json", input.items_path);
        tracing::debug!("uploading STAC item to {item_path}");
        let store = self.provider.export_store()?;
        store.ensure_container().await?;
        store.upload(&item_path, body.into(), true).await.map_err(Error::from)
    }

    /// Builds the transient collection document referencing every item
    /// this orchestration produced.
    pub async fn build_collection(&self, input: BuildCollectionInput) -> Result<String> {
        let span = tracing::info_span!(
            "activity",
            orchestration_id = %input.info.orchestration_id,
            orchestration_name = %input.info.orchestration_name,
            activity_name = BUILD_COLLECTION_ACTIVITY_NAME,
            activity_id = %Uuid::new_v4(),
        );
        async move {
            let store = self.provider.export_store()?;
            let items = store
                .list(Some(&format!("{}/items", input.base_dir)), Some("*.json"))
                .await?;
            tracing::info!("creating collection for {} items", items.len());

            let mut collection =
                Collection::new("temporary_collection", "Temporary collection for bulk import");
            collection.version = Version::v1_0_0;
            collection.title = Some("Temporary collection".to_string());
            collection.license = "other".to_string();
            collection.extent.spatial.bbox = vec![Bbox::TwoDimensional([-180.0, -90.0, 180.0, 90.0])];
            collection.extent.temporal.interval = vec![[None, None]];
            collection.links = items
                .iter()
                .map(|url| {
                    let mut link = Link::new(url, "item");
                    link.r#type = Some("application/json".to_string());
                    link
                })
                .collect();

            let collection_path = format!("{}/collection.json", input.base_dir);
            tracing::debug!("uploading collection to {collection_path}");
            let body = serde_json::to_string(&collection)?;
            match store.upload(&collection_path, body.into(), true).await {
                Ok(url) => {
                    tracing::info!("collection uploaded to {url}");
                    Ok(url)
                }
                Err(err) => {
                    tracing::error!("error storing collection to {collection_path}: {err}");
                    Err(Error::Transformation("Error creating collection".to_string()))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Activities, BuildCollectionInput, FileCrawlInput, TransformSceneInput,
    };
    use crate::ActivityInfo;
    use serde_json::json;
    use stacforge_engine::{Environment, StaticFetcher};
    use stacforge_store::{MemoryStoreProvider, StoreProvider};
    use std::sync::Arc;

    const ITEM_TEMPLATE: &str = r#"
{
    "type": "Feature",
    "stac_version": "1.0.0",
    "id": "{{ (scene_info | regex_search("([^/]+)\\.tif$")).group(1) }}",
    "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
    "properties": {"datetime": "2024-05-01T00:00:00Z"},
    "links": [],
    "assets": {}
}
"#;

    fn info() -> ActivityInfo {
        ActivityInfo {
            orchestration_id: "instance-1".to_string(),
            orchestration_name: "geotemplate_bulk_transform".to_string(),
        }
    }

    async fn activities() -> (Arc<MemoryStoreProvider>, Activities) {
        let provider = Arc::new(MemoryStoreProvider::new("out", "collections"));
        let templates = provider.store("acct", "tpl", false).unwrap();
        let _ = templates
            .upload("item.j2", ITEM_TEMPLATE.into(), true)
            .await
            .unwrap();
        let environment = Arc::new(Environment::new(
            provider.clone(),
            Arc::new(StaticFetcher::default()),
        ));
        (provider.clone(), Activities::new(provider, environment))
    }

    #[tokio::test]
    async fn file_crawl_lists_the_source() {
        let (provider, activities) = activities().await;
        let source = provider.store("acct", "in", false).unwrap();
        let _ = source.upload("a.tif", "x".into(), true).await.unwrap();
        let files = activities
            .file_crawl(FileCrawlInput {
                info: info(),
                storage_account_name: "acct".to_string(),
                container_name: "in".to_string(),
                pattern: Some("*.tif".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(files, vec!["https://acct.blob.core.windows.net/in/a.tif"]);
    }

    #[tokio::test]
    async fn transform_scene_uploads_an_item() {
        let (provider, activities) = activities().await;
        let success = activities
            .transform_scene(TransformSceneInput {
                info: info(),
                scene: json!("https://acct.blob.core.windows.net/in/S2A_T33UUP.tif"),
                template_url: "https://acct.blob.core.windows.net/tpl/item.j2".to_string(),
                items_path: "instance-1/items".to_string(),
                validate: false,
            })
            .await;
        assert!(success);
        let out = provider.export_store().unwrap();
        let items = out.list(Some("instance-1/items"), None).await.unwrap();
        assert_eq!(items.len(), 1);
        let body = out
            .download(items[0].trim_start_matches("https://out.blob.core.windows.net/collections/"))
            .await
            .unwrap();
        let item: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(item["id"], "S2A_T33UUP");
    }

    #[tokio::test]
    async fn transform_scene_failure_is_false() {
        let (_, activities) = activities().await;
        let success = activities
            .transform_scene(TransformSceneInput {
                info: info(),
                scene: json!("not-a-tif"),
                template_url: "https://acct.blob.core.windows.net/tpl/missing.j2".to_string(),
                items_path: "instance-1/items".to_string(),
                validate: false,
            })
            .await;
        assert!(!success);
    }

    #[tokio::test]
    async fn build_collection_links_every_item() {
        let (provider, activities) = activities().await;
        let out = provider.export_store().unwrap();
        for name in ["instance-1/items/a.json", "instance-1/items/b.json"] {
            let _ = out.upload(name, "{}".into(), true).await.unwrap();
        }
        let url = activities
            .build_collection(BuildCollectionInput {
                info: info(),
                base_dir: "instance-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://out.blob.core.windows.net/collections/instance-1/collection.json"
        );
        let body = out.download("instance-1/collection.json").await.unwrap();
        let collection: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(collection["stac_version"], "1.0.0");
        assert_eq!(collection["type"], "Collection");
        assert_eq!(collection["id"], "temporary_collection");
        assert_eq!(collection["license"], "other");
        assert_eq!(collection["extent"]["spatial"]["bbox"], json!([[-180.0, -90.0, 180.0, 90.0]]));
        assert_eq!(collection["extent"]["temporal"]["interval"], json!([[null, null]]));
        let links = collection["links"].as_array().unwrap();
        assert_eq!(links.len(), 2);
        for link in links {
            assert_eq!(link["rel"], "item");
            assert_eq!(link["type"], "application/json");
        }
    }
}
