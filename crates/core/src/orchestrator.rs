use crate::{
    Activities, ActivityInfo, BUILD_COLLECTION_ACTIVITY_NAME, BuildCollectionInput, CrawlingType,
    Error, FILE_CRAWL_ACTIVITY_NAME, FileCrawlInput, INDEX_CRAWL_ACTIVITY_NAME, IndexCrawlInput,
    OrchestrationInput, Result, Scene, TRANSFORM_SCENE_ACTIVITY_NAME, TransformSceneInput,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    fmt::Display,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::Instrument;

/// The registered name of the bulk transform orchestration.
pub const GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME: &str = "geotemplate_bulk_transform";

/// Where an orchestration instance is in its lifecycle, reported through
/// the status endpoint as `customStatus`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum CustomStatus {
    /// Reading and checking the input.
    Initializing,

    /// Discovering scenes.
    Crawling,

    /// Fan-out scene transformation.
    Transforming,

    /// Building the collection document.
    CreatingCollection,

    /// Done, every scene transformed.
    Finished,

    /// Done, but some scenes failed.
    FinishedWithErrors,

    /// An unhandled error stopped the run.
    Failed,
}

/// The coarse execution state reported as `runtimeStatus`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// Queued, not yet started.
    Pending,

    /// Currently executing.
    Running,

    /// Finished executing, output available.
    Completed,
}

/// What a status poll returns.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationStatus {
    /// The coarse execution state.
    pub runtime_status: RuntimeStatus,

    /// The fine-grained pipeline state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<CustomStatus>,

    /// The result object, present once the run completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[derive(Debug, Default)]
struct Journal {
    events: Vec<Value>,
    cursor: usize,
}

/// The durable execution context of one orchestration instance.
///
/// Every side effect the orchestrator takes goes through
/// [call_activity](OrchestrationContext::call_activity), which records
/// the result in an append-only journal. Re-running the orchestrator
/// over a context primed with a previous journal replays the recorded
/// results instead of re-executing the activities, and
/// [is_replaying](OrchestrationContext::is_replaying) stays true until
/// the journal is exhausted so replayed log lines are suppressed.
#[derive(Debug)]
pub struct OrchestrationContext {
    instance_id: String,
    journal: Mutex<Journal>,
    replaying: AtomicBool,
    status: Mutex<OrchestrationStatus>,
}

impl OrchestrationContext {
    /// Creates a fresh context for an instance.
    pub fn new(instance_id: impl ToString) -> OrchestrationContext {
        OrchestrationContext::with_history(instance_id, Vec::new())
    }

    /// Creates a context primed with a previous run's journal.
    pub fn with_history(instance_id: impl ToString, events: Vec<Value>) -> OrchestrationContext {
        let replaying = !events.is_empty();
        OrchestrationContext {
            instance_id: instance_id.to_string(),
            journal: Mutex::new(Journal { events, cursor: 0 }),
            replaying: AtomicBool::new(replaying),
            status: Mutex::new(OrchestrationStatus {
                runtime_status: RuntimeStatus::Pending,
                custom_status: None,
                output: None,
            }),
        }
    }

    /// The instance id, which namespaces the output blobs and the log
    /// partition.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// True while recorded history is being consumed.
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Returns a copy of the journal, for checkpointing.
    pub fn history(&self) -> Vec<Value> {
        self.journal.lock().unwrap().events.clone()
    }

    /// The current status.
    pub fn status(&self) -> OrchestrationStatus {
        self.status.lock().unwrap().clone()
    }

    /// Sets the fine-grained pipeline state.
    pub fn set_custom_status(&self, status: CustomStatus) {
        self.status.lock().unwrap().custom_status = Some(status);
    }

    fn set_runtime_status(&self, status: RuntimeStatus) {
        self.status.lock().unwrap().runtime_status = status;
    }

    fn set_output(&self, output: Value) {
        self.status.lock().unwrap().output = Some(output);
    }

    /// Runs an activity, or replays its recorded result.
    ///
    /// A fan-out counts as a single call: schedule the batch inside `f`
    /// and the whole result vector is journaled together.
    pub async fn call_activity<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut journal = self.journal.lock().unwrap();
            if journal.cursor < journal.events.len() {
                let event = journal.events[journal.cursor].clone();
                journal.cursor += 1;
                self.replaying
                    .store(journal.cursor < journal.events.len(), Ordering::SeqCst);
                return serde_json::from_value(event).map_err(Error::from);
            }
        }
        self.replaying.store(false, Ordering::SeqCst);
        tracing::debug!("scheduling activity {name}");
        let result = f().await?;
        let mut journal = self.journal.lock().unwrap();
        journal.events.push(serde_json::to_value(&result)?);
        journal.cursor = journal.events.len();
        Ok(result)
    }

    /// Logs at info level, unless replaying.
    pub fn info(&self, message: impl Display) {
        if !self.is_replaying() {
            tracing::info!("{message}");
        }
    }

    /// Logs at warn level, unless replaying.
    pub fn warn(&self, message: impl Display) {
        if !self.is_replaying() {
            tracing::warn!("{message}");
        }
    }
}

/// The durable bulk transform pipeline: crawl, fan-out transform,
/// fan-in, build collection, report.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    activities: Activities,
}

impl Orchestrator {
    /// Creates an orchestrator over an activity set.
    pub fn new(activities: Activities) -> Orchestrator {
        Orchestrator { activities }
    }

    /// Runs one orchestration instance to completion and returns its
    /// result object.
    ///
    /// Never errors: an unhandled failure sets the `Failed` status and
    /// becomes an `{error}` object carrying the first line of the
    /// message.
    pub async fn run(&self, context: &OrchestrationContext, input: Option<Value>) -> Value {
        let span = tracing::info_span!(
            "orchestration",
            orchestration_id = %context.instance_id(),
            orchestration_name = GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME,
        );
        async move {
            context.set_runtime_status(RuntimeStatus::Running);
            let output = match self.try_run(context, input).await {
                Ok(output) => output,
                Err(err) => {
                    if !context.is_replaying() {
                        tracing::error!(
                            "error running {GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME} with id {}: {err}",
                            context.instance_id()
                        );
                    }
                    context.set_custom_status(CustomStatus::Failed);
                    json!({"error": first_line(&err)})
                }
            };
            context.set_output(output.clone());
            context.set_runtime_status(RuntimeStatus::Completed);
            output
        }
        .instrument(span)
        .await
    }

    async fn try_run(&self, context: &OrchestrationContext, input: Option<Value>) -> Result<Value> {
        context.set_custom_status(CustomStatus::Initializing);
        context.info(format!(
            "starting orchestration {GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME} with id {}",
            context.instance_id()
        ));

        context.info("getting orchestration input");
        let input = input.ok_or_else(|| Error::Input("No input provided".to_string()))?;
        let input: OrchestrationInput =
            serde_json::from_value(input).map_err(|err| Error::Input(err.to_string()))?;
        input.check_crawling_options()?;

        let info = ActivityInfo {
            orchestration_id: context.instance_id().to_string(),
            orchestration_name: GEOTEMPLATE_BULK_TRANSFORM_ORCHESTRATION_NAME.to_string(),
        };

        context.set_custom_status(CustomStatus::Crawling);
        let scenes: Vec<Scene> = match input.crawling_type {
            CrawlingType::File => {
                context.info(format!("crawling scenes with {FILE_CRAWL_ACTIVITY_NAME}"));
                let crawl_input = FileCrawlInput {
                    info: info.clone(),
                    storage_account_name: input.source_storage_account_name.clone(),
                    container_name: input.source_container_name.clone(),
                    pattern: input.pattern.clone(),
                };
                context
                    .call_activity(FILE_CRAWL_ACTIVITY_NAME, || async move {
                        let files = self.activities.file_crawl(crawl_input).await?;
                        Ok(files.into_iter().map(Scene::from).collect::<Vec<_>>())
                    })
                    .await?
            }
            CrawlingType::Index => {
                context.info(format!("crawling scenes with {INDEX_CRAWL_ACTIVITY_NAME}"));
                let crawl_input = IndexCrawlInput {
                    info: info.clone(),
                    storage_account_name: input.source_storage_account_name.clone(),
                    container_name: input.source_container_name.clone(),
                    index_file: input
                        .index_file_path
                        .clone()
                        .expect("checked by check_crawling_options"),
                    is_ndjson: input.index_file_is_ndjson,
                    ignore_lines_starting_with: input
                        .index_file_ignore_lines_starting_with
                        .clone(),
                };
                context
                    .call_activity(INDEX_CRAWL_ACTIVITY_NAME, || {
                        self.activities.index_crawl(crawl_input)
                    })
                    .await?
            }
        };
        if scenes.is_empty() {
            context.warn("no scenes found!");
            context.set_custom_status(CustomStatus::Finished);
            return Ok(json!({}));
        }
        context.info(format!("found {} scenes", scenes.len()));

        context.set_custom_status(CustomStatus::Transforming);
        context.info(format!("transforming {} scenes to STAC items", scenes.len()));
        let items_path = format!("{}/items", context.instance_id());
        let total = scenes.len();
        let responses: Vec<bool> = context
            .call_activity(TRANSFORM_SCENE_ACTIVITY_NAME, || {
                let tasks = scenes.iter().map(|scene| {
                    self.activities.transform_scene(TransformSceneInput {
                        info: info.clone(),
                        scene: scene.clone(),
                        template_url: input.template_url.clone(),
                        items_path: items_path.clone(),
                        validate: input.validate,
                    })
                });
                let joined = join_all(tasks);
                async move { Ok(joined.await) }
            })
            .await?;
        let success_count = responses.iter().filter(|ok| **ok).count();
        let failed_count = total - success_count;
        if failed_count > 0 {
            context.warn(format!("{failed_count} items failed to transform"));
        }
        if success_count == 0 {
            context.set_custom_status(if failed_count == 0 {
                CustomStatus::Finished
            } else {
                CustomStatus::FinishedWithErrors
            });
            return Ok(json!({"warning": "No scenes transformed"}));
        }
        context.info(format!("transformed {success_count} scenes to STAC items"));

        context.set_custom_status(CustomStatus::CreatingCollection);
        context.info(format!("creating a collection for {success_count} STAC items"));
        let build_input = BuildCollectionInput {
            info,
            base_dir: context.instance_id().to_string(),
        };
        let collection_url: String = context
            .call_activity(BUILD_COLLECTION_ACTIVITY_NAME, || {
                self.activities.build_collection(build_input)
            })
            .await?;
        context.info(format!("collection created at {collection_url}"));

        context.set_custom_status(if failed_count == 0 {
            CustomStatus::Finished
        } else {
            CustomStatus::FinishedWithErrors
        });
        Ok(json!({
            "collectionUrl": collection_url,
            "totalItems": total,
            "successCount": success_count,
            "failedCount": failed_count,
        }))
    }
}

fn first_line(err: &Error) -> String {
    err.to_string()
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
        .to_string()
}
