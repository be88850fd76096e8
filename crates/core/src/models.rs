use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One unit of crawler output: a blob URL as a JSON string, or a
/// structured record when the index file is NDJSON. Opaque to the
/// orchestrator; templates see it as `scene_info`.
pub type Scene = serde_json::Value;

/// How the scene list is produced.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CrawlingType {
    /// List blobs in the source container, optionally glob-filtered.
    File,

    /// Download an index file enumerating the scenes.
    Index,
}

fn default_comment_prefix() -> String {
    "#".to_string()
}

/// The immutable request an orchestration runs against.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationInput {
    /// How to discover the scenes.
    pub crawling_type: CrawlingType,

    /// The storage account holding the source container.
    pub source_storage_account_name: String,

    /// The container holding the raw scenes.
    pub source_container_name: String,

    /// Where the GeoTemplate source lives.
    pub template_url: String,

    /// The catalog collection the items are destined for.
    pub target_collection_id: String,

    /// Glob filter for file crawling. Must be absent for index crawling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// The index blob path. Required for index crawling, absent
    /// otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_file_path: Option<String>,

    /// Whether index lines are NDJSON records rather than plain paths.
    #[serde(default)]
    pub index_file_is_ndjson: bool,

    /// Index lines starting with this prefix are dropped before parsing.
    /// An empty prefix disables the filter.
    #[serde(default = "default_comment_prefix")]
    pub index_file_ignore_lines_starting_with: String,

    /// The catalog to hand the collection to after a successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_catalog_url: Option<String>,

    /// Whether every rendered item is schema-validated. A violation
    /// counts as a transform failure.
    #[serde(default)]
    pub validate: bool,
}

impl OrchestrationInput {
    /// Checks the crawling-mode precondition.
    ///
    /// Index crawling requires an index file and forbids a pattern; any
    /// other mode forbids an index file.
    ///
    /// # Examples
    ///
    /// ```
    /// use stacforge::{CrawlingType, OrchestrationInput};
    ///
    /// let input: OrchestrationInput = serde_json::from_value(serde_json::json!({
    ///     "crawlingType": "file",
    ///     "sourceStorageAccountName": "acct",
    ///     "sourceContainerName": "in",
    ///     "pattern": "**/*.tif",
    ///     "templateUrl": "https://acct.blob.core.windows.net/tpl/basic.j2",
    ///     "targetCollectionId": "c1",
    /// })).unwrap();
    /// assert!(input.check_crawling_options().is_ok());
    /// ```
    pub fn check_crawling_options(&self) -> Result<()> {
        if self.crawling_type == CrawlingType::Index {
            if self.index_file_path.is_none() {
                return Err(Error::Input(
                    "index_file must be provided for index crawling".to_string(),
                ));
            }
            if self.pattern.is_some() {
                return Err(Error::Input(
                    "pattern must not be provided for index crawling".to_string(),
                ));
            }
        } else if self.index_file_path.is_some() {
            return Err(Error::Input(
                "index_file must not be provided for non-index crawling".to_string(),
            ));
        }
        Ok(())
    }
}

/// The correlation ids every activity input carries.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInfo {
    /// The orchestration instance id.
    pub orchestration_id: String,

    /// The orchestration's registered name.
    pub orchestration_name: String,
}

#[cfg(test)]
mod tests {
    use super::{CrawlingType, OrchestrationInput};
    use serde_json::json;

    fn input(value: serde_json::Value) -> OrchestrationInput {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "crawlingType": "file",
            "sourceStorageAccountName": "acct",
            "sourceContainerName": "in",
            "templateUrl": "https://acct.blob.core.windows.net/tpl/basic.j2",
            "targetCollectionId": "c1",
        })
    }

    #[test]
    fn defaults() {
        let input = input(base());
        assert_eq!(input.crawling_type, CrawlingType::File);
        assert!(!input.index_file_is_ndjson);
        assert_eq!(input.index_file_ignore_lines_starting_with, "#");
        assert!(!input.validate);
        assert!(input.target_catalog_url.is_none());
    }

    #[test]
    fn file_crawling_forbids_index_file() {
        let mut value = base();
        value["indexFilePath"] = json!("index.txt");
        assert!(input(value).check_crawling_options().is_err());
    }

    #[test]
    fn index_crawling_requires_index_file() {
        let mut value = base();
        value["crawlingType"] = json!("index");
        assert!(input(value.clone()).check_crawling_options().is_err());
        value["indexFilePath"] = json!("index.txt");
        assert!(input(value.clone()).check_crawling_options().is_ok());
        value["pattern"] = json!("*.tif");
        assert!(input(value).check_crawling_options().is_err());
    }
}
