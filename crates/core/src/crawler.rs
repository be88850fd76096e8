use crate::{Error, Result, Scene};
use stacforge_store::BlobStore;

/// Lists the source container, optionally glob-filtered, and returns
/// container-qualified URLs.
pub(crate) async fn crawl_files(
    store: &dyn BlobStore,
    pattern: Option<&str>,
) -> Result<Vec<String>> {
    match store.list(None, pattern).await {
        Ok(files) => {
            tracing::info!("found {} files", files.len());
            Ok(files)
        }
        Err(err) => {
            tracing::error!(
                "error crawling files at storage account {}, container {}: {err}",
                store.account(),
                store.container()
            );
            Err(Error::Crawling("Error crawling files".to_string()))
        }
    }
}

/// Downloads and parses an index file enumerating the scenes.
///
/// Lines starting with the ignore prefix are dropped before parsing,
/// unless the prefix is empty. With `is_ndjson`, every remaining line is
/// parsed as a JSON record; otherwise the lines are returned verbatim.
pub(crate) async fn crawl_index(
    store: &dyn BlobStore,
    index_file: &str,
    is_ndjson: bool,
    ignore_lines_starting_with: &str,
) -> Result<Vec<Scene>> {
    match crawl_index_inner(store, index_file, is_ndjson, ignore_lines_starting_with).await {
        Ok(scenes) => Ok(scenes),
        Err(err) => {
            tracing::error!(
                "error crawling index file {index_file} at {}@{}: {err}",
                store.container(),
                store.account()
            );
            Err(Error::Crawling("Error crawling index".to_string()))
        }
    }
}

async fn crawl_index_inner(
    store: &dyn BlobStore,
    index_file: &str,
    is_ndjson: bool,
    ignore_lines_starting_with: &str,
) -> Result<Vec<Scene>> {
    let bytes = store.download(index_file).await?;
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|err| Error::Input(format!("index file is not UTF-8: {err}")))?;

    let mut lines: Vec<&str> = text.lines().collect();
    tracing::debug!("the index file has {} lines", lines.len());

    if !ignore_lines_starting_with.is_empty() {
        tracing::info!("ignoring lines starting with '{ignore_lines_starting_with}'");
        lines.retain(|line| !line.starts_with(ignore_lines_starting_with));
    }
    tracing::info!("found {} files", lines.len());

    if is_ndjson {
        tracing::debug!("parsing NDJSON");
        lines
            .into_iter()
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    } else {
        Ok(lines.into_iter().map(|line| Scene::from(line)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{crawl_files, crawl_index};
    use serde_json::json;
    use stacforge_store::{BlobStore, MemoryBlobStore};

    async fn store_with_index(content: &str) -> MemoryBlobStore {
        let store = MemoryBlobStore::new("acct", "in");
        let _ = store
            .upload("index.txt", content.to_string().into(), true)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn file_crawl_returns_urls() {
        let store = MemoryBlobStore::new("acct", "in");
        for name in ["scenes/a.tif", "scenes/b.tif", "readme.md"] {
            let _ = store.upload(name, "x".into(), true).await.unwrap();
        }
        let files = crawl_files(&store, Some("**/*.tif")).await.unwrap();
        assert_eq!(
            files,
            vec![
                "https://acct.blob.core.windows.net/in/scenes/a.tif",
                "https://acct.blob.core.windows.net/in/scenes/b.tif",
            ]
        );
    }

    #[tokio::test]
    async fn index_crawl_plain_lines() {
        let store = store_with_index("# header\nscenes/a.tif\nscenes/b.tif\n").await;
        let scenes = crawl_index(&store, "index.txt", false, "#").await.unwrap();
        assert_eq!(scenes, vec![json!("scenes/a.tif"), json!("scenes/b.tif")]);
    }

    #[tokio::test]
    async fn index_crawl_ndjson_with_comments() {
        let store = store_with_index("# header\n{\"id\":\"a\"}\n{\"id\":\"b\"}\n").await;
        let scenes = crawl_index(&store, "index.txt", true, "#").await.unwrap();
        assert_eq!(scenes, vec![json!({"id": "a"}), json!({"id": "b"})]);
    }

    #[tokio::test]
    async fn empty_prefix_disables_the_filter() {
        let store = store_with_index("# not a comment\nscenes/a.tif\n").await;
        let scenes = crawl_index(&store, "index.txt", false, "").await.unwrap();
        assert_eq!(scenes.len(), 2);
    }

    #[tokio::test]
    async fn crlf_lines_are_split() {
        let store = store_with_index("scenes/a.tif\r\nscenes/b.tif\r\n").await;
        let scenes = crawl_index(&store, "index.txt", false, "#").await.unwrap();
        assert_eq!(scenes, vec![json!("scenes/a.tif"), json!("scenes/b.tif")]);
    }

    #[tokio::test]
    async fn bad_ndjson_is_a_crawling_error() {
        let store = store_with_index("{\"id\":\"a\"}\nnot json\n").await;
        let err = crawl_index(&store, "index.txt", true, "#").await.unwrap_err();
        assert_eq!(err.to_string(), "Error crawling index");
    }

    #[tokio::test]
    async fn missing_index_is_a_crawling_error() {
        let store = MemoryBlobStore::new("acct", "in");
        let err = crawl_index(&store, "missing.txt", false, "#").await.unwrap_err();
        assert_eq!(err.to_string(), "Error crawling index");
    }
}
