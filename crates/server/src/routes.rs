//! Routes for the orchestration trigger and status endpoints.

use crate::AppState;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

/// Errors for our axum routes.
#[derive(Debug)]
enum Error {
    /// Something was not found.
    NotFound(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound(message) => (StatusCode::NOT_FOUND, message),
        }
        .into_response()
    }
}

/// Creates the router over an [AppState].
///
/// # Examples
///
/// ```no_run
/// # use stacforge_server::{AppState, router};
/// # fn build(state: AppState) {
/// let app = router(state);
/// # }
/// ```
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/orchestrations/{key}",
            post(start_orchestration).get(orchestration_status),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn start_orchestration(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, Error> {
    tracing::info!("request to start orchestration {name}");
    // A missing or non-JSON body starts the orchestration with no input.
    let input: Option<Value> = serde_json::from_slice(&body).ok();
    match state.start(&name, input) {
        Some(instance_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "id": instance_id,
                "statusQueryGetUri": format!("/orchestrations/{instance_id}"),
            })),
        )
            .into_response()),
        None => Err(Error::NotFound(format!("no such orchestration: {name}"))),
    }
}

async fn orchestration_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Error> {
    match state.registry().status(&id) {
        Some(status) => Ok(Json(status).into_response()),
        None => Err(Error::NotFound(format!("no such instance: {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use crate::{AppState, router};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header::CONTENT_TYPE},
    };
    use serde_json::{Value, json};
    use stacforge::{Activities, Orchestrator};
    use stacforge_engine::{Environment, StaticFetcher};
    use stacforge_store::{MemoryStoreProvider, StaticTokenProvider, StoreProvider, TokenCache};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    const TEMPLATE: &str = r#"
{
    "type": "Feature",
    "stac_version": "1.0.0",
    "id": "{{ (scene_info | regex_search("([^/]+)\\.tif")).group(1) }}",
    "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
    "properties": {"datetime": "2024-05-01T00:00:00Z"},
    "links": [],
    "assets": {}
}
"#;

    async fn state() -> AppState {
        let provider = Arc::new(MemoryStoreProvider::new("out", "collections"));
        let templates = provider.store("acct", "tpl", false).unwrap();
        let _ = templates
            .upload("item.j2", TEMPLATE.into(), true)
            .await
            .unwrap();
        let source = provider.store("acct", "in", false).unwrap();
        let _ = source
            .upload("scenes/a.tif", "raster".into(), true)
            .await
            .unwrap();
        let environment = Arc::new(Environment::new(
            provider.clone(),
            Arc::new(StaticFetcher::default()),
        ));
        let orchestrator = Orchestrator::new(Activities::new(provider.clone(), environment));
        let tokens = TokenCache::new(Arc::new(StaticTokenProvider::new("token")));
        AppState::new(orchestrator, provider, tokens, None)
    }

    fn start_request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/orchestrations/geotemplate_bulk_transform")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "crawlingType": "file",
                    "sourceStorageAccountName": "acct",
                    "sourceContainerName": "in",
                    "pattern": "**/*.tif",
                    "templateUrl": "https://acct.blob.core.windows.net/tpl/item.j2",
                    "targetCollectionId": "c1",
                })
                .to_string(),
            ))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_orchestration_is_not_found() {
        let app = router(state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/orchestrations/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let app = router(state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/orchestrations/not-an-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_and_poll() {
        let app = router(state().await);
        let response = app.clone().oneshot(start_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let descriptor = body_json(response).await;
        let uri = descriptor["statusQueryGetUri"].as_str().unwrap().to_string();

        let mut status = json!(null);
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            status = body_json(response).await;
            if status["runtimeStatus"] == "Completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status["runtimeStatus"], "Completed");
        assert_eq!(status["customStatus"], "Finished");
        assert_eq!(status["output"]["totalItems"], 1);
        assert_eq!(status["output"]["successCount"], 1);
    }
}
