//! API server builder and the `/v2/*` dispatcher.
//!
//! Repository names may contain `/`, so the usual per-segment router
//! params cannot carry them. Requests below `/v2/` instead fall through to
//! a dispatcher that matches the whole path against anchored patterns
//! composed from the grammar fragments; a path no pattern accepts is a
//! plain 404 with an empty body.

use std::sync::LazyLock;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use camino::Utf8PathBuf;
use regex::Regex;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::blob;
use crate::error::{RegistryError, RegistryResult};
use crate::grammar::{self, NAME, REFERENCE};
use crate::manifest::{self, ManifestStore};
use crate::store::ContentStore;
use crate::upload::UploadSessions;

/// Shared handler state: the stores, all rooted at one base path.
#[derive(Clone, Debug)]
pub(crate) struct AppState {
    pub store: ContentStore,
    pub uploads: UploadSessions,
    pub manifests: ManifestStore,
}

/// Registry builder for configuring and creating the registry service.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    base_path: Option<Utf8PathBuf>,
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory the registry stores everything under
    pub fn base_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let base = self
            .base_path
            .unwrap_or_else(|| Utf8PathBuf::from("testdata"));
        let store = ContentStore::new(base);
        let state = AppState {
            uploads: UploadSessions::new(store.clone()),
            manifests: ManifestStore::new(store.clone()),
            store,
        };

        Router::new()
            .route("/v2/", get(api_version_check))
            .fallback(dispatch)
            .layer(middleware::from_fn(distribution_headers))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Headers every distribution response must carry.
async fn distribution_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "docker-distribution-api-version",
        HeaderValue::from_static("registry/2.0"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

struct Routes {
    /// `/v2/{name}/blobs/uploads/`
    uploads: Regex,
    /// `/v2/{name}/blobs/uploads/{reference}`
    upload: Regex,
    /// `/v2/{name}/blobs/{digest}`
    blob: Regex,
    /// `/v2/{name}/manifests/{reference}`
    manifest: Regex,
    /// `/v2/{name}/tags/list`
    tags: Regex,
}

static ROUTES: LazyLock<Routes> = LazyLock::new(|| Routes {
    uploads: route(&format!("^/v2/(?P<name>{NAME})/blobs/uploads/$")),
    upload: route(&format!(
        "^/v2/(?P<name>{NAME})/blobs/uploads/(?P<reference>{REFERENCE})$"
    )),
    blob: route(&format!(
        "^/v2/(?P<name>{NAME})/blobs/(?P<digest>{REFERENCE})$"
    )),
    manifest: route(&format!(
        "^/v2/(?P<name>{NAME})/manifests/(?P<reference>{REFERENCE})$"
    )),
    tags: route(&format!("^/v2/(?P<name>{NAME})/tags/list$")),
});

fn route(pattern: &str) -> Regex {
    Regex::new(pattern).expect("route pattern")
}

/// Fallback handler: resolve the request against the route table and run
/// the matching endpoint, turning any error into its wire envelope.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    match resolve(&state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn resolve(state: &AppState, request: Request) -> RegistryResult<Response> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_owned();
    let query = parts.uri.query();
    let method = parts.method;

    if let Some(captures) = ROUTES.uploads.captures(&path) {
        let name = &captures["name"];
        if method.as_str() == "POST" {
            return blob::open_upload(state, name).await;
        }
        return Ok(no_route());
    }

    if let Some(captures) = ROUTES.upload.captures(&path) {
        let name = &captures["name"];
        let reference = &captures["reference"];
        return match method.as_str() {
            "PATCH" => {
                let data = read_body(body).await?;
                blob::patch_upload(state, name, reference, data).await
            }
            "PUT" => {
                let digest = query_param(query, "digest");
                blob::put_upload(state, name, reference, digest.as_deref()).await
            }
            _ => Ok(no_route()),
        };
    }

    if let Some(captures) = ROUTES.blob.captures(&path) {
        let name = &captures["name"];
        let digest = &captures["digest"];
        return match method.as_str() {
            "GET" => blob::get_blob(state, name, digest).await,
            "HEAD" => blob::head_blob(state, name, digest).await,
            "DELETE" => blob::delete_blob(state, name, digest).await,
            _ => Ok(no_route()),
        };
    }

    if let Some(captures) = ROUTES.manifest.captures(&path) {
        let name = &captures["name"];
        let reference = &captures["reference"];
        return match method.as_str() {
            "GET" => manifest::get_manifest(state, name, reference).await,
            "HEAD" => manifest::head_manifest(state, name, reference).await,
            "PUT" if grammar::is_tag(reference) => {
                let data = read_body(body).await?;
                manifest::put_manifest(state, name, reference, &data).await
            }
            "DELETE" => manifest::delete_manifest(state, name, reference).await,
            _ => Ok(no_route()),
        };
    }

    if let Some(captures) = ROUTES.tags.captures(&path) {
        let name = &captures["name"];
        if method.as_str() == "GET" {
            let n = query_param(query, "n").and_then(|v| v.parse().ok());
            let last = query_param(query, "last");
            return manifest::list_tags(state, name, n, last.as_deref()).await;
        }
        return Ok(no_route());
    }

    Ok(no_route())
}

fn no_route() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

async fn read_body(body: Body) -> RegistryResult<Bytes> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| RegistryError::Io(std::io::Error::other(err)))
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
