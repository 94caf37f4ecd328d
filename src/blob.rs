//! Blob and upload-session handlers.
//!
//! Push protocol: POST opens a session and answers with its Location,
//! PATCH stages the layer bytes, PUT with `?digest=` commits the staged
//! file into the blob tree.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::api::AppState;
use crate::error::{RegistryError, RegistryResult};
use crate::grammar::Digest;
use crate::store::predict_content_type;

/// Pull a blob.
pub(crate) async fn get_blob(
    state: &AppState,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    let (file, data) = state.store.read_blob(name, &digest).await?;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response();
    if !file.name.ends_with(".json") {
        response
            .headers_mut()
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    Ok(response)
}

/// Stat a blob: size, digest, and the content type its extension predicts.
pub(crate) async fn head_blob(
    state: &AppState,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    let file = state.store.stat_blob(name, &digest).await?;

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                predict_content_type(&file.name).to_string(),
            ),
            (header::CONTENT_LENGTH, file.size.to_string()),
            (
                HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
    )
        .into_response())
}

/// Delete a blob.
pub(crate) async fn delete_blob(
    state: &AppState,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    let digest = Digest::parse(digest)?;
    state.store.delete_blob(name, &digest).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Open an upload session.
pub(crate) async fn open_upload(state: &AppState, name: &str) -> RegistryResult<Response> {
    let id = state.uploads.open(name).await?;
    let location = format!("/v2/{name}/blobs/uploads/{id}");

    Ok((StatusCode::ACCEPTED, [(header::LOCATION, location)]).into_response())
}

/// Stage layer bytes into an upload session.
pub(crate) async fn patch_upload(
    state: &AppState,
    name: &str,
    upload_id: &str,
    body: Bytes,
) -> RegistryResult<Response> {
    let written = state
        .uploads
        .append(name, upload_id, &mut body.as_ref())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        [
            (
                header::LOCATION,
                format!("/v2/{name}/blobs/uploads/{upload_id}"),
            ),
            (
                HeaderName::from_static("docker-upload-uuid"),
                upload_id.to_string(),
            ),
            (header::RANGE, format!("0-{written}")),
        ],
    )
        .into_response())
}

/// Commit an upload session under the digest asserted in the query.
pub(crate) async fn put_upload(
    state: &AppState,
    name: &str,
    upload_id: &str,
    digest: Option<&str>,
) -> RegistryResult<Response> {
    let digest = digest
        .ok_or_else(|| RegistryError::DigestInvalid("missing digest parameter".to_owned()))?;
    let digest = Digest::parse(digest)?;
    state.uploads.close(name, upload_id, &digest).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/v2/{name}/blobs/{digest}"))],
    )
        .into_response())
}
