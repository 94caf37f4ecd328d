//! Manifest operations for the registry.
//!
//! Manifests are schema-2 image manifests. A PUT persists the canonical
//! re-encoded body twice: under the tag directory and under a directory
//! named by the body's own digest, so pulls work by tag or by digest.

use std::collections::BTreeMap;
use std::io::ErrorKind;

use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::api::AppState;
use crate::error::{RegistryError, RegistryResult};
use crate::grammar::{self, Digest};
use crate::store::{ContentStore, MEDIA_TYPE_MANIFEST};

pub(crate) const MANIFEST_FILE: &str = "manifest.json";

/// Image manifest, schema version 2.
///
/// <https://docs.docker.com/registry/spec/manifest-v2-2/>
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: i32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// Content descriptor: locates one blob referenced by a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Outcome of a manifest PUT.
#[derive(Debug)]
pub(crate) struct StoredManifest {
    /// Digest of the manifest's config descriptor.
    pub config_digest: String,
    /// Digest of the canonical manifest body itself.
    pub digest: Digest,
}

/// Tagged-manifest persistence on top of the content store.
#[derive(Clone, Debug)]
pub(crate) struct ManifestStore {
    store: ContentStore,
}

impl ManifestStore {
    pub fn new(store: ContentStore) -> Self {
        Self { store }
    }

    /// Parse, canonicalize, and persist a manifest under `(name, tag)`.
    #[tracing::instrument(skip(self, body))]
    pub async fn put(&self, name: &str, tag: &str, body: &[u8]) -> RegistryResult<StoredManifest> {
        let manifest: Manifest =
            serde_json::from_slice(body).map_err(RegistryError::ManifestInvalid)?;
        let canonical =
            serde_json::to_vec(&manifest).map_err(RegistryError::ManifestInvalid)?;
        let digest = Digest::from_content(&canonical);

        let tag_dir = self.store.tag_path(name, tag);
        write_manifest(&tag_dir, &canonical)
            .await
            .map_err(|err| RegistryError::TagInvalid(format!("{tag}: {err}")))?;

        let digest_dir = self.store.blob_path(name, &digest);
        write_manifest(&digest_dir, &canonical).await?;

        tracing::debug!(%digest, "stored manifest");
        Ok(StoredManifest {
            config_digest: manifest.config.digest,
            digest,
        })
    }

    /// Canonical manifest bytes for a tag or digest reference.
    pub async fn get(&self, name: &str, reference: &str) -> RegistryResult<Vec<u8>> {
        let path = self.manifest_path(name, reference);
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RegistryError::ManifestUnknown(reference.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the manifest stored under a tag or digest reference.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, name: &str, reference: &str) -> RegistryResult<()> {
        let dir = self.reference_dir(name, reference);
        if fs::metadata(dir.join(MANIFEST_FILE)).await.is_err() {
            return Err(RegistryError::ManifestUnknown(reference.to_owned()));
        }
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    /// Sorted tag names for a repository, optionally paginated: entries
    /// after `last`, at most `n` of them.
    pub async fn tags(
        &self,
        name: &str,
        n: Option<usize>,
        last: Option<&str>,
    ) -> RegistryResult<Vec<String>> {
        let repo = self.store.repo_path(name);
        let mut entries = match fs::read_dir(&repo).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NameUnknown(name.to_owned()))
            }
            Err(err) => return Err(err.into()),
        };

        let mut tags = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            // Digest and upload-session directories share the repository
            // root with tags; only directories holding a manifest under a
            // tag-shaped name are tags.
            if !grammar::is_tag(&dir_name) {
                continue;
            }
            if fs::metadata(entry.path().join(MANIFEST_FILE)).await.is_ok() {
                tags.push(dir_name);
            }
        }
        tags.sort();

        if let Some(last) = last {
            tags.retain(|tag| tag.as_str() > last);
        }
        if let Some(n) = n {
            tags.truncate(n);
        }
        Ok(tags)
    }

    fn manifest_path(&self, name: &str, reference: &str) -> Utf8PathBuf {
        self.reference_dir(name, reference).join(MANIFEST_FILE)
    }

    fn reference_dir(&self, name: &str, reference: &str) -> Utf8PathBuf {
        match Digest::parse(reference) {
            Ok(digest) => self.store.blob_path(name, &digest),
            Err(_) => self.store.tag_path(name, reference),
        }
    }
}

async fn write_manifest(dir: &Utf8Path, canonical: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    fs::write(dir.join(MANIFEST_FILE), canonical).await
}

/// Pull a manifest.
pub(crate) async fn get_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let data = state.manifests.get(name, reference).await?;
    let digest = Digest::from_content(&data);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, MEDIA_TYPE_MANIFEST.to_string()),
            (
                HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
        data,
    )
        .into_response())
}

/// Check that a manifest exists.
pub(crate) async fn head_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let data = state.manifests.get(name, reference).await?;
    let digest = Digest::from_content(&data);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, MEDIA_TYPE_MANIFEST.to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
            (
                HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
    )
        .into_response())
}

/// Push a manifest under a tag.
pub(crate) async fn put_manifest(
    state: &AppState,
    name: &str,
    tag: &str,
    body: &[u8],
) -> RegistryResult<Response> {
    let stored = state.manifests.put(name, tag, body).await?;

    Ok((
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{name}/manifests/{}", stored.digest),
            ),
            (
                HeaderName::from_static("docker-content-digest"),
                stored.config_digest,
            ),
        ],
    )
        .into_response())
}

/// Delete a manifest by tag or digest.
pub(crate) async fn delete_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    state.manifests.delete(name, reference).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Tag list response body.
#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// List tags, lexicographically sorted, with `n`/`last` pagination.
pub(crate) async fn list_tags(
    state: &AppState,
    name: &str,
    n: Option<usize>,
    last: Option<&str>,
) -> RegistryResult<Response> {
    let tags = state.manifests.tags(name, n, last).await?;
    Ok((
        StatusCode::OK,
        Json(TagList {
            name: name.to_owned(),
            tags,
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifests(dir: &tempfile::TempDir) -> ManifestStore {
        ManifestStore::new(ContentStore::new(dir.path().to_str().unwrap()))
    }

    fn sample_manifest() -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "digest": "sha256:b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c",
                "size": 7023
            },
            "layers": [{
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": "sha256:7d865e959b2466918c9863afca942d0fb89d7c9ac0c99bafc3749504ded97730",
                "size": 1024
            }]
        })
    }

    #[tokio::test]
    async fn put_then_get_by_tag_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);
        let body = serde_json::to_vec(&sample_manifest()).unwrap();

        let stored = store.put("myorg/myrepo", "v1", &body).await.unwrap();
        assert_eq!(
            stored.config_digest,
            "sha256:b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c"
        );

        let by_tag = store.get("myorg/myrepo", "v1").await.unwrap();
        let by_digest = store
            .get("myorg/myrepo", stored.digest.as_str())
            .await
            .unwrap();
        assert_eq!(by_tag, by_digest);

        let parsed: serde_json::Value = serde_json::from_slice(&by_tag).unwrap();
        assert_eq!(parsed, sample_manifest());
    }

    #[tokio::test]
    async fn put_overwrites_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);

        let mut value = sample_manifest();
        let first = serde_json::to_vec(&value).unwrap();
        store.put("repo", "latest", &first).await.unwrap();

        value["config"]["size"] = serde_json::json!(9999);
        let second = serde_json::to_vec(&value).unwrap();
        store.put("repo", "latest", &second).await.unwrap();

        let current = store.get("repo", "latest").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&current).unwrap();
        assert_eq!(parsed["config"]["size"], 9999);
    }

    #[tokio::test]
    async fn put_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);

        let err = store.put("repo", "v1", b"not json").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestInvalid(_)));

        let err = store
            .put("repo", "v1", b"{\"schemaVersion\":2}")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ManifestInvalid(_)));
    }

    #[tokio::test]
    async fn get_unknown_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);

        let err = store.get("repo", "nosuchtag").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestUnknown(_)));
    }

    #[tokio::test]
    async fn delete_by_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);
        let body = serde_json::to_vec(&sample_manifest()).unwrap();

        store.put("repo", "v1", &body).await.unwrap();
        store.delete("repo", "v1").await.unwrap();

        let err = store.get("repo", "v1").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestUnknown(_)));

        let err = store.delete("repo", "v1").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestUnknown(_)));
    }

    #[tokio::test]
    async fn tags_sorted_and_paginated() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);
        let body = serde_json::to_vec(&sample_manifest()).unwrap();

        for tag in ["charlie", "alpha", "bravo"] {
            store.put("repo", tag, &body).await.unwrap();
        }

        let all = store.tags("repo", None, None).await.unwrap();
        assert_eq!(all, ["alpha", "bravo", "charlie"]);

        let first_two = store.tags("repo", Some(2), None).await.unwrap();
        assert_eq!(first_two, ["alpha", "bravo"]);

        let resumed = store.tags("repo", None, Some("bravo")).await.unwrap();
        assert_eq!(resumed, ["charlie"]);
    }

    #[tokio::test]
    async fn tags_exclude_digest_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);
        let body = serde_json::to_vec(&sample_manifest()).unwrap();

        // Writes the tag copy and the digest-addressed copy.
        store.put("repo", "only", &body).await.unwrap();

        let tags = store.tags("repo", None, None).await.unwrap();
        assert_eq!(tags, ["only"]);
    }

    #[tokio::test]
    async fn tags_unknown_repository() {
        let dir = tempfile::tempdir().unwrap();
        let store = manifests(&dir);

        let err = store.tags("ghost", None, None).await.unwrap_err();
        assert!(matches!(err, RegistryError::NameUnknown(_)));
    }
}
