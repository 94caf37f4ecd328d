//! Upload session lifecycle.
//!
//! A session is an opaque UUID handed out at POST time. No directory is
//! created until the first PATCH, so the only durable trace of an open
//! session is the repository directory itself. The session directory holds
//! exactly one staged layer file and is consumed by the commit rename.

use tokio::fs;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};
use crate::grammar::Digest;
use crate::store::{self, ContentStore};

#[derive(Clone, Debug)]
pub(crate) struct UploadSessions {
    store: ContentStore,
}

impl UploadSessions {
    pub fn new(store: ContentStore) -> Self {
        Self { store }
    }

    /// Allocate a session id for `name`. The repository directory is
    /// created now; the session directory waits for the first PATCH.
    #[tracing::instrument(skip(self))]
    pub async fn open(&self, name: &str) -> RegistryResult<String> {
        self.store.ensure_repo(name).await?;
        let id = Uuid::new_v4().to_string();
        tracing::debug!(%id, "opened upload session");
        Ok(id)
    }

    /// Stage the layer stream for `(name, upload_id)`.
    ///
    /// Ids that were never issued by [`open`](Self::open) cannot be told
    /// apart from issued-but-unused ones, but anything that does not even
    /// look like a session token is certainly unknown. A session that
    /// already holds a layer rejects further chunks.
    #[tracing::instrument(skip(self, reader))]
    pub async fn append<R>(
        &self,
        name: &str,
        upload_id: &str,
        reader: &mut R,
    ) -> RegistryResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        if Uuid::parse_str(upload_id).is_err() {
            return Err(RegistryError::BlobUploadUnknown(upload_id.to_owned()));
        }

        let session = self.store.session_path(name, upload_id);
        if store::pick_only(&session).await?.is_some() {
            return Err(RegistryError::BlobUploadInvalid(format!(
                "session {upload_id} already holds a layer"
            )));
        }
        fs::create_dir_all(&session).await?;
        self.store.create_layer(reader, &session).await
    }

    /// Commit the staged layer under `digest` and retire the session.
    pub async fn close(&self, name: &str, upload_id: &str, digest: &Digest) -> RegistryResult<()> {
        self.store.commit(name, upload_id, digest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions(dir: &tempfile::TempDir) -> UploadSessions {
        UploadSessions::new(ContentStore::new(dir.path().to_str().unwrap()))
    }

    #[tokio::test]
    async fn open_append_close() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = sessions(&dir);

        let id = uploads.open("myorg/myrepo").await.unwrap();
        let data = b"{\"layers\":[]}";
        let written = uploads
            .append("myorg/myrepo", &id, &mut data.as_slice())
            .await
            .unwrap();
        assert_eq!(written, data.len() as u64);

        let digest = Digest::from_content(data);
        uploads.close("myorg/myrepo", &id, &digest).await.unwrap();
    }

    #[tokio::test]
    async fn append_rejects_second_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = sessions(&dir);

        let id = uploads.open("repo").await.unwrap();
        uploads
            .append("repo", &id, &mut b"first".as_slice())
            .await
            .unwrap();
        let err = uploads
            .append("repo", &id, &mut b"second".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::BlobUploadInvalid(_)));
    }

    #[tokio::test]
    async fn append_rejects_malformed_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = sessions(&dir);
        uploads.open("repo").await.unwrap();

        let err = uploads
            .append("repo", "not-a-session", &mut b"data".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::BlobUploadUnknown(_)));
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = sessions(&dir);

        let a = uploads.open("repo").await.unwrap();
        let b = uploads.open("repo").await.unwrap();
        assert_ne!(a, b);
    }
}
