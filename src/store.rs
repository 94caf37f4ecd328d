//! On-disk content store.
//!
//! Layout, relative to the base path:
//!
//! ```text
//! <name>/<digest>/<layer.tar.gz|layer.json>
//! <name>/<upload-id>/<layer.tar.gz|layer.json>   (transient)
//! <name>/<tag>/manifest.json
//! ```
//!
//! Every blob lives alone in a directory named by its digest, so lookup is
//! "pick the single file in the directory" and commit is a rename within
//! the base tree, which keeps it atomic on POSIX filesystems.

use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Sha256, Sha512};
use tokio::fs;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{RegistryError, RegistryResult};
use crate::grammar::Digest;

/// Media type served for manifest-shaped content.
pub(crate) const MEDIA_TYPE_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Media type served for layer archives.
pub(crate) const MEDIA_TYPE_LAYER: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// How much of a layer stream is inspected for media-type detection.
const PEEK_LEN: usize = 8192;

/// Filesystem-backed store rooted at a configurable base path.
#[derive(Clone, Debug)]
pub(crate) struct ContentStore {
    base: Utf8PathBuf,
}

impl ContentStore {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn repo_path(&self, name: &str) -> Utf8PathBuf {
        self.base.join(name)
    }

    /// `base/<name>/<digest>`, the digest string kept verbatim.
    pub fn blob_path(&self, name: &str, digest: &Digest) -> Utf8PathBuf {
        self.base.join(name).join(digest.as_str())
    }

    pub fn session_path(&self, name: &str, upload_id: &str) -> Utf8PathBuf {
        self.base.join(name).join(upload_id)
    }

    pub fn tag_path(&self, name: &str, tag: &str) -> Utf8PathBuf {
        self.base.join(name).join(tag)
    }

    pub async fn ensure_repo(&self, name: &str) -> RegistryResult<()> {
        fs::create_dir_all(self.repo_path(name)).await?;
        Ok(())
    }

    /// Write a layer stream into `dir` as `layer.tar.gz` or `layer.json`,
    /// deciding the extension from the first bytes of the stream. Returns
    /// the total number of bytes written, peeked prefix included.
    #[tracing::instrument(skip(self, reader))]
    pub async fn create_layer<R>(&self, reader: &mut R, dir: &Utf8Path) -> RegistryResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut prefix = [0u8; PEEK_LEN];
        let mut filled = 0;
        while filled < PEEK_LEN {
            let n = reader.read(&mut prefix[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let path = dir.join(format!("layer{}", detect_extension(&prefix[..filled])));
        let mut writer = io::BufWriter::new(fs::File::create(&path).await?);
        writer.write_all(&prefix[..filled]).await?;
        let rest = io::copy(reader, &mut writer).await?;
        writer.shutdown().await?;

        let size = filled as u64 + rest;
        tracing::debug!(%path, size, "stored layer");
        Ok(size)
    }

    /// Single-file metadata for a stored blob.
    pub async fn stat_blob(&self, name: &str, digest: &Digest) -> RegistryResult<LayerFile> {
        let dir = self.blob_path(name, digest);
        pick_only(&dir)
            .await?
            .ok_or_else(|| RegistryError::BlobUnknown(digest.to_string()))
    }

    /// Full contents of a stored blob.
    pub async fn read_blob(
        &self,
        name: &str,
        digest: &Digest,
    ) -> RegistryResult<(LayerFile, Vec<u8>)> {
        let dir = self.blob_path(name, digest);
        let file = pick_only(&dir)
            .await?
            .ok_or_else(|| RegistryError::BlobUnknown(digest.to_string()))?;
        let data = fs::read(dir.join(&file.name)).await?;
        Ok((file, data))
    }

    /// Move the staged session layer into its digest directory.
    ///
    /// The staged bytes are re-hashed and compared against the asserted
    /// digest before anything moves; on mismatch the session is left
    /// intact so the client can retry.
    #[tracing::instrument(skip(self))]
    pub async fn commit(
        &self,
        name: &str,
        upload_id: &str,
        digest: &Digest,
    ) -> RegistryResult<()> {
        let session = self.session_path(name, upload_id);
        let staged = pick_only(&session)
            .await?
            .ok_or_else(|| RegistryError::BlobUploadUnknown(upload_id.to_owned()))?;
        let staged_path = session.join(&staged.name);

        let actual = match digest.algorithm() {
            "sha512" => file_hex_digest::<Sha512>(&staged_path).await?,
            _ => file_hex_digest::<Sha256>(&staged_path).await?,
        };
        if actual != digest.hex() {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: format!("{}:{}", digest.algorithm(), actual),
            });
        }

        let blob_dir = self.blob_path(name, digest);
        fs::create_dir_all(&blob_dir).await?;
        fs::rename(&staged_path, blob_dir.join(&staged.name)).await?;
        fs::remove_dir(&session).await?;
        tracing::debug!(%digest, "committed blob");
        Ok(())
    }

    /// Remove a blob's digest directory.
    #[tracing::instrument(skip(self))]
    pub async fn delete_blob(&self, name: &str, digest: &Digest) -> RegistryResult<()> {
        let dir = self.blob_path(name, digest);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RegistryError::BlobUnknown(digest.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Name and size of a file stored by the registry.
#[derive(Debug, Clone)]
pub(crate) struct LayerFile {
    pub name: String,
    pub size: u64,
}

/// The single file in `dir`, or `None` when the directory is missing or
/// empty. Directories managed by this store never hold more than one file.
pub(crate) async fn pick_only(dir: &Utf8Path) -> RegistryResult<Option<LayerFile>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            return Ok(Some(LayerFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
            }));
        }
    }
    Ok(None)
}

/// Content type by file extension at rest.
pub(crate) fn predict_content_type(filename: &str) -> &'static str {
    if filename.ends_with(".json") {
        MEDIA_TYPE_MANIFEST
    } else {
        MEDIA_TYPE_LAYER
    }
}

fn detect_extension(prefix: &[u8]) -> &'static str {
    if is_archive(prefix) {
        ".tar.gz"
    } else {
        ".json"
    }
}

fn is_archive(buf: &[u8]) -> bool {
    const GZIP: &[u8] = &[0x1f, 0x8b];
    const XZ: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
    const ZSTD: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
    const BZIP2: &[u8] = b"BZh";
    const ZIP: &[u8] = &[0x50, 0x4b, 0x03, 0x04];
    const TAR_MAGIC_OFFSET: usize = 257;

    buf.starts_with(GZIP)
        || buf.starts_with(XZ)
        || buf.starts_with(ZSTD)
        || buf.starts_with(BZIP2)
        || buf.starts_with(ZIP)
        || buf
            .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5)
            .is_some_and(|magic| magic == b"ustar")
}

async fn file_hex_digest<D>(path: &Utf8Path) -> std::io::Result<String>
where
    D: sha2::Digest,
{
    let mut file = fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
