//! Error types for the registry.
//!
//! Every user-attributable failure maps to one of the closed set of OCI
//! error codes and is serialized as the standard envelope:
//! `{"errors":[{"code","message","detail"}]}`. Failures the client did not
//! cause (filesystem trouble, mostly) are logged and surface as a bare 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not present under the requested digest
    #[error("blob unknown: {0}")]
    BlobUnknown(String),

    /// Upload session exists but the request is not acceptable for it
    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    /// Upload session id is not recognized
    #[error("blob upload unknown: {0}")]
    BlobUploadUnknown(String),

    /// Digest fails to parse
    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    /// Committed bytes hash to something other than the asserted digest
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest the client asserted
        expected: String,
        /// Digest of the bytes on disk
        actual: String,
    },

    /// Manifest body failed to parse
    #[error("invalid manifest")]
    ManifestInvalid(#[source] serde_json::Error),

    /// Manifest not present under the requested reference
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Repository name fails the grammar
    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    /// Repository is not known to the registry
    #[error("repository name not known: {0}")]
    NameUnknown(String),

    /// Content size differs from the declared length
    #[error("invalid size: {0}")]
    SizeInvalid(String),

    /// Tag fails the grammar or cannot be written
    #[error("invalid tag: {0}")]
    TagInvalid(String),

    /// Authentication required
    #[error("authentication required")]
    Unauthorized,

    /// Requester has no access to the resource
    #[error("requested access to the resource is denied")]
    Denied,

    /// Operation is not supported by this registry
    #[error("operation unsupported")]
    Unsupported,

    /// IO error; not user-attributable
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobUnknown(_)
            | RegistryError::BlobUploadUnknown(_)
            | RegistryError::ManifestUnknown(_)
            | RegistryError::NameUnknown(_) => StatusCode::NOT_FOUND,
            RegistryError::BlobUploadInvalid(_)
            | RegistryError::DigestInvalid(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::ManifestInvalid(_)
            | RegistryError::NameInvalid(_)
            | RegistryError::SizeInvalid(_)
            | RegistryError::TagInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::Denied => StatusCode::FORBIDDEN,
            RegistryError::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OCI code string for the envelope, or `None` for errors that are
    /// not part of the wire taxonomy and surface as a bare 500.
    pub fn error_code(&self) -> Option<&'static str> {
        let code = match self {
            RegistryError::BlobUnknown(_) => "BLOB_UNKNOWN",
            RegistryError::BlobUploadInvalid(_) => "BLOB_UPLOAD_INVALID",
            RegistryError::BlobUploadUnknown(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::DigestInvalid(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::ManifestInvalid(_) => "MANIFEST_INVALID",
            RegistryError::ManifestUnknown(_) => "MANIFEST_UNKNOWN",
            RegistryError::NameInvalid(_) => "NAME_INVALID",
            RegistryError::NameUnknown(_) => "NAME_UNKNOWN",
            RegistryError::SizeInvalid(_) => "SIZE_INVALID",
            RegistryError::TagInvalid(_) => "TAG_INVALID",
            RegistryError::Unauthorized => "UNAUTHORIZED",
            RegistryError::Denied => "DENIED",
            RegistryError::Unsupported => "UNSUPPORTED",
            RegistryError::Io(_) => return None,
        };
        Some(code)
    }

    /// Structured payload for the envelope's `detail` field, where one exists.
    fn detail(&self) -> Option<serde_json::Value> {
        match self {
            RegistryError::DigestMismatch { expected, actual } => Some(json!({
                "expected": expected,
                "actual": actual,
            })),
            _ => None,
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let Some(code) = self.error_code() else {
            tracing::error!(error = %self, "internal error");
            return status.into_response();
        };

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code,
                message: self.to_string(),
                detail: self.detail(),
            }],
        };

        (status, axum::Json(body)).into_response()
    }
}
