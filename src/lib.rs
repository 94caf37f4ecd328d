//! # wharf
//!
//! A content-addressable container registry implementing the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec)
//! over a plain filesystem tree.
//!
//! ## Features
//!
//! - Pull, push, content-discovery, and content-management endpoints under `/v2/`
//! - Chunk-upload sessions with atomic, digest-verified commit
//! - Media-type detection from layer byte prefixes
//! - Manifests addressable by tag and by digest
//! - OCI error envelopes with the canonical code strings
//!
//! ## Example
//!
//! ```no_run
//! use wharf::RegistryBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = RegistryBuilder::new().base_path("testdata").build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod error;
mod grammar;
mod manifest;
mod store;
mod upload;

pub use api::RegistryBuilder;
pub use error::{RegistryError, RegistryResult};
