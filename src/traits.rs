//! Service seams for the backup pipeline.
//!
//! The pipeline never talks to AWS directly. It pulls pages from a
//! [`QueryService`] and pushes archives to an [`ObjectStore`]; the binary
//! wires in the Timestream and S3 implementations, tests wire in fakes.
//!
//! ```text
//! ┌──────────────┐   pages    ┌──────────┐  archives  ┌─────────────┐
//! │ QueryService │──────────▶│ pipeline │──────────▶│ ObjectStore │
//! │  Timestream  │            │          │            │ S3/dir/mem  │
//! └──────────────┘            └──────────┘            └─────────────┘
//! ```
//!
//! Implementations must be `Send + Sync`: one instance is shared by every
//! partition worker of a run.

use anyhow::Result;
use async_trait::async_trait;

use crate::archive::ObjectKey;
use crate::models::{QueryPage, QueryRequest};

/// A paginated query endpoint.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use timestream_travel::models::{QueryPage, QueryRequest};
/// use timestream_travel::traits::QueryService;
///
/// struct EmptyTable;
///
/// #[async_trait]
/// impl QueryService for EmptyTable {
///     async fn query(&self, _request: &QueryRequest) -> Result<QueryPage> {
///         Ok(QueryPage::default())
///     }
/// }
/// ```
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Execute one page of `request.query`.
    ///
    /// `request.next_token` is `None` for the first page and the previous
    /// page's token afterwards. The returned page's `next_token` is `None`
    /// once the result set is exhausted. Pages may be empty while still
    /// carrying a token.
    async fn query(&self, request: &QueryRequest) -> Result<QueryPage>;
}

/// Destination for sealed archives.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short label for logs (e.g. `"s3"`, `"dir"`).
    fn kind(&self) -> &str;

    /// Store `body` under `key` in `bucket`, returning the object location.
    ///
    /// Keys are content-addressed, so writing the same key twice writes the
    /// same bytes.
    async fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<String>;
}
