//! Pull-based pagination.
//!
//! [`PageStream`] drives a [`QueryService`] one page at a time. The caller
//! asks for the next page explicitly, so there is exactly one request in
//! flight per stream and every suspension point is visible at the call site.
//! The stream is finite and cannot be restarted: once it yields an error or
//! reaches a page without a continuation token it only yields `None`.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{QueryPage, QueryRequest};
use crate::traits::QueryService;

/// Why a page could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Query(#[from] anyhow::Error),
}

/// Race `fut` against `cancel`. Returns `None` if the token fired first;
/// the future is dropped without completing.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// A lazy sequence of pages for one query.
pub struct PageStream {
    service: Arc<dyn QueryService>,
    query: String,
    max_rows: u32,
    next_token: Option<String>,
    started: bool,
    done: bool,
    cancel: CancellationToken,
}

impl PageStream {
    pub fn new(
        service: Arc<dyn QueryService>,
        query: impl Into<String>,
        max_rows: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            query: query.into(),
            max_rows,
            next_token: None,
            started: false,
            done: false,
            cancel,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Fetch the next page, or `None` once pagination is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<QueryPage, FetchError>> {
        if self.done {
            return None;
        }
        if self.started && self.next_token.is_none() {
            self.done = true;
            return None;
        }
        self.started = true;

        let request = QueryRequest {
            query: self.query.clone(),
            next_token: self.next_token.take(),
            max_rows: self.max_rows,
        };

        match until_cancelled(&self.cancel, self.service.query(&request)).await {
            None => {
                self.done = true;
                Some(Err(FetchError::Cancelled))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(FetchError::Query(e)))
            }
            Some(Ok(mut page)) => {
                self.next_token = page.next_token.take();
                page.next_token = self.next_token.clone();
                Some(Ok(page))
            }
        }
    }
}
