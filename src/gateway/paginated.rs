//! Paginated query variant: repeated page-indexed requests.

use async_trait::async_trait;
use tracing::debug;

use super::{QueryGateway, Row};
use crate::error::Result;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Zero-based page coordinates sent with each request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub index: usize,
    pub size: usize,
}

/// A backend that answers one page of a query at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, account_id: &str, query: &str, page: PageRequest)
        -> Result<Vec<Row>>;
}

/// Query gateway that walks pages until it sees a short one.
///
/// A result whose size is an exact multiple of the page size costs one extra,
/// empty request.
pub struct PaginatedQueryGateway<P> {
    source: P,
    page_size: usize,
}

impl<P: PageSource> PaginatedQueryGateway<P> {
    pub fn new(source: P) -> Self {
        Self::with_page_size(source, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(source: P, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl<P: PageSource> QueryGateway for PaginatedQueryGateway<P> {
    async fn run(&self, account_id: &str, query: &str) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut index = 0;

        loop {
            let page = PageRequest {
                index,
                size: self.page_size,
            };
            let batch = self.source.fetch_page(account_id, query, page).await?;
            let full = batch.len() == self.page_size;

            debug!(account_id = %account_id, page = index, rows = batch.len(), "Fetched page");
            rows.extend(batch);

            if !full {
                break;
            }
            index += 1;
        }

        Ok(rows)
    }
}
