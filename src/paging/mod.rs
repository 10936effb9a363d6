//! Offset/limit paging shared by every store query.
//!
//! Each paged query runs in two halves against the same filter: a count and
//! a page select. Filters are modeled as typed objects that push predicate +
//! bind pairs into a `sqlx::QueryBuilder`, so both halves are built from the
//! single source of truth and no SQL is ever assembled by string
//! concatenation.

use serde::{Deserialize, Serialize};

/// Hard cap on page size to keep a single query bounded.
pub const MAX_PAGE_SIZE: u32 = 500;

/// A validated page request (1-based page numbers).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Create a page request, clamping out-of-range values instead of
    /// rejecting them.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: 50 }
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, page: PageRequest) -> Self {
        Self {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.total <= 0 {
            0
        } else {
            ((self.total + self.page_size as i64 - 1) / self.page_size as i64) as u32
        }
    }
}

/// Paginate an already-filtered, already-sorted in-memory result set.
/// Used by the memory store implementations.
pub fn paginate<T>(rows: Vec<T>, page: PageRequest) -> PagedResult<T> {
    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.page_size as usize)
        .collect();
    PagedResult::new(items, total, page)
}
