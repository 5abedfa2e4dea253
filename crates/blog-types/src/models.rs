use serde::{Deserialize, Serialize};

/// Upper bound on page size accepted from callers.
pub const MAX_PER_PAGE: u32 = 100;

/// One page of an ordered result set.
///
/// Pages are 1-indexed. `has_next` is derived from the total match count,
/// not from the length of `items`, so a short final page still reports
/// `has_next = false` and a page past the end is simply empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_num: Option<u32>,
    pub prev_num: Option<u32>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Self {
        let has_next = u64::from(page) * u64::from(per_page) < total;
        let has_prev = page > 1;
        Self {
            items,
            page,
            per_page,
            total,
            has_next,
            has_prev,
            next_num: has_next.then(|| page + 1),
            prev_num: has_prev.then(|| page - 1),
        }
    }

    pub fn empty(page: u32, per_page: u32) -> Self {
        Self::new(Vec::new(), page, per_page, 0)
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            has_next: self.has_next,
            has_prev: self.has_prev,
            next_num: self.next_num,
            prev_num: self.prev_num,
        }
    }
}

/// Normalized page request: page >= 1, per_page within 1..=MAX_PER_PAGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}
