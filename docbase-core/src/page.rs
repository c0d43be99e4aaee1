//! Pagination types for query results.
//!
//! [`PageRequest`] names a 1-indexed page and a page size;
//! [`Page`] carries one page of results with the total count and navigation
//! metadata.

use serde::{Deserialize, Serialize};

/// A single page of query results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Total matching items across all pages.
    pub total: u64,
    /// The next page number, when more pages exist.
    pub next_page: Option<u64>,
    /// The previous page number, when this is not the first page.
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    pub(crate) fn assemble(items: Vec<T>, total: u64, request: &PageRequest) -> Self {
        let consumed = request.offset() + items.len() as u64;
        Self {
            items,
            total,
            next_page: (consumed < total).then(|| request.page + 1),
            previous_page: (request.page > 1).then(|| request.page - 1),
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Parameters selecting one page of a result set. Pages are 1-indexed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page: page.max(1), per_page }
    }

    /// The number of items preceding this page.
    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn test_navigation_metadata() {
        let request = PageRequest::new(2, 10);
        let page = Page::assemble(vec![0u8; 10], 35, &request);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));

        let request = PageRequest::new(4, 10);
        let page = Page::assemble(vec![0u8; 5], 35, &request);
        assert_eq!(page.next_page, None);
        assert_eq!(page.previous_page, Some(3));
    }

    #[test]
    fn test_first_page_has_no_previous() {
        let request = PageRequest::new(1, 10);
        let page = Page::assemble(vec![0u8; 10], 11, &request);
        assert_eq!(page.previous_page, None);
        assert_eq!(page.next_page, Some(2));
    }
}
