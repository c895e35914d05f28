//! Pagination request and result types.

use serde::{Deserialize, Serialize};

use super::record::Record;

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub list: Vec<Record>,
    pub page: u64,
    pub page_size: u64,
    pub total_page: u64,
    pub total_row: u64,
}

impl Page {
    /// A page with no rows for the given position and total.
    pub fn empty(page: u64, page_size: u64, total_row: u64) -> Self {
        Self {
            list: Vec::new(),
            page,
            page_size,
            total_page: total_pages(total_row, page_size),
            total_row,
        }
    }

    pub fn is_first(&self) -> bool {
        self.page <= 1
    }

    pub fn is_last(&self) -> bool {
        self.page >= self.total_page
    }
}

/// `ceil(total_row / page_size)`; zero when either side is zero.
pub fn total_pages(total_row: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total_row.div_ceil(page_size)
}

/// The fragments of a paged SELECT: `SELECT <select> FROM <table> [WHERE <filter>]
/// [ORDER BY <order_by>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    pub select: String,
    pub table: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub order_by: String,
}

impl PageQuery {
    /// Select every column of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            select: "*".to_string(),
            table: table.into(),
            filter: String::new(),
            order_by: String::new(),
        }
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = select.into();
        self
    }

    /// WHERE fragment; a leading `WHERE` keyword is tolerated.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// ORDER BY fragment; a leading `ORDER BY` is tolerated.
    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = order_by.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(5, 0), 0);
    }

    #[test]
    fn test_empty_page_bounds() {
        let page = Page::empty(4, 10, 25);
        assert_eq!(page.total_page, 3);
        assert!(page.list.is_empty());
        assert!(page.is_last());
        assert!(!page.is_first());
    }

    #[test]
    fn test_page_query_builder() {
        let q = PageQuery::new("users")
            .select("id, name")
            .filter("WHERE age > ?")
            .order_by("id DESC");
        assert_eq!(q.select, "id, name");
        assert_eq!(q.table, "users");
        assert_eq!(q.filter, "WHERE age > ?");
    }
}
