//! Cursor-tracked incremental paging over a query.

use crate::entity::ManagedObject;
use crate::error::MellonResult;

use super::QueryBuilder;

/// Loads the results of a query in fixed-size pages.
///
/// The total is counted once, on first use, and cached for the pager's
/// lifetime. Rows inserted or deleted afterwards do not move the total, so
/// concurrent changes can shift rows across page boundaries.
#[derive(Debug)]
pub struct ElasticPager {
    query: QueryBuilder,
    page_size: usize,
    cursor: usize,
    total: Option<usize>,
    loaded: Vec<ManagedObject>,
}

impl ElasticPager {
    /// Pager over `query`. A zero page size is treated as one.
    pub fn new(query: QueryBuilder, page_size: usize) -> Self {
        Self {
            query,
            page_size: page_size.max(1),
            cursor: 0,
            total: None,
            loaded: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Rows fetched so far.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Every object loaded so far, in load order.
    #[must_use]
    pub fn objects(&self) -> &[ManagedObject] {
        &self.loaded
    }

    /// Number of rows the query matched when first counted.
    pub fn total_number_of_results(&mut self) -> MellonResult<usize> {
        if let Some(total) = self.total {
            return Ok(total);
        }
        let total = self.query.count()?;
        self.total = Some(total);
        Ok(total)
    }

    pub fn can_load_more(&mut self) -> MellonResult<bool> {
        Ok(self.cursor < self.total_number_of_results()?)
    }

    /// Fetches the next page, or an empty page once everything is loaded.
    pub fn load_more(&mut self) -> MellonResult<Vec<ManagedObject>> {
        let total = self.total_number_of_results()?;
        if self.cursor >= total {
            return Ok(Vec::new());
        }

        let state = self.query.state();
        let base_offset = state.offset;
        let page = self
            .query
            .clone()
            .offset(base_offset + self.cursor)
            .limit(self.page_size.min(total - self.cursor))
            .execute()?;

        if page.is_empty() {
            // Rows vanished since counting; nothing further can be loaded.
            self.total = Some(self.cursor);
        }
        self.cursor += page.len();
        self.loaded.extend(page.iter().cloned());
        Ok(page)
    }

    /// Loads every remaining page.
    pub fn load_all(&mut self) -> MellonResult<&[ManagedObject]> {
        while self.can_load_more()? {
            self.load_more()?;
        }
        Ok(&self.loaded)
    }
}
