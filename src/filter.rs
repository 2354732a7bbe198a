use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u8 = 20;
pub const MAX_LIMIT: u8 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Universal list-query filter. Pagination is offset-based; timestamps are
/// epoch milliseconds matching the storage format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub page: u16,
    pub limit: u8,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub updated_after: Option<i64>,
    pub updated_before: Option<i64>,
    pub include_archived: bool,
    pub sort_by: SortOrder,
}

impl Default for QueryFilter {
    fn default() -> Self {
        QueryFilter {
            page: 1,
            limit: DEFAULT_LIMIT,
            created_after: None,
            created_before: None,
            updated_after: None,
            updated_before: None,
            include_archived: false,
            sort_by: SortOrder::default(),
        }
    }
}

impl QueryFilter {
    /// Filter used by exhaustive internal crawls: every row, archived
    /// included, biggest page size allowed.
    pub fn everything() -> Self {
        QueryFilter {
            limit: MAX_LIMIT,
            include_archived: true,
            ..QueryFilter::default()
        }
    }

    pub fn page(&self) -> i64 {
        i64::from(self.page.max(1))
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.limit.clamp(1, MAX_LIMIT))
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

/// A page of rows plus the two server-side counts every list response
/// carries: rows matching the filter, and live rows of the entity overall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredResult<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub filtered_count: i64,
    pub total_count: i64,
}
