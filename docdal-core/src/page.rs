//! Pagination parameters.
//!
//! A [`Page`] is either valid, in which case its offset and limit are applied as
//! skip/limit, or invalid, in which case the full (sorted) result set is returned.

use serde::{Deserialize, Serialize};

/// Offset/limit pagination descriptor.
///
/// # Example
///
/// ```ignore
/// use docdal::page::Page;
///
/// let page = Page::parse("10", "5");
/// assert!(page.valid);
/// assert_eq!(page.skip(), Some(10));
///
/// // A missing or malformed parameter disables pagination entirely.
/// assert!(!Page::parse("", "5").valid);
/// assert_eq!(Page::parse("x", "5").limit(), None);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Whether `offset` and `limit` should be applied.
    pub valid: bool,
    /// Number of documents to skip.
    pub offset: u32,
    /// Maximum number of documents to return. Zero means no limit.
    pub limit: u32,
}

impl Page {
    /// Creates a valid page from already-typed values.
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { valid: true, offset, limit }
    }

    /// Creates an invalid page, which returns the whole result set.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parses raw offset/limit parameters, typically taken from a query string.
    ///
    /// The page is valid only if both parameters are present and parse as non-negative
    /// 32-bit integers.
    pub fn parse(offset: &str, limit: &str) -> Self {
        if offset.is_empty() || limit.is_empty() {
            return Self::all();
        }

        match (parse_count(offset), parse_count(limit)) {
            (Some(offset), Some(limit)) => Self::new(offset, limit),
            _ => Self::all(),
        }
    }

    /// Parses optional parameters; an absent parameter invalidates the page.
    pub fn parse_opt(offset: Option<&str>, limit: Option<&str>) -> Self {
        Self::parse(offset.unwrap_or_default(), limit.unwrap_or_default())
    }

    /// Number of documents to skip, if this page is valid.
    pub fn skip(&self) -> Option<u64> {
        self.valid.then_some(self.offset as u64)
    }

    /// Maximum number of documents to return, if this page is valid and bounded.
    pub fn limit(&self) -> Option<i64> {
        (self.valid && self.limit > 0).then_some(self.limit as i64)
    }
}

fn parse_count(raw: &str) -> Option<u32> {
    raw.parse::<i32>()
        .ok()
        .and_then(|value| u32::try_from(value).ok())
}
