//! Pagination types for table scans.
//!
//! A scan page carries the items it returned and an opaque [`PageToken`] pointing at the
//! next page. Tokens wrap the backend's native cursor and are only meaningful to the
//! backend that produced them.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DatabaseError, DatabaseResult};

/// An opaque continuation token for paginated scans.
///
/// The token text is the base64 encoding of the backend's native cursor bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    /// Wraps native cursor bytes.
    pub fn from_cursor(cursor: &[u8]) -> Self {
        Self(STANDARD.encode(cursor))
    }

    /// Recovers the native cursor bytes, failing with `BadRequest` on a malformed token.
    pub fn to_cursor(&self) -> DatabaseResult<Vec<u8>> {
        STANDARD
            .decode(&self.0)
            .map_err(|e| DatabaseError::BadRequest(format!("malformed page token: {e}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PageToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for PageToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single page of scan results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use dblayer::page::{Page, PageToken};
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_next_page_token(Some(PageToken::from_cursor(b"cursor")))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// assert!(page.has_next_page());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Token for the next page, `None` once the scan is exhausted.
    pub next_page_token: Option<PageToken>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page_token.is_some()
    }

    /// Converts every item, keeping the continuation token.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            next_page_token: self.next_page_token,
        })
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: None,
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
pub struct PageBuilder<T> {
    items: Vec<T>,
    next_page_token: Option<PageToken>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    /// Sets the next page token (or `None` if this is the last page).
    pub fn with_next_page_token(mut self, token: Option<PageToken>) -> Self {
        self.next_page_token = token;
        self
    }

    /// Builds and returns the final [`Page`] instance.
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            next_page_token: self.next_page_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_wrap_binary_cursors() {
        let cursor = [0u8, 159, 146, 150, 255];
        let token = PageToken::from_cursor(&cursor);
        assert_eq!(token.to_cursor().unwrap(), cursor);
    }

    #[test]
    fn malformed_tokens_are_bad_requests() {
        let err = PageToken::from("not base64!").to_cursor().unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[test]
    fn try_map_keeps_the_token() {
        let page = Page::builder(vec!["1", "2"])
            .with_next_page_token(Some(PageToken::from("abc=")))
            .build();
        let mapped = page.try_map(|s| s.parse::<i32>()).unwrap();
        assert_eq!(mapped.items, vec![1, 2]);
        assert_eq!(mapped.next_page_token, Some(PageToken::from("abc=")));
    }
}
