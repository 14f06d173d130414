//! Page binding: how a connection names the page it edits.
//!
//! A client upgrades on `/ws?pageId=<id>`. The identifier is opaque; it only
//! has to be non-empty. It doubles as the storage key, so it also knows how to
//! turn itself into a file name that cannot escape the storage root.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;

/// Path the WebSocket upgrade is served on.
pub const WS_PATH: &str = "/ws";

/// Query parameter carrying the page identifier.
pub const PAGE_QUERY_KEY: &str = "pageId";

/// Extension of persisted snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "txt";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageIdError {
    #[error("page identifier must not be empty")]
    Empty,
}

/// Why an upgrade request could not be bound to a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("unknown path: {0}")]
    UnknownPath(String),
    #[error("missing `pageId` query parameter")]
    MissingPageId,
}

/// Identifier of a page: the unit of broadcast and storage isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(Arc<str>);

impl PageId {
    pub fn new(id: impl AsRef<str>) -> Result<Self, PageIdError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(PageIdError::Empty);
        }
        Ok(Self(Arc::from(id)))
    }

    /// Mint a short random identifier for a brand-new page.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(Arc::from(&simple[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic file name for this page's snapshot.
    ///
    /// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes
    /// `%XX`. The mapping is injective and never yields a path separator or
    /// a `..` component.
    pub fn file_name(&self) -> String {
        let mut name = String::with_capacity(self.0.len() + SNAPSHOT_EXTENSION.len() + 1);
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name.push('.');
        name.push_str(SNAPSHOT_EXTENSION);
        name
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for PageId {
    type Error = PageIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Resolve the page an upgrade request binds to.
pub fn page_from_request(path: &str, query: Option<&str>) -> Result<PageId, BindError> {
    if path != WS_PATH {
        return Err(BindError::UnknownPath(path.to_string()));
    }
    let query = query.ok_or(BindError::MissingPageId)?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == PAGE_QUERY_KEY)
        .and_then(|(_, value)| PageId::new(value).ok())
        .ok_or(BindError::MissingPageId)
}

/// Build the client URL for `page` on a server reachable at `base`
/// (e.g. `ws://127.0.0.1:8080`).
pub fn page_url(base: &str, page: &PageId) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair(PAGE_QUERY_KEY, page.as_str())
        .finish();
    format!("{}{WS_PATH}?{query}", base.trim_end_matches('/'))
}
