//! Core types for feeds, articles and store paths.

use crate::error::{HearthError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier of a feed (the key under the user's feed list).
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub String);

impl FeedId {
    pub fn new(id: impl Into<String>) -> Self {
        FeedId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", self.0)
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedId {
    fn from(s: &str) -> Self {
        FeedId(s.to_string())
    }
}

impl From<String> for FeedId {
    fn from(s: String) -> Self {
        FeedId(s)
    }
}

impl From<&FeedId> for FeedId {
    fn from(id: &FeedId) -> Self {
        id.clone()
    }
}

impl From<&FeedEntry> for FeedId {
    fn from(feed: &FeedEntry) -> Self {
        feed.id.clone()
    }
}

impl Borrow<str> for FeedId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp_millis())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A feed the user is subscribed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(default)]
    pub id: FeedId,

    #[serde(default)]
    pub title: String,

    /// Base link of the feed, used to resolve relative article URLs.
    #[serde(rename = "link", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Last time the user opened this feed.
    #[serde(rename = "last", default)]
    pub last_access: Timestamp,

    #[serde(rename = "isCustom", default)]
    pub is_custom: bool,
}

impl FeedEntry {
    pub fn new(id: impl Into<FeedId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_url: None,
            last_access: Timestamp::default(),
            is_custom: false,
        }
    }

    /// Set the base link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.source_url = Some(link.into());
        self
    }

    /// Mark as a user-created feed.
    pub fn custom(mut self) -> Self {
        self.is_custom = true;
        self
    }
}

/// Keyed state of the user's feed list at one point in time.
pub type FeedListSnapshot = BTreeMap<FeedId, FeedEntry>;

/// Per-feed article counts.
pub type Counts = HashMap<FeedId, usize>;

/// A single article belonging to a feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    #[serde(rename = "feed")]
    pub feed_id: FeedId,
    pub title: String,
    pub summary: String,
    pub description: String,
    pub link: String,
    #[serde(rename = "date")]
    pub published_at: i64,
}

impl Article {
    pub fn key(&self) -> ArticleKey {
        ArticleKey {
            feed_id: self.feed_id.clone(),
            article_id: self.id.clone(),
        }
    }

    /// String-valued fields, in declaration order.
    pub fn text_fields(&self) -> [&str; 6] {
        [
            &self.id,
            self.feed_id.as_str(),
            &self.title,
            &self.summary,
            &self.description,
            &self.link,
        ]
    }
}

/// Identity of an article in the merged collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArticleKey {
    pub feed_id: FeedId,
    pub article_id: String,
}

/// The signed-in user, as reported by the auth gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub provider: String,
}

impl UserRef {
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
        }
    }

    /// The read-only demo account.
    pub fn demo() -> Self {
        Self::new("demo", "demo")
    }

    pub fn is_demo(&self) -> bool {
        self.id == "demo" && self.provider == "demo"
    }

    /// Human-readable name. Persona ids are e-mail addresses stored with
    /// `,` in place of `.`.
    pub fn display_name(&self) -> String {
        match self.provider.as_str() {
            "persona" => self.id.replace(',', "."),
            _ => self.id.clone(),
        }
    }
}

/// Slash-separated address in the remote store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StorePath(Vec<String>);

/// Characters the store refuses in a path segment.
const FORBIDDEN_SEGMENT_CHARS: &[char] = &['.', '#', '$', '[', ']'];

impl StorePath {
    /// The root of the store.
    pub fn root() -> Self {
        StorePath(Vec::new())
    }

    /// Parse a slash-separated path. Empty segments are ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let mut out = StorePath::root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            out = out.child(segment)?;
        }
        Ok(out)
    }

    /// Append one segment.
    pub fn child(&self, segment: impl AsRef<str>) -> Result<Self> {
        let segment = segment.as_ref();
        if segment.is_empty() || segment.contains('/') || segment.contains(FORBIDDEN_SEGMENT_CHARS) {
            return Err(HearthError::InvalidPath(format!(
                "bad segment {:?} under {}",
                segment, self
            )));
        }
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Ok(StorePath(segments))
    }

    pub fn parent(&self) -> Option<StorePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(StorePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last segment, or None for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True if `self` equals `other` or lies above it.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True if a write at `other` can change the value at `self`.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({})", self)
    }
}
