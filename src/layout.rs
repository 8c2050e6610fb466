//! Where things live in the remote store.

use crate::config::HearthConfig;
use crate::error::Result;
use crate::types::{FeedId, StorePath, UserRef};

/// Path builder for the store layout.
///
/// ```text
/// <root>/feeds/meta/<feedId>             feed catalogue
/// <root>/feeds/articles/<feedId>/<key>   articles (demo: <root>/demo/articles/...)
/// <root>/user/<provider>/<id>/list       the user's feed list
/// <root>/user/<provider>/<id>/read       read markers
/// ```
#[derive(Clone, Debug)]
pub struct StoreLayout {
    root: StorePath,
    demo: bool,
}

impl StoreLayout {
    pub fn new(root: StorePath, demo: bool) -> Self {
        Self { root, demo }
    }

    pub fn from_config(config: &HearthConfig) -> Result<Self> {
        Ok(Self::new(StorePath::parse(&config.root)?, config.demo))
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }

    /// Catalogue of feeds a user can pick from.
    pub fn feed_catalog(&self) -> Result<StorePath> {
        self.root.child("feeds")?.child("meta")
    }

    /// Articles of one feed.
    pub fn articles(&self, feed: &FeedId) -> Result<StorePath> {
        let area = if self.demo {
            self.root.child("demo")?
        } else {
            self.root.child("feeds")?
        };
        area.child("articles")?.child(feed.as_str())
    }

    fn user(&self, user: &UserRef) -> Result<StorePath> {
        self.root.child("user")?.child(&user.provider)?.child(&user.id)
    }

    /// The user's subscribed feeds.
    pub fn feed_list(&self, user: &UserRef) -> Result<StorePath> {
        self.user(user)?.child("list")
    }

    /// The user's read markers.
    pub fn read_markers(&self, user: &UserRef) -> Result<StorePath> {
        self.user(user)?.child("read")
    }
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::new(StorePath::root(), false)
    }
}
