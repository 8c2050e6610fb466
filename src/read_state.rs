//! Read markers, mirrored two-way with the store.

use crate::error::Result;
use crate::registry::Disposable;
use crate::remote::RemoteStore;
use crate::sync::TwoWaySync;
use crate::types::{Article, FeedId, StorePath, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// feed id → article id → time the article was read (epoch millis).
pub type ReadMarks = BTreeMap<FeedId, BTreeMap<String, i64>>;

/// Keep the newest `window` markers of one feed.
///
/// Runs on every local mark, and the trimmed map is what gets pushed, so
/// older markers are deleted from the store rather than merely not read.
fn prune(marks: &mut BTreeMap<String, i64>, window: usize) {
    if marks.len() <= window {
        return;
    }
    let mut by_age: Vec<(i64, String)> = marks.iter().map(|(k, v)| (*v, k.clone())).collect();
    by_age.sort();
    let excess = marks.len() - window;
    for (_, key) in by_age.into_iter().take(excess) {
        marks.remove(&key);
    }
}

/// The user's read markers.
///
/// Read-only sessions (the demo account) observe markers but never write.
/// Each feed keeps at most `window` markers, trimmed oldest first whenever
/// that feed is marked.
pub struct ReadState {
    sync: Arc<TwoWaySync<ReadMarks>>,
    window: usize,
    read_only: bool,
}

impl ReadState {
    pub fn establish(store: Arc<dyn RemoteStore>, path: StorePath, window: usize, read_only: bool) -> Result<Self> {
        Ok(Self {
            sync: TwoWaySync::establish(store, path)?,
            window,
            read_only,
        })
    }

    /// Mark one article read now.
    pub fn mark_article_read(&self, article: &Article) -> Result<()> {
        self.mark(article.feed_id.clone(), std::iter::once(article.id.clone()))
            .map(|_| ())
    }

    /// Mark every given article of `feed_id` read. Returns how many were
    /// newly marked.
    pub fn mark_feed_read(&self, feed_id: &FeedId, articles: &[Article]) -> Result<usize> {
        let ids = articles
            .iter()
            .filter(|a| &a.feed_id == feed_id)
            .map(|a| a.id.clone());
        self.mark(feed_id.clone(), ids)
    }

    /// Mark every article of every listed feed read.
    pub fn mark_all_read<'a>(&self, feeds: impl IntoIterator<Item = &'a FeedId>, articles: &[Article]) -> Result<usize> {
        let mut total = 0;
        for feed_id in feeds {
            total += self.mark_feed_read(feed_id, articles)?;
        }
        Ok(total)
    }

    fn mark(&self, feed_id: FeedId, ids: impl Iterator<Item = String>) -> Result<usize> {
        if self.read_only {
            return Ok(0);
        }
        let now = Timestamp::now().0;
        let window = self.window;
        let marked = self.sync.update(|marks| {
            let feed_marks = marks.entry(feed_id.clone()).or_default();
            let mut marked = 0;
            for id in ids {
                if feed_marks.insert(id, now).is_none() {
                    marked += 1;
                }
            }
            prune(feed_marks, window);
            marked
        })?;
        debug!(feed_id = %feed_id, marked, "Marked articles read");
        Ok(marked)
    }

    /// Drop all markers of a feed the user unsubscribed from.
    pub fn forget_feed(&self, feed_id: &FeedId) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.sync.update(|marks| {
            marks.remove(feed_id);
        })
    }

    /// Absence of a marker is simply "unread".
    pub fn is_read(&self, article: &Article) -> bool {
        self.sync.with(|marks| {
            marks
                .get(&article.feed_id)
                .is_some_and(|m| m.contains_key(&article.id))
        })
    }

    pub fn marks(&self) -> ReadMarks {
        self.sync.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.sync.is_loaded()
    }
}

impl Disposable for ReadState {
    fn dispose(&self) {
        self.sync.dispose();
    }
}
