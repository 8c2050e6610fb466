//! Filtering and ordering of the merged article collection for display.
//!
//! Everything here is a pure function of its inputs.

use crate::read_state::ReadMarks;
use crate::types::{Article, Counts, FeedId};
use std::cmp::Ordering;

/// Case-insensitive substring match against every field of the article.
///
/// An empty query matches everything.
pub fn text_filter(article: &Article, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    article
        .text_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
        || article.published_at.to_string().contains(&needle)
}

/// Hide read articles unless `show_read` is set.
pub fn read_filter(article: &Article, read: &ReadMarks, show_read: bool) -> bool {
    show_read
        || read
            .get(&article.feed_id)
            .map_or(true, |marks| !marks.contains_key(&article.id))
}

/// Restrict to the selected feed, if any.
pub fn feed_filter(article: &Article, active_feed: Option<&FeedId>) -> bool {
    active_feed.map_or(true, |feed| *feed == article.feed_id)
}

/// Numeric field articles can be sorted on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Date,
}

impl SortField {
    pub fn key(self, article: &Article) -> i64 {
        match self {
            SortField::Date => article.published_at,
        }
    }
}

/// Order two articles on `field`.
///
/// Equal keys fall back to feed id, then article id, both ascending, so the
/// order never depends on how the collection happens to be stored.
pub fn compare(a: &Article, b: &Article, field: SortField, descending: bool) -> Ordering {
    let primary = field.key(a).cmp(&field.key(b));
    let primary = if descending { primary.reverse() } else { primary };
    primary
        .then_with(|| a.feed_id.cmp(&b.feed_id))
        .then_with(|| a.id.cmp(&b.id))
}

/// Number of articles the current selection covers.
pub fn visible_count(counts: &Counts, active_feed: Option<&FeedId>) -> usize {
    match active_feed {
        Some(feed) => counts.get(feed).copied().unwrap_or(0),
        None => counts.values().sum(),
    }
}

/// True when loading finished, feeds exist, and nothing is left to show.
pub fn no_visible_articles(loading: bool, no_feeds: bool, visible: usize) -> bool {
    !loading && !no_feeds && visible == 0
}

/// Everything the presentation layer chose about what to show.
#[derive(Clone, Debug, Default)]
pub struct ViewQuery {
    pub text: String,
    pub show_read: bool,
    pub active_feed: Option<FeedId>,
    pub sort_field: SortField,
    pub descending: bool,
}

impl ViewQuery {
    /// True if `article` passes every filter.
    pub fn matches(&self, article: &Article, read: &ReadMarks) -> bool {
        text_filter(article, &self.text)
            && read_filter(article, read, self.show_read)
            && feed_filter(article, self.active_feed.as_ref())
    }

    /// Filter and sort `articles`.
    pub fn project(&self, articles: &[Article], read: &ReadMarks) -> Vec<Article> {
        let mut visible: Vec<Article> = articles
            .iter()
            .filter(|a| self.matches(a, read))
            .cloned()
            .collect();
        visible.sort_by(|a, b| compare(a, b, self.sort_field, self.descending));
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn article(feed: &str, id: &str, date: i64) -> Article {
        Article {
            id: id.to_string(),
            feed_id: FeedId::from(feed),
            title: format!("Title {}", id),
            summary: "A short Summary".to_string(),
            description: String::new(),
            link: format!("http://ex.com/{}", id),
            published_at: date,
        }
    }

    #[test]
    fn test_text_filter() {
        let a = article("tech", "1", 1000);
        assert!(text_filter(&a, ""));
        assert!(text_filter(&a, "summary"));
        assert!(text_filter(&a, "TITLE 1"));
        assert!(text_filter(&a, "TECH"));
        assert!(!text_filter(&a, "sports"));
    }

    #[test]
    fn test_read_filter() {
        let a = article("tech", "1", 0);
        let mut read: ReadMarks = BTreeMap::new();
        assert!(read_filter(&a, &read, false));

        read.entry(FeedId::from("tech")).or_default();
        assert!(read_filter(&a, &read, false));

        read.entry(FeedId::from("tech")).or_default().insert("1".to_string(), 5);
        assert!(!read_filter(&a, &read, false));
        assert!(read_filter(&a, &read, true));
    }

    #[test]
    fn test_feed_filter() {
        let a = article("tech", "1", 0);
        assert!(feed_filter(&a, None));
        assert!(feed_filter(&a, Some(&FeedId::from("tech"))));
        assert!(!feed_filter(&a, Some(&FeedId::from("news"))));
    }

    #[test]
    fn test_sort_with_tie_break() {
        let articles = vec![
            article("b", "2", 10),
            article("a", "9", 10),
            article("a", "1", 30),
            article("c", "1", 20),
        ];

        let query = ViewQuery::default();
        let ids: Vec<_> = query
            .project(&articles, &BTreeMap::new())
            .into_iter()
            .map(|a| format!("{}/{}", a.feed_id, a.id))
            .collect();
        assert_eq!(ids, vec!["a/9", "b/2", "c/1", "a/1"]);

        let query = ViewQuery {
            descending: true,
            ..Default::default()
        };
        let ids: Vec<_> = query
            .project(&articles, &BTreeMap::new())
            .into_iter()
            .map(|a| format!("{}/{}", a.feed_id, a.id))
            .collect();
        assert_eq!(ids, vec!["a/1", "c/1", "a/9", "b/2"]);
    }

    #[test]
    fn test_visible_count() {
        let mut counts = Counts::new();
        counts.insert(FeedId::from("a"), 3);
        counts.insert(FeedId::from("b"), 4);

        assert_eq!(visible_count(&counts, None), 7);
        assert_eq!(visible_count(&counts, Some(&FeedId::from("a"))), 3);
        assert_eq!(visible_count(&counts, Some(&FeedId::from("z"))), 0);
    }

    #[test]
    fn test_no_visible_articles() {
        assert!(no_visible_articles(false, false, 0));
        assert!(!no_visible_articles(true, false, 0));
        assert!(!no_visible_articles(false, true, 0));
        assert!(!no_visible_articles(false, false, 2));
    }

    #[test]
    fn test_query_combines_filters() {
        let articles = vec![article("a", "1", 1), article("b", "2", 2), article("a", "3", 3)];
        let mut read: ReadMarks = BTreeMap::new();
        read.entry(FeedId::from("a")).or_default().insert("3".to_string(), 1);

        let query = ViewQuery {
            active_feed: Some(FeedId::from("a")),
            ..Default::default()
        };
        let shown = query.project(&articles, &read);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, "1");
    }
}
