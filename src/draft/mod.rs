use std::str::FromStr;
use std::time::Instant;

use time::OffsetDateTime;

use crate::config::AutoSaveConfig;
use crate::error::{BlogResult, StoreError};
use crate::model::{toggle_category, Category, CategorySet, Post};
use crate::posts::PostCollection;
use crate::storage::{KeyValueStore, DRAFT_CATEGORIES_KEY, DRAFT_CONTENT_KEY};

mod autosave;

pub use autosave::{AutoSaveEvent, AutoSaveStatus, AutoSaveTimer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    content: String,
    categories: CategorySet,
}

impl Draft {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.categories.is_empty()
    }

    pub fn set_content(&mut self, html: &str) -> bool {
        if self.content == html {
            return false;
        }
        self.content.clear();
        self.content.push_str(html);
        true
    }

    pub fn toggle_category(&mut self, category: Category) -> bool {
        toggle_category(&mut self.categories, category)
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.categories.clear();
    }
}

pub fn load_draft<S: KeyValueStore>(store: &S) -> Result<Draft, StoreError> {
    let mut draft = Draft::default();
    if let Some(content) = store.get(DRAFT_CONTENT_KEY)? {
        if !content.is_empty() {
            draft.content = content;
        }
    }
    if let Some(raw) = store.get(DRAFT_CATEGORIES_KEY)? {
        draft.categories = decode_categories(&raw);
    }
    Ok(draft)
}

fn decode_categories(raw: &str) -> CategorySet {
    let values: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(err) => {
            tracing::warn!(?err, "ignoring malformed draft categories");
            return CategorySet::new();
        }
    };
    let mut categories = CategorySet::new();
    for value in values {
        match value.as_str().map(Category::from_str) {
            Some(Ok(category)) => {
                categories.insert(category);
            }
            _ => tracing::warn!(%value, "dropping unknown draft category"),
        }
    }
    categories
}

pub fn save_draft<S: KeyValueStore>(store: &S, draft: &Draft) -> Result<(), StoreError> {
    store.set(DRAFT_CONTENT_KEY, &draft.content)?;
    let names: Vec<&str> = draft.categories.iter().map(|c| c.as_ref()).collect();
    let encoded = serde_json::to_string(&names)
        .map_err(|err| StoreError::Backend(format!("encoding draft categories: {err}")))?;
    store.set(DRAFT_CATEGORIES_KEY, &encoded)
}

pub fn clear_draft<S: KeyValueStore>(store: &S) -> Result<(), StoreError> {
    store.remove(DRAFT_CONTENT_KEY)?;
    store.remove(DRAFT_CATEGORIES_KEY)
}

pub struct DraftSession<S: KeyValueStore> {
    store: S,
    draft: Draft,
    timer: AutoSaveTimer,
}

impl<S: KeyValueStore> DraftSession<S> {
    pub fn open(store: S, config: &AutoSaveConfig) -> Result<Self, StoreError> {
        let draft = load_draft(&store)?;
        Ok(Self {
            store,
            draft,
            timer: AutoSaveTimer::new(config),
        })
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn status(&self) -> AutoSaveStatus {
        self.timer.status()
    }

    pub fn has_pending_save(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn set_content(&mut self, html: &str) -> bool {
        self.set_content_at(html, Instant::now())
    }

    pub fn set_content_at(&mut self, html: &str, now: Instant) -> bool {
        let changed = self.draft.set_content(html);
        if changed {
            self.timer.schedule(now);
        }
        changed
    }

    pub fn toggle_category(&mut self, category: Category) -> bool {
        self.toggle_category_at(category, Instant::now())
    }

    pub fn toggle_category_at(&mut self, category: Category, now: Instant) -> bool {
        let selected = self.draft.toggle_category(category);
        self.timer.schedule(now);
        selected
    }

    pub fn poll(&mut self) -> Option<AutoSaveEvent> {
        self.poll_at(Instant::now())
    }

    /// Writes the draft if the debounce window has elapsed. An empty draft
    /// is never written.
    pub fn poll_at(&mut self, now: Instant) -> Option<AutoSaveEvent> {
        if !self.timer.is_due(now) {
            return None;
        }
        self.timer.cancel();
        if self.draft.is_empty() {
            return None;
        }
        Some(self.write())
    }

    pub fn flush_now(&mut self) -> AutoSaveEvent {
        self.timer.cancel();
        self.write()
    }

    pub fn publish<P: KeyValueStore>(
        &mut self,
        posts: &mut PostCollection<P>,
        title: &str,
    ) -> BlogResult<Post> {
        let post = posts
            .save(
                title,
                &self.draft.content,
                self.draft.categories.iter().copied(),
            )?
            .clone();
        self.reset();
        Ok(post)
    }

    pub fn reset(&mut self) {
        self.timer.cancel();
        self.draft.clear();
    }

    pub fn close(mut self) -> Draft {
        self.timer.cancel();
        self.draft
    }

    fn write(&mut self) -> AutoSaveEvent {
        let timestamp = OffsetDateTime::now_utc();
        match save_draft(&self.store, &self.draft) {
            Ok(()) => {
                tracing::debug!(
                    len = self.draft.content.len(),
                    categories = self.draft.categories.len(),
                    "draft auto-saved"
                );
                self.timer.record_saved(timestamp)
            }
            Err(err) => {
                tracing::warn!(%err, "failed to auto-save draft");
                self.timer.record_failure(err.to_string(), timestamp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, ALL_POSTS_KEY};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn config() -> AutoSaveConfig {
        AutoSaveConfig {
            enabled: true,
            debounce_ms: 30_000,
        }
    }

    #[test]
    fn load_leaves_defaults_when_keys_absent() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let draft = load_draft(&store)?;
        assert_eq!(draft, Draft::default());
        Ok(())
    }

    #[test]
    fn load_restores_saved_draft() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set(DRAFT_CONTENT_KEY, "<p>hello</p>")?;
        store.set(DRAFT_CATEGORIES_KEY, r#"["Food","Travel"]"#)?;
        let draft = load_draft(&store)?;
        assert_eq!(draft.content(), "<p>hello</p>");
        assert_eq!(
            draft.categories().iter().copied().collect::<Vec<_>>(),
            vec![Category::Food, Category::Travel]
        );
        Ok(())
    }

    #[test]
    fn malformed_or_unknown_categories_are_dropped() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set(DRAFT_CONTENT_KEY, "<p>kept</p>")?;
        store.set(DRAFT_CATEGORIES_KEY, "{not json")?;
        let draft = load_draft(&store)?;
        assert_eq!(draft.content(), "<p>kept</p>");
        assert!(draft.categories().is_empty());

        store.set(DRAFT_CATEGORIES_KEY, r#"["Travel", 7, "Gardening", "Travel"]"#)?;
        let draft = load_draft(&store)?;
        assert_eq!(draft.categories().len(), 1);
        assert!(draft.categories().contains(&Category::Travel));
        Ok(())
    }

    #[test]
    fn autosave_writes_latest_values_after_idle_window() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut session = DraftSession::open(store.clone(), &config())?;
        let start = Instant::now();
        session.set_content_at("<p>a</p>", start);
        session.toggle_category_at(Category::Travel, start + Duration::from_secs(1));
        session.set_content_at("<p>ab</p>", start + Duration::from_secs(2));

        assert!(session.poll_at(start + Duration::from_secs(31)).is_none());
        let event = session.poll_at(start + Duration::from_secs(32));
        assert_matches!(event, Some(AutoSaveEvent::Saved { .. }));
        assert_eq!(store.get(DRAFT_CONTENT_KEY)?.as_deref(), Some("<p>ab</p>"));
        assert_eq!(
            store.get(DRAFT_CATEGORIES_KEY)?.as_deref(),
            Some(r#"["Travel"]"#)
        );
        assert_matches!(session.status(), AutoSaveStatus::Idle { last_saved_at: Some(_) });
        Ok(())
    }

    #[test]
    fn change_inside_window_restarts_countdown() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut session = DraftSession::open(store.clone(), &config())?;
        let start = Instant::now();
        session.set_content_at("<p>first</p>", start);
        session.set_content_at("<p>second</p>", start + Duration::from_secs(29));

        assert!(session.poll_at(start + Duration::from_secs(30)).is_none());
        assert_eq!(store.get(DRAFT_CONTENT_KEY)?, None);

        assert!(session.poll_at(start + Duration::from_secs(59)).is_some());
        assert_eq!(
            store.get(DRAFT_CONTENT_KEY)?.as_deref(),
            Some("<p>second</p>")
        );
        Ok(())
    }

    #[test]
    fn empty_draft_is_not_written() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut session = DraftSession::open(store.clone(), &config())?;
        let start = Instant::now();
        session.toggle_category_at(Category::Food, start);
        session.toggle_category_at(Category::Food, start);
        assert!(session.poll_at(start + Duration::from_secs(60)).is_none());
        assert!(store.keys().is_empty());
        assert!(!session.has_pending_save());
        Ok(())
    }

    #[test]
    fn unchanged_content_does_not_reschedule() -> anyhow::Result<()> {
        let mut session = DraftSession::open(MemoryStore::new(), &config())?;
        assert!(!session.set_content_at("", Instant::now()));
        assert!(!session.has_pending_save());
        Ok(())
    }

    #[test]
    fn autosave_failure_degrades_without_blocking_edits() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set_read_only(true);
        let mut session = DraftSession::open(store.clone(), &config())?;
        let start = Instant::now();
        session.set_content_at("<p>x</p>", start);
        let event = session.poll_at(start + Duration::from_secs(30));
        assert_matches!(event, Some(AutoSaveEvent::Error { .. }));
        assert_matches!(session.status(), AutoSaveStatus::Error { .. });

        assert!(session.set_content_at("<p>xy</p>", start + Duration::from_secs(31)));
        assert_eq!(session.draft().content(), "<p>xy</p>");
        store.set_read_only(false);
        assert_matches!(
            session.poll_at(start + Duration::from_secs(61)),
            Some(AutoSaveEvent::Saved { .. })
        );
        Ok(())
    }

    #[test]
    fn closing_session_discards_pending_write() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut session = DraftSession::open(store.clone(), &config())?;
        session.set_content_at("<p>unsaved</p>", Instant::now());
        let draft = session.close();
        assert_eq!(draft.content(), "<p>unsaved</p>");
        assert!(store.keys().is_empty());
        Ok(())
    }

    #[test]
    fn publish_clears_draft_and_cancels_autosave() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut session = DraftSession::open(store.clone(), &config())?;
        let start = Instant::now();
        session.set_content_at("<p>x</p>", start);
        session.toggle_category_at(Category::Travel, start);
        session.flush_now();
        assert!(store.get(DRAFT_CONTENT_KEY)?.is_some());

        session.set_content_at("<p>x!</p>", start + Duration::from_secs(1));
        let mut posts = PostCollection::load(store.clone())?;
        let post = session.publish(&mut posts, "My Post")?;
        assert_eq!(post.content, "<p>x!</p>");
        assert_eq!(post.categories, vec![Category::Travel]);

        assert_eq!(store.get(DRAFT_CONTENT_KEY)?, None);
        assert_eq!(store.get(DRAFT_CATEGORIES_KEY)?, None);
        assert!(session.draft().is_empty());
        assert!(session.poll_at(start + Duration::from_secs(120)).is_none());
        assert_eq!(store.keys(), vec![ALL_POSTS_KEY.to_string()]);
        Ok(())
    }

    #[test]
    fn failed_publish_keeps_draft() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut session = DraftSession::open(store.clone(), &config())?;
        session.set_content_at("<p>keep</p>", Instant::now());
        let mut posts = PostCollection::load(store.clone())?;
        assert!(session.publish(&mut posts, "   ").is_err());
        assert_eq!(session.draft().content(), "<p>keep</p>");
        assert!(session.has_pending_save());
        Ok(())
    }
}
