use uuid::Uuid;

use crate::draft::clear_draft;
use crate::error::{BlogError, BlogResult, StoreError, ValidationError};
use crate::model::{Category, Post};
use crate::storage::{KeyValueStore, ALL_POSTS_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub index: usize,
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug)]
pub struct PostCollection<S: KeyValueStore> {
    store: S,
    posts: Vec<Post>,
}

impl<S: KeyValueStore> PostCollection<S> {
    pub fn load(store: S) -> BlogResult<Self> {
        let posts = match store.get(ALL_POSTS_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| BlogError::Decode {
                key: ALL_POSTS_KEY,
                source,
            })?,
            None => Vec::new(),
        };
        Ok(Self { store, posts })
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Post> {
        self.posts.get(index)
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.posts.iter().position(|post| post.id == id)
    }

    pub fn find(&self, id: Uuid) -> Option<&Post> {
        self.position(id).and_then(|index| self.posts.get(index))
    }

    /// Appends a post and persists the collection, then clears the draft.
    /// Nothing is appended if the write fails.
    pub fn save<I>(&mut self, title: &str, content: &str, categories: I) -> BlogResult<&Post>
    where
        I: IntoIterator<Item = Category>,
    {
        if title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle.into());
        }
        self.posts.push(Post::new(title, content, categories));
        if let Err(err) = self.persist() {
            self.posts.pop();
            tracing::warn!(%err, "post save failed, rolled back");
            return Err(err.into());
        }
        if let Err(err) = clear_draft(&self.store) {
            tracing::warn!(%err, "post saved but the draft could not be cleared");
        }
        let post = &self.posts[self.posts.len() - 1];
        tracing::info!(id = %post.id, title = %post.title, "post saved");
        Ok(post)
    }

    pub fn request_delete(&self, index: usize) -> BlogResult<PendingDelete> {
        let post = self.posts.get(index).ok_or(BlogError::IndexOutOfRange {
            index,
            len: self.posts.len(),
        })?;
        Ok(PendingDelete {
            index,
            id: post.id,
            title: post.title.clone(),
        })
    }

    pub fn confirm_delete(&mut self, request: PendingDelete) -> BlogResult<Post> {
        self.delete(request.id)
    }

    pub fn delete(&mut self, id: Uuid) -> BlogResult<Post> {
        let index = self.position(id).ok_or(BlogError::PostNotFound(id))?;
        self.delete_at(index)
    }

    pub fn delete_at(&mut self, index: usize) -> BlogResult<Post> {
        if index >= self.posts.len() {
            return Err(BlogError::IndexOutOfRange {
                index,
                len: self.posts.len(),
            });
        }
        let removed = self.posts.remove(index);
        if let Err(err) = self.persist() {
            self.posts.insert(index, removed);
            tracing::warn!(%err, "post delete failed, restored");
            return Err(err.into());
        }
        tracing::info!(id = %removed.id, title = %removed.title, "post deleted");
        Ok(removed)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&self.posts)
            .map_err(|err| StoreError::Backend(format!("encoding posts: {err}")))?;
        self.store.set(ALL_POSTS_KEY, &encoded)
    }
}
