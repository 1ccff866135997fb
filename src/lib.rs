pub mod app;
pub mod cli;
pub mod config;
pub mod draft;
pub mod editor;
pub mod error;
pub mod model;
pub mod posts;
pub mod render;
pub mod search;
pub mod storage;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use draft::{Draft, DraftSession};
pub use error::{BlogError, BlogResult, StoreError, ValidationError};
pub use model::{Category, CategorySet, Post};
pub use posts::PostCollection;
pub use search::{filter_posts, strip_html, PostFilter};
pub use storage::{KeyValueStore, MemoryStore, StorageHandle};
