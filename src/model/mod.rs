use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, VecSkipError};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Category {
    Technology,
    Fitness,
    Travel,
    Education,
    Food,
    Lifestyle,
}

impl Category {
    pub fn all() -> impl Iterator<Item = Category> {
        Category::iter()
    }
}

pub type CategorySet = IndexSet<Category>;

pub fn toggle_category(set: &mut CategorySet, category: Category) -> bool {
    if set.shift_remove(&category) {
        false
    } else {
        set.insert(category);
        true
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

impl Post {
    pub fn new<I>(title: &str, content: &str, categories: I) -> Self
    where
        I: IntoIterator<Item = Category>,
    {
        let categories: CategorySet = categories.into_iter().collect();
        Self {
            id: Uuid::new_v4(),
            title: title.trim().to_owned(),
            content: content.to_owned(),
            categories: categories.into_iter().collect(),
            date: OffsetDateTime::now_utc(),
        }
    }
}
