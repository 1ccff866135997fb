use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::model::{toggle_category, Category, CategorySet, Post};

// A trailing unterminated tag is stripped too, hence the optional `>`.
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"<[^>]*>?")
        .case_insensitive(true)
        .build()
        .expect("valid tag pattern")
});

pub fn strip_tags(html: &str) -> Cow<'_, str> {
    TAG_PATTERN.replace_all(html, "")
}

pub fn strip_html(html: &str) -> String {
    strip_tags(html).to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    search: String,
    needle: String,
    categories: CategorySet,
}

impl PostFilter {
    pub fn new(search: &str, categories: CategorySet) -> Self {
        Self {
            search: search.to_owned(),
            needle: search.to_lowercase(),
            categories,
        }
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn toggle_category(&mut self, category: Category) -> bool {
        toggle_category(&mut self.categories, category)
    }

    pub fn is_active(&self) -> bool {
        !self.needle.is_empty() || !self.categories.is_empty()
    }

    pub fn matches_search(&self, post: &Post) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        post.title.to_lowercase().contains(&self.needle)
            || strip_html(&post.content).contains(&self.needle)
    }

    pub fn matches_category(&self, post: &Post) -> bool {
        self.categories.is_empty()
            || post
                .categories
                .iter()
                .any(|category| self.categories.contains(category))
    }

    pub fn matches(&self, post: &Post) -> bool {
        self.matches_search(post) && self.matches_category(post)
    }

    /// Matching posts paired with their position in `posts`, in order.
    pub fn matching<'a>(&'a self, posts: &'a [Post]) -> impl Iterator<Item = (usize, &'a Post)> + 'a {
        posts
            .iter()
            .enumerate()
            .filter(move |(_, post)| self.matches(post))
    }

    pub fn apply(&self, posts: &[Post]) -> Vec<Post> {
        self.matching(posts).map(|(_, post)| post.clone()).collect()
    }
}

pub fn filter_posts(posts: &[Post], search_term: &str, selected: &CategorySet) -> Vec<Post> {
    PostFilter::new(search_term, selected.clone()).apply(posts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, content: &str, categories: &[Category]) -> Post {
        Post::new(title, content, categories.iter().copied())
    }

    fn sample() -> Vec<Post> {
        vec![
            post("Alpha", "<p>gym</p>", &[Category::Fitness]),
            post("Beta", "<p>trip</p>", &[Category::Travel]),
        ]
    }

    fn set(categories: &[Category]) -> CategorySet {
        categories.iter().copied().collect()
    }

    #[test]
    fn strip_html_removes_tags_and_lowercases() {
        assert_eq!(strip_html("<b>Hi</b> there"), "hi there");
        assert_eq!(strip_html("<P CLASS=\"x\">A<br/>B"), "ab");
        assert_eq!(strip_html("text <unclosed"), "text ");
        assert_eq!(strip_tags("<em>Keep</em> Case"), "Keep Case");
    }

    #[test]
    fn empty_filter_returns_everything_in_order() {
        let posts = vec![
            post("C", "", &[]),
            post("A", "<p>x</p>", &[Category::Food]),
            post("B", "", &[Category::Travel]),
        ];
        assert_eq!(filter_posts(&posts, "", &CategorySet::new()), posts);
    }

    #[test]
    fn search_matches_title_or_stripped_content() {
        let posts = sample();
        let hits = filter_posts(&posts, "gym", &CategorySet::new());
        assert_eq!(hits, vec![posts[0].clone()]);

        let by_title = filter_posts(&posts, "BET", &CategorySet::new());
        assert_eq!(by_title, vec![posts[1].clone()]);

        // Markup is not searchable text.
        assert!(filter_posts(&posts, "<p>", &CategorySet::new()).is_empty());
    }

    #[test]
    fn category_selection_requires_intersection() {
        let posts = sample();
        let travel = filter_posts(&posts, "", &set(&[Category::Travel]));
        assert_eq!(travel, vec![posts[1].clone()]);

        let either = filter_posts(&posts, "", &set(&[Category::Travel, Category::Fitness]));
        assert_eq!(either, posts);

        assert!(filter_posts(&posts, "", &set(&[Category::Food])).is_empty());
        assert!(filter_posts(&posts, "gym", &set(&[Category::Travel])).is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let posts = vec![
            post("Gym log", "<p>legs</p>", &[Category::Fitness]),
            post("Trip", "<p>gym in hotel</p>", &[Category::Travel]),
            post("Food", "<p>pasta</p>", &[Category::Food]),
        ];
        let selected = set(&[Category::Fitness, Category::Travel]);
        let once = filter_posts(&posts, "gym", &selected);
        let twice = filter_posts(&once, "gym", &selected);
        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn matching_reports_original_positions() {
        let posts = sample();
        let filter = PostFilter::new("trip", CategorySet::new());
        let positions: Vec<usize> = filter.matching(&posts).map(|(index, _)| index).collect();
        assert_eq!(positions, vec![1]);
        assert!(filter.is_active());
    }
}
