use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use crate::app::format_time;
use crate::config::AppConfig;
use crate::draft::{clear_draft, AutoSaveEvent, DraftSession};
use crate::editor::{EditorBinding, HtmlBuffer, RichTextSurface, UploadEvent};
use crate::error::BlogError;
use crate::model::{Category, CategorySet, Post};
use crate::posts::PostCollection;
use crate::render::{preview_text, render_content, RenderMode};
use crate::search::PostFilter;
use crate::storage::{KeyValueStore, StorageHandle};

#[derive(Args, Debug, Clone)]
pub struct DraftArgs {
    #[command(subcommand)]
    pub command: DraftCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DraftCommand {
    /// Print the draft content and categories
    Show,
    /// Replace the draft content. If omitted, reads from stdin.
    Set {
        #[arg()]
        content: Option<String>,
    },
    /// Select or deselect a category
    Toggle {
        #[arg()]
        category: Category,
    },
    /// Append an image to the draft
    Image {
        #[arg()]
        path: PathBuf,
    },
    /// Append a link to the draft
    Link {
        #[arg()]
        url: String,
        /// Link text (defaults to the URL)
        #[arg()]
        text: Option<String>,
    },
    /// Discard the draft
    Clear,
}

#[derive(Args, Debug, Clone)]
pub struct PostArgs {
    #[command(subcommand)]
    pub command: PostCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PostCommand {
    /// Save a post. Publishes the draft unless --content is given.
    Save(SaveArgs),
    /// List posts, optionally filtered
    List(ListArgs),
    /// Print one post
    Show {
        /// Position as shown by `post list`
        #[arg()]
        index: usize,
        /// Escape the stored HTML instead of printing it verbatim
        #[arg(long)]
        escaped: bool,
    },
    /// Delete a post by position
    Delete {
        #[arg()]
        index: usize,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Post title (prompted if omitted)
    #[arg()]
    pub title: Option<String>,
    /// Post HTML to save instead of the draft
    #[arg(long)]
    pub content: Option<String>,
    /// Category to attach (repeatable, only with --content)
    #[arg(long = "category", short = 'c')]
    pub categories: Vec<Category>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Case-insensitive text to find in titles or content
    #[arg(long, short = 's')]
    pub search: Option<String>,
    /// Only posts in any of these categories (repeatable)
    #[arg(long = "category", short = 'c')]
    pub categories: Vec<Category>,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StoreCommand {
    /// Print quota usage and stored keys
    Stats,
}

pub fn handle_draft_command(config: &AppConfig, storage: StorageHandle, args: DraftArgs) -> Result<()> {
    let mut out = io::stdout().lock();
    run_draft_command(config, storage, args.command, &mut out)
}

pub fn handle_post_command(config: &AppConfig, storage: StorageHandle, args: PostArgs) -> Result<()> {
    let mut out = io::stdout().lock();
    match args.command {
        PostCommand::Save(args) => post_save(config, storage, args, &mut out),
        PostCommand::List(args) => post_list(config, storage, &args, &mut out),
        PostCommand::Show { index, escaped } => {
            let mode = if escaped {
                RenderMode::Escaped
            } else {
                config.listing.render_mode
            };
            post_show(storage, index, mode, &mut out)
        }
        PostCommand::Delete { index, yes } => post_delete(storage, index, yes, &mut out),
    }
}

pub fn handle_store_command(storage: &StorageHandle, args: StoreArgs) -> Result<()> {
    match args.command {
        StoreCommand::Stats => {
            print!("{}", store_stats(storage)?);
            Ok(())
        }
    }
}

fn run_draft_command<S, W>(config: &AppConfig, store: S, command: DraftCommand, out: &mut W) -> Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    if let DraftCommand::Clear = command {
        clear_draft(&store).map_err(BlogError::from).context("clearing draft")?;
        writeln!(out, "Draft cleared")?;
        return Ok(());
    }

    let mut session = DraftSession::open(store, &config.auto_save).context("loading draft")?;
    match command {
        DraftCommand::Show => {
            let draft = session.draft();
            if draft.is_empty() {
                writeln!(out, "(empty draft)")?;
            } else {
                writeln!(out, "{}", draft.content())?;
                writeln!(out, "categories: {}", format_categories(draft.categories().iter()))?;
            }
            return Ok(());
        }
        DraftCommand::Set { content } => {
            let content = match content {
                Some(content) => content,
                None => match read_stdin()? {
                    Some(content) => content,
                    None => bail!("pass the content as an argument or pipe it on stdin"),
                },
            };
            session.set_content(&content);
        }
        DraftCommand::Toggle { category } => {
            let selected = session.toggle_category(category);
            let verb = if selected { "Selected" } else { "Deselected" };
            writeln!(out, "{verb} {category}")?;
        }
        DraftCommand::Image { path } => {
            let mut editor = EditorBinding::new(
                HtmlBuffer::new(session.draft().content()),
                config.editor.clone(),
            );
            editor
                .begin_image_from_path(&path, std::time::Instant::now())
                .with_context(|| format!("inserting image {}", path.display()))?;
            let interval = editor.options().progress_interval();
            while editor.is_uploading() {
                thread::sleep(interval);
                for event in editor.poll() {
                    if let UploadEvent::Progress(progress) = event {
                        eprint!("\rUploading {progress:>3}%");
                    }
                }
            }
            eprintln!();
            session.set_content(&editor.surface().html());
        }
        DraftCommand::Link { url, text } => {
            let mut editor = EditorBinding::new(
                HtmlBuffer::new(session.draft().content()),
                config.editor.clone(),
            );
            let link = editor
                .insert_link(&url, text.as_deref().unwrap_or(""))
                .map_err(BlogError::from)
                .context("inserting link")?;
            session.set_content(&editor.surface().html());
            writeln!(out, "Linked {} -> {}", link.text, link.url)?;
        }
        DraftCommand::Clear => {}
    }

    // The process exits long before the autosave window, so write now.
    match session.flush_now() {
        AutoSaveEvent::Saved { timestamp } => {
            writeln!(out, "Draft saved at {}", format_time(timestamp))?;
            Ok(())
        }
        AutoSaveEvent::Error { message } => bail!("saving draft: {message}"),
    }
}

fn post_save<S, W>(config: &AppConfig, store: S, args: SaveArgs, out: &mut W) -> Result<()>
where
    S: KeyValueStore + Clone,
    W: Write,
{
    let title = match args.title {
        Some(title) => title,
        None => prompt("Title")?,
    };
    let mut posts = PostCollection::load(store.clone()).context("loading posts")?;
    let result = match args.content {
        Some(content) => posts
            .save(&title, &content, args.categories.iter().copied())
            .map(Post::clone),
        None => {
            let mut session =
                DraftSession::open(store, &config.auto_save).context("loading draft")?;
            session.publish(&mut posts, &title)
        }
    };
    let post = result.map_err(with_hint).context("saving post")?;
    writeln!(
        out,
        "Saved post #{} '{}' ({} categories)",
        posts.len() - 1,
        post.title,
        post.categories.len()
    )?;
    Ok(())
}

fn post_list<S, W>(config: &AppConfig, store: S, args: &ListArgs, out: &mut W) -> Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let posts = PostCollection::load(store).context("loading posts")?;
    let selected: CategorySet = args.categories.iter().copied().collect();
    let filter = PostFilter::new(args.search.as_deref().unwrap_or(""), selected);
    if posts.is_empty() {
        writeln!(out, "No posts yet.")?;
        return Ok(());
    }
    let listing = format_post_list(filter.matching(posts.posts()), config.listing.preview_chars);
    if listing.is_empty() {
        writeln!(out, "No matching posts.")?;
    } else {
        write!(out, "{listing}")?;
    }
    Ok(())
}

fn post_show<S, W>(store: S, index: usize, mode: RenderMode, out: &mut W) -> Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let posts = PostCollection::load(store).context("loading posts")?;
    let Some(post) = posts.get(index) else {
        return Err(BlogError::IndexOutOfRange {
            index,
            len: posts.len(),
        }
        .into());
    };
    writeln!(out, "{}", post.title)?;
    writeln!(out, "id:         {}", post.id)?;
    writeln!(out, "date:       {}", format_time(post.date))?;
    writeln!(out, "categories: {}", format_categories(post.categories.iter()))?;
    writeln!(out)?;
    writeln!(out, "{}", render_content(&post.content, mode))?;
    Ok(())
}

fn post_delete<S, W>(store: S, index: usize, yes: bool, out: &mut W) -> Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let mut posts = PostCollection::load(store).context("loading posts")?;
    let request = posts.request_delete(index)?;
    if !yes {
        if !atty::is(atty::Stream::Stdin) {
            bail!("refusing to delete without confirmation; pass --yes");
        }
        let answer = prompt(&format!("Delete post #{} '{}'? [y/N]", request.index, request.title))?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            writeln!(out, "Kept post #{}", request.index)?;
            return Ok(());
        }
    }
    let removed = posts
        .confirm_delete(request)
        .map_err(with_hint)
        .context("deleting post")?;
    writeln!(
        out,
        "Deleted post '{}' ({} remaining)",
        removed.title,
        posts.len()
    )?;
    Ok(())
}

fn store_stats(storage: &StorageHandle) -> Result<String> {
    let usage = storage.usage().context("measuring store usage")?;
    let keys = storage.keys()?;
    let mut out = String::new();
    let percent = if usage.quota == 0 {
        0.0
    } else {
        usage.used as f64 * 100.0 / usage.quota as f64
    };
    let _ = writeln!(&mut out, "database   {}", storage.database_path().display());
    let _ = writeln!(
        &mut out,
        "used       {} of {} units ({percent:.1}%)",
        usage.used, usage.quota
    );
    let _ = writeln!(&mut out, "available  {} units", usage.available());
    let _ = writeln!(&mut out, "entries    {}", usage.entries);
    for key in keys {
        let _ = writeln!(&mut out, "  - {key}");
    }
    Ok(out)
}

fn format_post_list<'a, I>(posts: I, preview_chars: usize) -> String
where
    I: IntoIterator<Item = (usize, &'a Post)>,
{
    let mut out = String::new();
    for (index, post) in posts {
        let _ = writeln!(&mut out, "#{index}  {}  {}", post.title, format_time(post.date));
        if !post.categories.is_empty() {
            let _ = writeln!(
                &mut out,
                "    categories  {}",
                format_categories(post.categories.iter())
            );
        }
        let preview = preview_text(&post.content, preview_chars);
        if !preview.is_empty() {
            let _ = writeln!(&mut out, "    {preview}");
        }
        out.push('\n');
    }
    out
}

fn format_categories<'a>(categories: impl Iterator<Item = &'a Category>) -> String {
    let names: Vec<&str> = categories.map(|category| category.as_ref()).collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

/// Folds the storage guidance into the error chain so it reaches the user.
fn with_hint(err: BlogError) -> anyhow::Error {
    match err.user_hint() {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => err.into(),
    }
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::storage::{self, MemoryStore, ALL_POSTS_KEY, DRAFT_CATEGORIES_KEY, DRAFT_CONTENT_KEY};
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;
    use time::macros::datetime;

    type TestResult<T = ()> = Result<T>;

    fn post_at(title: &str, content: &str, categories: &[Category], date: time::OffsetDateTime) -> Post {
        let mut post = Post::new(title, content, categories.iter().copied());
        post.date = date;
        post
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn listing_formats_titles_categories_and_previews() {
        let posts = vec![
            post_at(
                "Alpha",
                "<p>gym   day</p>\n<p>legs</p>",
                &[Category::Fitness, Category::Lifestyle],
                datetime!(2024-01-02 03:04:05 UTC),
            ),
            post_at("Beta", "", &[], datetime!(2024-02-03 10:00:00 UTC)),
            post_at(
                "Gamma",
                "<p>A long paragraph about trains</p>",
                &[Category::Travel],
                datetime!(2024-03-04 12:30:00 UTC),
            ),
        ];
        let listing = format_post_list(posts.iter().enumerate(), 12);
        insta::assert_snapshot!(listing.trim_end(), @r###"
        #0  Alpha  2024-01-02T03:04:05Z
            categories  Fitness, Lifestyle
            gym day legs

        #1  Beta  2024-02-03T10:00:00Z

        #2  Gamma  2024-03-04T12:30:00Z
            categories  Travel
            A long parag…
        "###);
    }

    #[test]
    fn filtered_listing_keeps_original_positions() -> TestResult {
        let store = MemoryStore::new();
        let mut posts = PostCollection::load(store.clone())?;
        posts.save("Alpha", "<p>gym</p>", [Category::Fitness])?;
        posts.save("Beta", "<p>trip</p>", [Category::Travel])?;

        let mut out = Vec::new();
        let args = ListArgs {
            search: None,
            categories: vec![Category::Travel],
        };
        post_list(&AppConfig::default(), store.clone(), &args, &mut out)?;
        let listing = output(out);
        assert!(listing.starts_with("#1  Beta"));
        assert!(!listing.contains("Alpha"));

        let mut out = Vec::new();
        let args = ListArgs {
            search: Some("nothing".into()),
            categories: Vec::new(),
        };
        post_list(&AppConfig::default(), store, &args, &mut out)?;
        assert_eq!(output(out), "No matching posts.\n");
        Ok(())
    }

    #[test]
    fn one_shot_draft_edits_are_written_immediately() -> TestResult {
        let store = MemoryStore::new();
        let config = AppConfig::default();
        let mut out = Vec::new();
        run_draft_command(
            &config,
            store.clone(),
            DraftCommand::Set {
                content: Some("<p>hello</p>".into()),
            },
            &mut out,
        )?;
        run_draft_command(
            &config,
            store.clone(),
            DraftCommand::Toggle {
                category: Category::Education,
            },
            &mut out,
        )?;
        run_draft_command(
            &config,
            store.clone(),
            DraftCommand::Link {
                url: "rust-lang.org".into(),
                text: Some("Rust".into()),
            },
            &mut out,
        )?;
        assert_eq!(
            store.get(DRAFT_CONTENT_KEY)?.as_deref(),
            Some("<p>hello</p><a href=\"https://rust-lang.org\" rel=\"noopener noreferrer\" target=\"_blank\">Rust</a>")
        );
        assert_eq!(
            store.get(DRAFT_CATEGORIES_KEY)?.as_deref(),
            Some("[\"Education\"]")
        );
        assert!(output(out).contains("Selected Education"));

        run_draft_command(&config, store.clone(), DraftCommand::Clear, &mut Vec::new())?;
        assert_eq!(store.get(DRAFT_CONTENT_KEY)?, None);
        assert_eq!(store.get(DRAFT_CATEGORIES_KEY)?, None);
        Ok(())
    }

    #[test]
    fn oversized_draft_image_is_rejected() -> TestResult {
        let temp = TempDir::new()?;
        let path = temp.path().join("huge.jpg");
        fs::File::create(&path)?.set_len(3 * 1024 * 1024)?;
        let store = MemoryStore::new();
        let err = run_draft_command(
            &AppConfig::default(),
            store.clone(),
            DraftCommand::Image { path },
            &mut Vec::new(),
        )
        .unwrap_err();
        assert_matches!(
            err.downcast_ref::<BlogError>(),
            Some(BlogError::Validation(_))
        );
        assert_eq!(store.get(DRAFT_CONTENT_KEY)?, None);
        Ok(())
    }

    #[test]
    fn post_save_publishes_the_draft() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        storage.set(DRAFT_CONTENT_KEY, "<p>from draft</p>")?;
        storage.set(DRAFT_CATEGORIES_KEY, "[\"Food\"]")?;

        let mut out = Vec::new();
        post_save(
            &AppConfig::default(),
            storage.clone(),
            SaveArgs {
                title: Some("  Dinner ".into()),
                content: None,
                categories: Vec::new(),
            },
            &mut out,
        )?;
        assert_eq!(output(out), "Saved post #0 'Dinner' (1 categories)\n");
        assert_eq!(storage.get(DRAFT_CONTENT_KEY)?, None);

        let posts = PostCollection::load(storage.clone())?;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts.posts()[0].content, "<p>from draft</p>");
        assert_eq!(posts.posts()[0].categories, vec![Category::Food]);
        Ok(())
    }

    #[test]
    fn post_save_with_blank_title_fails() -> TestResult {
        let store = MemoryStore::new();
        let err = post_save(
            &AppConfig::default(),
            store.clone(),
            SaveArgs {
                title: Some("   ".into()),
                content: Some("<p>x</p>".into()),
                categories: Vec::new(),
            },
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("post title is required"));
        assert_eq!(store.get(ALL_POSTS_KEY)?, None);
        Ok(())
    }

    #[test]
    fn post_delete_with_yes_removes_the_listed_post() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        let mut posts = PostCollection::load(storage.clone())?;
        posts.save("A", "", [])?;
        posts.save("B", "", [])?;
        posts.save("C", "", [])?;

        let mut out = Vec::new();
        post_delete(storage.clone(), 1, true, &mut out)?;
        assert_eq!(output(out), "Deleted post 'B' (2 remaining)\n");

        let titles: Vec<String> = PostCollection::load(storage.clone())?
            .posts()
            .iter()
            .map(|post| post.title.clone())
            .collect();
        assert_eq!(titles, vec!["A", "C"]);

        let err = post_delete(storage, 7, true, &mut Vec::new()).unwrap_err();
        assert_matches!(
            err.downcast_ref::<BlogError>(),
            Some(BlogError::IndexOutOfRange { index: 7, len: 2 })
        );
        Ok(())
    }

    #[test]
    fn post_show_escapes_on_request() -> TestResult {
        let store = MemoryStore::new();
        let mut posts = PostCollection::load(store.clone())?;
        posts.save("Markup", "<b>bold</b>", [])?;

        let mut out = Vec::new();
        post_show(store.clone(), 0, RenderMode::Trusted, &mut out)?;
        assert!(output(out).ends_with("\n<b>bold</b>\n"));

        let mut out = Vec::new();
        post_show(store, 0, RenderMode::Escaped, &mut out)?;
        assert!(output(out).ends_with("\n&lt;b&gt;bold&lt;/b&gt;\n"));
        Ok(())
    }

    #[test]
    fn store_stats_reports_usage_and_keys() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        storage.set("draftContent", "ab")?;
        let stats = store_stats(&storage)?;
        assert!(stats.contains("used       14 of 5242880 units"));
        assert!(stats.contains("entries    1"));
        assert!(stats.contains("  - draftContent"));
        Ok(())
    }

    fn setup_storage() -> TestResult<(TempDir, StorageHandle)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let root = temp.path();
        let paths = ConfigPaths {
            config_dir: root.join("config"),
            config_file: root.join("config/config.toml"),
            data_dir: root.join("data"),
            database_path: root.join("data/blogpad.db"),
        };
        let mut storage_opts = StorageOptions::default();
        storage_opts.database_path = paths.database_path.clone();
        let handle = storage::init(&paths, &storage_opts)?;
        Ok((temp, handle))
    }
}
