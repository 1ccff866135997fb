use std::io::{BufRead, Write};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::AppConfig;
use crate::draft::{AutoSaveEvent, AutoSaveStatus, Draft, DraftSession};
use crate::editor::{EditorBinding, HtmlBuffer, RichTextSurface, UploadEvent};
use crate::error::BlogError;
use crate::posts::PostCollection;
use crate::storage::KeyValueStore;

mod actions;

pub use actions::{parse_line, ComposeCommand, ParseError, HELP};

pub struct ComposeSession<S: KeyValueStore + Clone, W: Write> {
    draft: DraftSession<S>,
    posts: PostCollection<S>,
    editor: EditorBinding<HtmlBuffer>,
    out: W,
    tick_rate: Duration,
    should_quit: bool,
}

impl<S: KeyValueStore + Clone, W: Write> ComposeSession<S, W> {
    pub fn open(store: S, config: &AppConfig, out: W) -> Result<Self> {
        let draft = DraftSession::open(store.clone(), &config.auto_save)
            .context("loading draft")?;
        let posts = PostCollection::load(store).context("loading posts")?;
        let editor = EditorBinding::new(
            HtmlBuffer::new(draft.draft().content()),
            config.editor.clone(),
        );
        Ok(Self {
            draft,
            posts,
            editor,
            out,
            tick_rate: Duration::from_millis(100),
            should_quit: false,
        })
    }

    pub fn draft(&self) -> &DraftSession<S> {
        &self.draft
    }

    pub fn posts(&self) -> &PostCollection<S> {
        &self.posts
    }

    pub fn editor(&self) -> &EditorBinding<HtmlBuffer> {
        &self.editor
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn run<R>(mut self, input: R) -> Result<Draft>
    where
        R: BufRead + Send + 'static,
    {
        let lines = spawn_reader(input);
        let content = self.draft.draft().content().len();
        writeln!(
            self.out,
            "composing ({} posts, draft {} bytes); :help for commands",
            self.posts.len(),
            content
        )?;
        let mut last_tick = Instant::now();
        while !self.should_quit {
            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);
            match lines.recv_timeout(timeout) {
                Ok(line) => self.handle_line(&line, Instant::now())?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.should_quit = true,
            }
            if last_tick.elapsed() >= self.tick_rate {
                self.tick(Instant::now())?;
                last_tick = Instant::now();
            }
        }
        Ok(self.close())
    }

    pub fn handle_line(&mut self, line: &str, now: Instant) -> Result<()> {
        match parse_line(line) {
            Ok(command) => self.handle_command(command, now),
            Err(err) => {
                writeln!(self.out, "error: {err}")?;
                Ok(())
            }
        }
    }

    pub fn handle_command(&mut self, command: ComposeCommand, now: Instant) -> Result<()> {
        match command {
            ComposeCommand::Append(text) => {
                if text.trim().is_empty() {
                    return Ok(());
                }
                self.editor.surface_mut().append_paragraph(&text);
                self.editor.sync_draft(&mut self.draft, now);
            }
            ComposeCommand::ToggleCategory(category) => {
                let selected = self.draft.toggle_category_at(category, now);
                let verb = if selected { "added" } else { "removed" };
                writeln!(self.out, "category {category} {verb}")?;
            }
            ComposeCommand::InsertImage(path) => {
                match self.editor.begin_image_from_path(&path, now) {
                    Ok(()) => writeln!(self.out, "uploading {}", path.display())?,
                    Err(err) => self.report(&err)?,
                }
            }
            ComposeCommand::InsertLink { url, text } => match self.editor.insert_link(&url, &text) {
                Ok(link) => {
                    self.editor.sync_draft(&mut self.draft, now);
                    writeln!(self.out, "linked {} -> {}", link.text, link.url)?;
                }
                Err(err) => self.report(&BlogError::from(err))?,
            },
            ComposeCommand::WriteDraft => {
                let event = self.draft.flush_now();
                self.announce(event)?;
            }
            ComposeCommand::Save { title } => match self.draft.publish(&mut self.posts, &title) {
                Ok(post) => {
                    self.editor.cancel_uploads();
                    self.editor.surface_mut().replace("");
                    writeln!(
                        self.out,
                        "saved post '{}' ({} total)",
                        post.title,
                        self.posts.len()
                    )?;
                }
                Err(err) => self.report(&err)?,
            },
            ComposeCommand::Show => {
                let categories: Vec<&str> = self
                    .draft
                    .draft()
                    .categories()
                    .iter()
                    .map(|category| category.as_ref())
                    .collect();
                writeln!(self.out, "{}", self.editor.surface().html())?;
                writeln!(self.out, "categories: {}", categories.join(", "))?;
            }
            ComposeCommand::Status => {
                writeln!(self.out, "{}", describe_status(&self.draft.status()))?;
                if let Some(progress) = self.editor.upload_progress() {
                    writeln!(self.out, "image upload {progress}%")?;
                }
            }
            ComposeCommand::Help => write!(self.out, "{HELP}")?,
            ComposeCommand::Quit => self.should_quit = true,
        }
        Ok(())
    }

    pub fn tick(&mut self, now: Instant) -> Result<()> {
        for event in self.editor.poll_at(now) {
            match event {
                UploadEvent::Progress(progress) => {
                    writeln!(self.out, "image upload {progress}%")?;
                }
                UploadEvent::Inserted { index, .. } => {
                    self.editor.sync_draft(&mut self.draft, now);
                    writeln!(self.out, "image inserted at {index}")?;
                }
                UploadEvent::Hidden => {}
            }
        }
        if let Some(event) = self.draft.poll_at(now) {
            self.announce(event)?;
        }
        self.out.flush().context("flushing output")?;
        Ok(())
    }

    pub fn close(mut self) -> Draft {
        self.editor.cancel_uploads();
        self.draft.close()
    }

    fn announce(&mut self, event: AutoSaveEvent) -> Result<()> {
        match event {
            AutoSaveEvent::Saved { timestamp } => {
                writeln!(self.out, "draft saved at {}", format_time(timestamp))?;
            }
            AutoSaveEvent::Error { message } => {
                writeln!(self.out, "autosave failed: {message}")?;
            }
        }
        Ok(())
    }

    fn report(&mut self, err: &BlogError) -> Result<()> {
        writeln!(self.out, "error: {err}")?;
        if let Some(hint) = err.user_hint() {
            writeln!(self.out, "hint: {hint}")?;
        }
        Ok(())
    }
}

fn spawn_reader<R>(input: R) -> Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in input.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "stopped reading input");
                    break;
                }
            }
        }
    });
    rx
}

pub fn format_time(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}

pub fn describe_status(status: &AutoSaveStatus) -> String {
    match status {
        AutoSaveStatus::Disabled => "autosave disabled".to_string(),
        AutoSaveStatus::Idle {
            last_saved_at: None,
        } => "no unsaved changes".to_string(),
        AutoSaveStatus::Idle {
            last_saved_at: Some(at),
        } => format!("saved at {}", format_time(*at)),
        AutoSaveStatus::Pending { since } => {
            format!("unsaved changes since {}", format_time(*since))
        }
        AutoSaveStatus::Error {
            message,
            occurred_at,
        } => format!("autosave failed at {}: {message}", format_time(*occurred_at)),
    }
}
