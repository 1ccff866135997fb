use std::path::Path;
use std::time::Instant;

use crate::config::EditorOptions;
use crate::draft::DraftSession;
use crate::error::{BlogResult, ValidationError};
use crate::render::escape_html;
use crate::storage::KeyValueStore;

mod image;
mod link;

pub use image::{
    check_image_size, data_uri, image_mime, read_image, ImageFile, ImageUpload, UploadEvent,
};
pub use link::{link_label, normalize_url, InsertedLink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embed {
    Image { src: String },
}

pub trait RichTextSurface {
    fn selection(&mut self) -> usize;
    fn set_selection(&mut self, index: usize);
    fn insert_embed(&mut self, index: usize, embed: &Embed) -> usize;
    fn insert_text(&mut self, index: usize, text: &str, link: Option<&str>) -> usize;
    fn html(&self) -> String;
}

/// Raw HTML with a cursor counted in characters of markup. Positions that
/// fall inside a tag are pushed past its closing `>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlBuffer {
    html: String,
    cursor: usize,
}

impl HtmlBuffer {
    pub fn new(html: impl Into<String>) -> Self {
        let html = html.into();
        let cursor = html.chars().count();
        Self { html, cursor }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.html.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }

    pub fn replace(&mut self, html: &str) {
        self.html = html.to_owned();
        self.cursor = self.clamp(self.cursor);
    }

    pub fn append_paragraph(&mut self, text: &str) {
        self.html.push_str("<p>");
        self.html.push_str(&escape_html(text));
        self.html.push_str("</p>");
        self.cursor = self.len();
    }

    fn byte_offset(&self, index: usize) -> usize {
        self.html
            .char_indices()
            .nth(index)
            .map(|(offset, _)| offset)
            .unwrap_or(self.html.len())
    }

    fn clamp(&self, index: usize) -> usize {
        let index = index.min(self.len());
        let offset = self.byte_offset(index);
        let before = &self.html[..offset];
        let inside_tag = match before.rfind('<') {
            Some(open) => !before[open..].contains('>'),
            None => false,
        };
        if !inside_tag {
            return index;
        }
        match self.html[offset..].find('>') {
            Some(close) => self.html[..offset + close + 1].chars().count(),
            None => self.len(),
        }
    }

    fn insert_fragment(&mut self, index: usize, fragment: &str) -> usize {
        let index = self.clamp(index);
        let offset = self.byte_offset(index);
        self.html.insert_str(offset, fragment);
        fragment.chars().count()
    }
}

impl RichTextSurface for HtmlBuffer {
    fn selection(&mut self) -> usize {
        self.cursor = self.clamp(self.cursor);
        self.cursor
    }

    fn set_selection(&mut self, index: usize) {
        self.cursor = self.clamp(index);
    }

    fn insert_embed(&mut self, index: usize, embed: &Embed) -> usize {
        let fragment = match embed {
            Embed::Image { src } => format!("<img src=\"{}\">", escape_html(src)),
        };
        self.insert_fragment(index, &fragment)
    }

    fn insert_text(&mut self, index: usize, text: &str, link: Option<&str>) -> usize {
        let fragment = match link {
            Some(url) => format!(
                "<a href=\"{}\" rel=\"noopener noreferrer\" target=\"_blank\">{}</a>",
                escape_html(url),
                escape_html(text)
            ),
            None => escape_html(text),
        };
        self.insert_fragment(index, &fragment)
    }

    fn html(&self) -> String {
        self.html.clone()
    }
}

pub struct EditorBinding<R: RichTextSurface> {
    surface: R,
    options: EditorOptions,
    uploads: Vec<ImageUpload>,
}

impl<R: RichTextSurface> EditorBinding<R> {
    pub fn new(surface: R, options: EditorOptions) -> Self {
        Self {
            surface,
            options,
            uploads: Vec::new(),
        }
    }

    pub fn surface(&self) -> &R {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut R {
        &mut self.surface
    }

    pub fn options(&self) -> &EditorOptions {
        &self.options
    }

    pub fn upload_progress(&self) -> Option<u8> {
        self.uploads.last().map(ImageUpload::progress)
    }

    pub fn is_uploading(&self) -> bool {
        !self.uploads.is_empty()
    }

    pub fn begin_image_from_path(&mut self, path: &Path, now: Instant) -> BlogResult<()> {
        let file = read_image(path, self.options.max_image_bytes)?;
        self.begin_image(file, now)?;
        Ok(())
    }

    pub fn begin_image(&mut self, file: ImageFile, now: Instant) -> Result<(), ValidationError> {
        check_image_size(file.bytes.len() as u64, self.options.max_image_bytes)?;
        let src = file.data_uri();
        let index = self.surface.selection();
        tracing::debug!(name = %file.name, bytes = file.bytes.len(), index, "image upload started");
        self.uploads
            .push(ImageUpload::start(src, index, &self.options, now));
        Ok(())
    }

    pub fn insert_link(&mut self, url: &str, text: &str) -> Result<InsertedLink, ValidationError> {
        let url = normalize_url(url)?;
        let text = link_label(text, &url).to_owned();
        let index = self.surface.selection();
        let len = self.surface.insert_text(index, &text, Some(&url));
        self.surface.set_selection(index + len);
        Ok(InsertedLink { index, text, url })
    }

    pub fn poll(&mut self) -> Vec<UploadEvent> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        for upload in &mut self.uploads {
            events.extend(upload.poll_at(&mut self.surface, now));
        }
        self.uploads.retain(|upload| !upload.is_finished());
        events
    }

    pub fn cancel_uploads(&mut self) {
        if !self.uploads.is_empty() {
            tracing::debug!(count = self.uploads.len(), "cancelling image uploads");
        }
        self.uploads.clear();
    }

    pub fn sync_draft<S: KeyValueStore>(&self, session: &mut DraftSession<S>, now: Instant) -> bool {
        session.set_content_at(&self.surface.html(), now)
    }
}
