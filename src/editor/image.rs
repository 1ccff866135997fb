use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::config::EditorOptions;
use crate::editor::{Embed, RichTextSurface};
use crate::error::{BlogError, BlogResult, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn data_uri(&self) -> String {
        data_uri(self.mime, &self.bytes)
    }
}

pub fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(mime)
}

pub fn check_image_size(size: u64, limit: u64) -> Result<(), ValidationError> {
    if size > limit {
        return Err(ValidationError::ImageTooLarge { size, limit });
    }
    Ok(())
}

/// Validates type and size from metadata before reading any bytes.
pub fn read_image(path: &Path, limit: u64) -> BlogResult<ImageFile> {
    let display = path.display().to_string();
    let mime = image_mime(path).ok_or(ValidationError::NotAnImage(display))?;
    let read_err = |source: std::io::Error| BlogError::ImageRead {
        path: path.to_path_buf(),
        source,
    };
    let size = fs::metadata(path).map_err(read_err)?.len();
    check_image_size(size, limit)?;
    let bytes = fs::read(path).map_err(read_err)?;
    // The file may have grown since the metadata call.
    check_image_size(bytes.len() as u64, limit)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ImageFile { name, mime, bytes })
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Progress(u8),
    Inserted { index: usize, len: usize },
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Animating,
    Shown { hide_at: Instant },
    Done,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    src: String,
    index: usize,
    counter: u8,
    step: u8,
    interval: Duration,
    hide_delay: Duration,
    next_tick: Instant,
    phase: Phase,
}

impl ImageUpload {
    pub fn start(src: String, index: usize, options: &EditorOptions, now: Instant) -> Self {
        let interval = options.progress_interval();
        Self {
            src,
            index,
            counter: 0,
            step: options.progress_step.max(1),
            interval,
            hide_delay: options.progress_hide_delay(),
            next_tick: now + interval,
            phase: Phase::Animating,
        }
    }

    pub fn progress(&self) -> u8 {
        match self.phase {
            Phase::Animating => self.counter.max(1),
            Phase::Shown { .. } => 100,
            Phase::Done => 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn poll_at<R: RichTextSurface>(&mut self, surface: &mut R, now: Instant) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while self.phase == Phase::Animating && now >= self.next_tick {
            let tick_at = self.next_tick;
            self.counter = self.counter.saturating_add(self.step).min(100);
            events.push(UploadEvent::Progress(self.counter));
            if self.counter >= 100 {
                let embed = Embed::Image {
                    src: std::mem::take(&mut self.src),
                };
                let len = surface.insert_embed(self.index, &embed);
                surface.set_selection(self.index + len);
                events.push(UploadEvent::Inserted {
                    index: self.index,
                    len,
                });
                self.phase = Phase::Shown {
                    hide_at: tick_at + self.hide_delay,
                };
            } else {
                self.next_tick = tick_at + self.interval;
            }
        }
        if let Phase::Shown { hide_at } = self.phase {
            if now >= hide_at {
                self.phase = Phase::Done;
                events.push(UploadEvent::Hidden);
            }
        }
        events
    }
}
