use std::path::PathBuf;

use thiserror::Error;

use crate::model::Category;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeCommand {
    Append(String),
    ToggleCategory(Category),
    InsertImage(PathBuf),
    InsertLink { url: String, text: String },
    WriteDraft,
    Save { title: String },
    Show,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command ':{0}' (try :help)")]
    UnknownCommand(String),
    #[error("missing {0}")]
    MissingArgument(&'static str),
    #[error("unknown category '{0}' (one of {})", category_names())]
    UnknownCategory(String),
}

fn category_names() -> String {
    Category::all()
        .map(|category| category.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lines starting with `:` are commands; `::` escapes a literal colon.
pub fn parse_line(line: &str) -> Result<ComposeCommand, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(ComposeCommand::Append(line.to_owned()));
    };
    if rest.starts_with(':') {
        return Ok(ComposeCommand::Append(rest.to_owned()));
    }
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    match name {
        "cat" | "category" => {
            if args.is_empty() {
                return Err(ParseError::MissingArgument("category name"));
            }
            args.parse::<Category>()
                .map(ComposeCommand::ToggleCategory)
                .map_err(|_| ParseError::UnknownCategory(args.to_owned()))
        }
        "image" | "img" => {
            if args.is_empty() {
                return Err(ParseError::MissingArgument("image path"));
            }
            Ok(ComposeCommand::InsertImage(PathBuf::from(args)))
        }
        "link" => {
            let (url, text) = match args.split_once(char::is_whitespace) {
                Some((url, text)) => (url, text.trim()),
                None => (args, ""),
            };
            // An empty url is passed through so the editor reports it.
            Ok(ComposeCommand::InsertLink {
                url: url.to_owned(),
                text: text.to_owned(),
            })
        }
        "w" | "write" => Ok(ComposeCommand::WriteDraft),
        "save" => Ok(ComposeCommand::Save {
            title: args.to_owned(),
        }),
        "show" => Ok(ComposeCommand::Show),
        "status" => Ok(ComposeCommand::Status),
        "help" | "h" => Ok(ComposeCommand::Help),
        "q" | "quit" => Ok(ComposeCommand::Quit),
        other => Err(ParseError::UnknownCommand(other.to_owned())),
    }
}

pub const HELP: &str = "\
Plain lines are appended as paragraphs.
  :cat <name>          toggle a category
  :image <path>        insert an image (max size from config)
  :link <url> [text]   insert a link
  :w                   write the draft now
  :save <title>        publish the draft as a post
  :show                print the draft
  :status              print autosave status
  :q                   quit without writing
";
