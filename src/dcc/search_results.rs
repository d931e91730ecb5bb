//! Catalog result lines.
//!
//! Search bots answer with a text file of lines such as
//! `!DV8 F. Scott Fitzgerald - The Great Gatsby (Epub).rar  ::INFO:: 394.7KB`,
//! interleaved with header and footer chatter. Each line is parsed on its own;
//! lines that do not describe a book are collected as failures, never fatal.

use crate::dcc::parser::TransferOffer;
use crate::dcc::transfer::{self, TransferError};
use crate::irc::event::SEARCH_RESULTS_MARKER;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Known extensions in match priority order. Ebook formats come before the
/// archive containers.
pub const KNOWN_FORMATS: [&str; 15] = [
    "epub", "mobi", "azw3", "html", "rtf", "pdf", "cdr", "lit", "cbr", "doc", "htm", "jpg",
    "txt", "rar", "zip",
];
const ARCHIVE_FORMATS: [&str; 2] = ["rar", "zip"];

const LINE_MARKER: char = '!';
const INFO_MARKER: &str = "::INFO::";
const HASH_MARKER: &str = "::HASH::";
const NO_SIZE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookRecord {
    pub server: String,
    pub author: String,
    pub title: String,
    pub format: String,
    pub size: String,
    /// The request key sent back to the channel to download this book.
    pub full: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("line does not start with '!'")]
    MissingMarker,
    #[error("no server name after '!'")]
    MissingServer,
    #[error("no known file extension")]
    NoExtension,
    #[error("empty title")]
    EmptyTitle,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {line}")]
pub struct UnparseableLine {
    pub line: String,
    pub reason: LineError,
}

/// The outcome of parsing a whole results document.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub books: Vec<BookRecord>,
    pub errors: Vec<UnparseableLine>,
}

impl SearchResults {
    /// The first `n` failures, rendered for display.
    pub fn error_summary(&self, n: usize) -> Vec<String> {
        self.errors.iter().take(n).map(|e| e.to_string()).collect()
    }
}

/// Check if a filename looks like a search bot results file.
pub fn is_search_results_file(filename: &str) -> bool {
    filename.to_lowercase().contains(SEARCH_RESULTS_MARKER)
}

/// Parse one catalog line.
pub fn parse_line(line: &str) -> Result<BookRecord, LineError> {
    let line = line.trim();
    if !line.starts_with(LINE_MARKER) {
        return Err(LineError::MissingMarker);
    }

    let (body, size) = match line.find(INFO_MARKER) {
        Some(pos) => {
            let info = &line[pos + INFO_MARKER.len()..];
            let info = info.find(HASH_MARKER).map_or(info, |h| &info[..h]).trim();
            let size = if info.is_empty() { NO_SIZE } else { info };
            (line[..pos].trim_end(), Some(size.to_string()))
        }
        None => (line, None),
    };

    let after_marker = &body[LINE_MARKER.len_utf8()..];
    let Some((server, rest)) = after_marker.split_once(' ') else {
        return Err(LineError::MissingServer);
    };
    if server.is_empty() {
        return Err(LineError::MissingServer);
    }
    let rest = strip_tag(rest);

    let (author, remainder) = match rest.split_once(" - ") {
        Some((author, remainder)) => (author.trim(), remainder),
        None => ("", rest),
    };

    let (ext_start, ext) = find_extension(remainder).ok_or(LineError::NoExtension)?;
    let title = remainder[..ext_start].trim();
    if title.is_empty() {
        return Err(LineError::EmptyTitle);
    }

    let format = if ARCHIVE_FORMATS.contains(&ext) {
        embedded_format(&remainder[..ext_start]).unwrap_or(ext)
    } else {
        ext
    };

    let full = match size {
        Some(_) => body.to_string(),
        None => {
            // `remainder` is a suffix of `body`, so its offsets carry over
            let ext_end = body.len() - remainder.len() + ext_start + 1 + ext.len();
            body[..ext_end].to_string()
        }
    };

    Ok(BookRecord {
        server: server.to_string(),
        author: author.to_string(),
        title: title.to_string(),
        format: format.to_string(),
        size: size.unwrap_or_else(|| NO_SIZE.to_string()),
        full,
    })
}

/// Parse a results document. Blank lines are skipped; every other line is
/// either a book or a recorded failure.
pub fn parse_search_results(text: &str) -> SearchResults {
    let mut results = SearchResults::default();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_line(line) {
            Ok(book) => results.books.push(book),
            Err(reason) => results.errors.push(UnparseableLine {
                line: line.to_string(),
                reason,
            }),
        }
    }
    results
}

/// Read and parse a results file. Bots do not always send UTF-8, so invalid
/// bytes are replaced.
pub async fn load_search_results(path: &Path) -> std::io::Result<SearchResults> {
    let bytes = tokio::fs::read(path).await?;
    Ok(parse_search_results(&String::from_utf8_lossy(&bytes)))
}

/// Download a results offer, parse it, and delete the file.
pub async fn fetch(offer: &TransferOffer, dir: &Path) -> Result<SearchResults, TransferError> {
    if !is_search_results_file(&offer.filename) {
        return Err(TransferError::Rejected(format!(
            "{} is not a search results file",
            offer.filename
        )));
    }
    let path = transfer::download(offer, dir, None).await?;
    let results = load_search_results(&path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::debug!(file = %path.display(), error = %e, "could not remove results file");
    }
    let results = results?;
    tracing::info!(
        books = results.books.len(),
        skipped = results.errors.len(),
        "parsed search results"
    );
    Ok(results)
}

/// Drop a leading bracketed tag such as `[Retail]`.
fn strip_tag(rest: &str) -> &str {
    let rest = rest.trim_start();
    if rest.starts_with('[') {
        if let Some(end) = rest.find(']') {
            return rest[end + 1..].trim_start();
        }
    }
    rest
}

/// Position of the dot and the extension of the highest priority known
/// extension in `text`.
fn find_extension(text: &str) -> Option<(usize, &'static str)> {
    let lower = text.to_ascii_lowercase();
    KNOWN_FORMATS.iter().find_map(|ext| {
        let needle = format!(".{}", ext);
        lower
            .match_indices(&needle)
            .find(|(pos, _)| ends_at_boundary(&lower, pos + needle.len()))
            .map(|(pos, _)| (pos, *ext))
    })
}

/// An ebook format named inside the text before an archive extension, e.g.
/// the `Epub` of `The Great Gatsby (Epub).rar`.
fn embedded_format(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    KNOWN_FORMATS
        .iter()
        .filter(|ext| !ARCHIVE_FORMATS.contains(*ext))
        .find(|ext| {
            lower.match_indices(**ext).any(|(pos, _)| {
                starts_at_boundary(&lower, pos) && ends_at_boundary(&lower, pos + ext.len())
            })
        })
        .copied()
}

fn starts_at_boundary(text: &str, pos: usize) -> bool {
    text[..pos]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_alphanumeric())
}

fn ends_at_boundary(text: &str, pos: usize) -> bool {
    text[pos..].chars().next().is_none_or(|c| !c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rar_with_embedded_format_and_info_block() {
        let line = "!DV8 F. Scott Fitzgerald - The Great Gatsby (Epub).rar  ::INFO:: 394.7KB";
        let book = parse_line(line).unwrap();
        assert_eq!(book.server, "DV8");
        assert_eq!(book.author, "F. Scott Fitzgerald");
        assert_eq!(book.title, "The Great Gatsby (Epub)");
        assert_eq!(book.format, "epub");
        assert_eq!(book.size, "394.7KB");
        assert_eq!(book.full, "!DV8 F. Scott Fitzgerald - The Great Gatsby (Epub).rar");
    }

    #[test]
    fn missing_info_block_means_no_size() {
        let line = "!Horla F Scott Fitzgerald - The Great Gatsby (retail) (epub).epub";
        let book = parse_line(line).unwrap();
        assert_eq!(book.server, "Horla");
        assert_eq!(book.author, "F Scott Fitzgerald");
        assert_eq!(book.title, "The Great Gatsby (retail) (epub)");
        assert_eq!(book.format, "epub");
        assert_eq!(book.size, "N/A");
        assert_eq!(book.full, line);
    }

    #[test]
    fn full_key_ends_at_extension_without_info() {
        let book = parse_line("!Oatmeal Frank Herbert - Dune.mobi  (fixed)").unwrap();
        assert_eq!(book.format, "mobi");
        assert_eq!(book.full, "!Oatmeal Frank Herbert - Dune.mobi");
    }

    #[test]
    fn hash_is_not_part_of_size() {
        let line = "!Bsk Isaac Asimov - Foundation.epub  ::INFO:: 1.2MB ::HASH:: 9a0364b9e99bb480dd25e1f0284c8555";
        let book = parse_line(line).unwrap();
        assert_eq!(book.size, "1.2MB");
        assert_eq!(book.full, "!Bsk Isaac Asimov - Foundation.epub");
    }

    #[test]
    fn bracketed_tag_is_not_the_author() {
        let book = parse_line("!Ook [Retail] Ursula K. Le Guin - The Dispossessed.azw3").unwrap();
        assert_eq!(book.author, "Ursula K. Le Guin");
        assert_eq!(book.title, "The Dispossessed");
        assert_eq!(book.format, "azw3");
    }

    #[test]
    fn first_dash_splits_author_from_title() {
        let book = parse_line("!Bot Star Wars - Thrawn - Heir to the Empire.epub").unwrap();
        assert_eq!(book.author, "Star Wars");
        assert_eq!(book.title, "Thrawn - Heir to the Empire");
    }

    #[test]
    fn no_dash_leaves_author_empty() {
        let book = parse_line("!Bot Collected Poems.PDF").unwrap();
        assert_eq!(book.author, "");
        assert_eq!(book.title, "Collected Poems");
        assert_eq!(book.format, "pdf");
    }

    #[test]
    fn html_is_not_read_as_htm() {
        let book = parse_line("!Bot Author - Page.html").unwrap();
        assert_eq!(book.format, "html");
        assert_eq!(book.title, "Page");
    }

    #[test]
    fn plain_archive_stays_archive() {
        let book = parse_line("!Bot Author - Collection.zip  ::INFO:: 3MB").unwrap();
        assert_eq!(book.format, "zip");
        assert_eq!(book.title, "Collection");
    }

    #[test]
    fn failures_carry_a_reason() {
        assert_eq!(parse_line("Search results from SearchBot"), Err(LineError::MissingMarker));
        assert_eq!(parse_line("!"), Err(LineError::MissingServer));
        assert_eq!(parse_line("!Bot Author - Title"), Err(LineError::NoExtension));
        assert_eq!(parse_line("!Bot Author - Notes.epubx"), Err(LineError::NoExtension));
        assert_eq!(parse_line("!Bot Author - .epub"), Err(LineError::EmptyTitle));
    }

    #[test]
    fn successes_have_title_and_known_format() {
        let lines = [
            "!A B - C.epub",
            "!A B - C (x).RAR  ::INFO:: 1KB",
            "!A [tag] B - C.txt.zip",
            "!A B - C.cbr extra words",
            "!A C.lit",
        ];
        for line in lines {
            let book = parse_line(line).unwrap();
            assert!(!book.title.is_empty(), "{}", line);
            assert!(KNOWN_FORMATS.contains(&book.format.as_str()), "{}", line);
        }
    }

    #[test]
    fn document_keeps_books_and_noise_apart() {
        let text = "Search results from SearchBot v3.00.07\r\n\
                    Searched 11 bots for \"gatsby\"\r\n\
                    \r\n\
                    !DV8 F. Scott Fitzgerald - The Great Gatsby (Epub).rar  ::INFO:: 394.7KB\r\n\
                    !Horla F Scott Fitzgerald - The Great Gatsby (retail) (epub).epub\r\n\
                    !Bot broken line\r\n";
        let results = parse_search_results(text);
        assert_eq!(results.books.len(), 2);
        assert_eq!(results.errors.len(), 3);
        assert_eq!(results.errors[2].reason, LineError::NoExtension);

        let summary = results.error_summary(2);
        assert_eq!(summary.len(), 2);
        assert!(summary[0].starts_with("line does not start with '!'"));
    }

    #[test]
    fn results_file_names() {
        assert!(is_search_results_file("SearchBot_results_for_gatsby.txt.zip"));
        assert!(is_search_results_file("searchbot_RESULTS_FOR_x.txt"));
        assert!(!is_search_results_file("The Great Gatsby.epub"));
    }

    #[tokio::test]
    async fn loads_lossy_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        std::fs::write(&path, b"!Bot Caf\xe9 Author - Title.epub\n").unwrap();
        let results = load_search_results(&path).await.unwrap();
        assert_eq!(results.books[0].author, "Caf\u{fffd} Author");
    }
}
