//! Classification of raw chat lines into catalog events.
//!
//! The catalog bots talk in free text, so classification is a fixed list of
//! substring rules evaluated in order; the first rule that matches wins.

use irc::proto::{Command, Message};

/// Marker of an out-of-band transfer offer.
pub const SEND_OFFER_MARKER: &str = "DCC SEND";
/// Filename fragment that distinguishes search result files from books.
pub const SEARCH_RESULTS_MARKER: &str = "_results_for";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SearchResult,
    BookResult,
    NoResults,
    BadServer,
    SearchAccepted,
    MatchesFound,
    Ping,
    PlainMessage,
}

impl EventKind {
    pub const COUNT: usize = 8;

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Events whose handlers start a file transfer and therefore run as
    /// their own task.
    pub fn spawns_task(self) -> bool {
        matches!(self, EventKind::SearchResult | EventKind::BookResult)
    }
}

/// A classified line.
///
/// `payload` is the raw line, except for [`EventKind::MatchesFound`] (the
/// match count reported by the bot) and [`EventKind::Ping`] (the server token
/// to echo back).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: String,
}

impl Event {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Classify one line received from the chat server.
pub fn classify(line: &str) -> Event {
    if line.contains(SEND_OFFER_MARKER) {
        let kind = if line.contains(SEARCH_RESULTS_MARKER) {
            EventKind::SearchResult
        } else {
            EventKind::BookResult
        };
        return Event::new(kind, line);
    }

    match line.parse::<Message>().map(|m| m.command) {
        Ok(Command::NOTICE(_, text)) => classify_notice(line, &text),
        Ok(Command::PING(server, _)) => Event::new(EventKind::Ping, server),
        _ => Event::new(EventKind::PlainMessage, line),
    }
}

fn classify_notice(line: &str, text: &str) -> Event {
    if text.contains("Sorry") {
        Event::new(EventKind::NoResults, line)
    } else if text.contains("try another server") {
        Event::new(EventKind::BadServer, line)
    } else if text.contains("has been accepted") {
        Event::new(EventKind::SearchAccepted, line)
    } else if text.contains("matches") {
        Event::new(EventKind::MatchesFound, match_count(text))
    } else {
        Event::new(EventKind::PlainMessage, line)
    }
}

/// The text strictly between "returned" and "matches", trimmed.
fn match_count(text: &str) -> String {
    let Some(start) = text.find("returned") else {
        return text.trim().to_string();
    };
    let after = &text[start + "returned".len()..];
    match after.find("matches") {
        Some(end) => after[..end].trim().to_string(),
        None => after.trim().to_string(),
    }
}
