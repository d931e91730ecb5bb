//! JSON envelopes exchanged with server-mode clients over the WebSocket.

use crate::dcc::search_results::BookRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Connect,
    Search {
        query: String,
    },
    Download {
        #[serde(rename = "bookKey")]
        book_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Connected {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    SearchResults {
        books: Vec<BookRecord>,
        parse_errors: usize,
        error_samples: Vec<String>,
    },
    DownloadReady {
        name: String,
        link: String,
    },
    Wait {
        status: String,
    },
    IrcError {
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    RateLimited {
        retry_after_seconds: u64,
    },
    Error {
        status: String,
    },
}

impl Response {
    pub fn wait(status: impl Into<String>) -> Self {
        Response::Wait {
            status: status.into(),
        }
    }

    pub fn irc_error(status: impl Into<String>) -> Self {
        Response::IrcError {
            status: status.into(),
        }
    }

    pub fn error(status: impl Into<String>) -> Self {
        Response::Error {
            status: status.into(),
        }
    }
}
