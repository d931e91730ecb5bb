//! Event dispatch loop.
//!
//! A [`Dispatcher`] owns the [`LineReader`] of one chat link, classifies each
//! line in arrival order and hands the resulting [`Event`] to the handler
//! registered for its kind. Transfer-triggering events run their handler as a
//! separate task so a long download never holds up the next line; every
//! other handler is awaited before the next line is read.

use crate::irc::event::{classify, Event, EventKind};
use crate::irc::link::{LineReader, LinkError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handler table indexed by [`EventKind`]. Kinds without a handler are
/// ignored.
#[derive(Clone, Default)]
pub struct Handlers {
    table: [Option<Handler>; EventKind::COUNT],
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn on<F, Fut>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.table[kind.index()] = Some(Arc::new(move |event| handler(event).boxed()));
        self
    }

    pub fn get(&self, kind: EventKind) -> Option<Handler> {
        self.table[kind.index()].clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    Stopped,
}

pub struct Dispatcher {
    reader: LineReader,
    handlers: Handlers,
    cancel: CancellationToken,
    state: DispatcherState,
}

impl Dispatcher {
    pub fn new(reader: LineReader, handlers: Handlers, cancel: CancellationToken) -> Self {
        Self {
            reader,
            handlers,
            cancel,
            state: DispatcherState::Idle,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Read and dispatch lines until the link fails or `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation and the link error otherwise. A
    /// dispatcher runs once; calling `run` again after it stopped returns
    /// immediately.
    pub async fn run(&mut self) -> Result<(), LinkError> {
        if self.state != DispatcherState::Idle {
            return Ok(());
        }
        self.state = DispatcherState::Running;

        let result = loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                line = self.reader.next_line() => line,
            };
            match line {
                Ok(line) => dispatch(&self.handlers, classify(&line)).await,
                Err(e) => break Err(e),
            }
        };

        self.state = DispatcherState::Stopped;
        tracing::debug!(state = ?self.state(), ok = result.is_ok(), "dispatcher finished");
        result
    }

    /// Run on a task of its own.
    pub fn spawn(mut self) -> JoinHandle<Result<(), LinkError>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn dispatch(handlers: &Handlers, event: Event) {
    let Some(handler) = handlers.get(event.kind) else {
        tracing::trace!(kind = ?event.kind, "no handler registered");
        return;
    };
    if event.kind.spawns_task() {
        tokio::spawn(handler(event));
    } else {
        handler(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::link::ChatLink;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::{mpsc, Notify};

    const MATCHES: &str = ":Search!s@h NOTICE reader :Your search for \"dune\" returned 12 matches.";
    const RESULTS: &str = ":Search!s@h PRIVMSG reader :\x01DCC SEND SearchBot_results_for_dune.txt.zip 2130706433 4000 10\x01";
    const CHATTER: &str = ":someone!u@h PRIVMSG #ebooks :hello";

    /// A reader that yields `lines` and then reaches end of stream.
    async fn scripted(lines: &[&str]) -> LineReader {
        let (ours, mut theirs) = tokio::io::duplex(8192);
        let (_link, reader) = ChatLink::from_io("irc.test:6667", "reader", ours, None);
        for line in lines {
            theirs.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
        }
        drop(theirs);
        reader
    }

    #[tokio::test]
    async fn inline_handler_completes_before_next_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let matches_tx = tx.clone();
        let handlers = Handlers::new()
            .on(EventKind::MatchesFound, move |event| {
                let tx = matches_tx.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    tx.send(format!("matches {}", event.payload)).unwrap();
                }
            })
            .on(EventKind::SearchResult, move |_| {
                let tx = tx.clone();
                async move {
                    tx.send("search".to_string()).unwrap();
                }
            });

        let mut dispatcher =
            Dispatcher::new(scripted(&[MATCHES, RESULTS]).await, handlers, CancellationToken::new());
        assert!(matches!(dispatcher.run().await, Err(LinkError::Closed)));

        assert_eq!(rx.recv().await.unwrap(), "matches 12");
        assert_eq!(rx.recv().await.unwrap(), "search");
    }

    #[tokio::test]
    async fn transfer_handlers_do_not_block_classification() {
        let release = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let search_tx = tx.clone();
        let gate = release.clone();
        let handlers = Handlers::new()
            .on(EventKind::SearchResult, move |_| {
                let tx = search_tx.clone();
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    tx.send("search done").unwrap();
                }
            })
            .on(EventKind::PlainMessage, move |_| {
                let tx = tx.clone();
                async move {
                    tx.send("plain").unwrap();
                }
            });

        let mut dispatcher =
            Dispatcher::new(scripted(&[RESULTS, CHATTER]).await, handlers, CancellationToken::new());
        let result = tokio::time::timeout(Duration::from_secs(1), dispatcher.run()).await;
        assert!(matches!(result, Ok(Err(LinkError::Closed))));
        assert_eq!(rx.recv().await.unwrap(), "plain");

        release.notify_one();
        assert_eq!(rx.recv().await.unwrap(), "search done");
    }

    #[tokio::test]
    async fn unset_handlers_are_ignored() {
        let mut dispatcher = Dispatcher::new(
            scripted(&[MATCHES, RESULTS, CHATTER, "PING :irc.test"]).await,
            Handlers::new(),
            CancellationToken::new(),
        );
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert!(matches!(dispatcher.run().await, Err(LinkError::Closed)));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn cancellation_stops_for_good() {
        let (ours, _theirs) = tokio::io::duplex(64);
        let (_link, reader) = ChatLink::from_io("irc.test:6667", "reader", ours, None);
        let cancel = CancellationToken::new();
        let mut dispatcher = Dispatcher::new(reader, Handlers::new(), cancel.clone());

        let task = tokio::spawn(async move {
            let result = dispatcher.run().await;
            (result, dispatcher)
        });
        cancel.cancel();
        let (result, mut dispatcher) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(dispatcher.run().await.is_ok());
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }
}
