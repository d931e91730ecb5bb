//! Terminal mode: one chat session driven from stdin.

pub mod commands;

use crate::config::{AppConfig, RateLimitScope};
use crate::dcc::search_results::{self, BookRecord, SearchResults};
use crate::dcc::transfer::{self, Progress};
use crate::irc::commands::{pong, search_request};
use crate::irc::dispatcher::{Dispatcher, Handlers};
use crate::irc::event::{Event, EventKind};
use crate::irc::link::{ChatLink, LinkOptions};
use crate::logging::IrcLogger;
use crate::server::rate_limit::SearchLimiter;
use crate::server::session::SessionId;
use anyhow::{Context, Result};
use commands::{DownloadTarget, ParsedCommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the chat side reports back to the console.
#[derive(Debug)]
enum CliEvent {
    Status(String),
    Error(String),
    Results(SearchResults),
    Progress(String, Progress),
    Downloaded(PathBuf),
}

struct Console {
    link: ChatLink,
    config: Arc<AppConfig>,
    limiter: SearchLimiter,
    id: SessionId,
    books: Vec<BookRecord>,
}

pub async fn run(config: AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.dcc.download_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create download directory {}",
                config.dcc.download_dir.display()
            )
        })?;
    let config = Arc::new(config);

    let nickname = config.irc.nickname();
    let address = config.irc.address();
    println!("Connecting to {} as {}...", address, nickname);
    let (link, reader) = ChatLink::connect(LinkOptions {
        address: address.clone(),
        tls: config.irc.tls,
        nickname: nickname.clone(),
        realname: config.irc.realname.clone(),
        logger: IrcLogger::new(&config.logging, &nickname),
        timeout: config.irc.connect_timeout(),
    })
    .await
    .with_context(|| format!("Failed to connect to {}", address))?;
    link.join_channel(&config.irc.channel)
        .await
        .context("Failed to join channel")?;
    println!(
        "Joined #{}. Type a search or /help.",
        config.irc.channel.trim_start_matches('#')
    );

    let (tx, mut events) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let mut dispatcher =
        Dispatcher::new(reader, event_handlers(&config, &link, tx), cancel.clone()).spawn();

    let mut console = Console {
        link: link.clone(),
        limiter: SearchLimiter::new(
            Duration::from_secs(config.server.search_interval_secs),
            RateLimitScope::Hub,
        ),
        config,
        id: SessionId::next(),
        books: Vec::new(),
    };
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match commands::parse_command(&line) {
                    Some(ParsedCommand::Quit) => break,
                    Some(command) => console.execute(command).await,
                    None if !line.trim().is_empty() => println!("Unknown command, try /help"),
                    None => {}
                }
            }
            Some(event) = events.recv() => console.show(event),
            result = &mut dispatcher => {
                match result {
                    Ok(Err(e)) => eprintln!("Connection lost: {}", e),
                    Err(e) => eprintln!("Connection task failed: {}", e),
                    Ok(Ok(())) => {}
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    cancel.cancel();
    link.disconnect().await;
    Ok(())
}

impl Console {
    async fn execute(&mut self, command: ParsedCommand) {
        match command {
            ParsedCommand::Search { query } => {
                let admission = match self.limiter.check(self.id) {
                    Ok(admission) => admission,
                    Err(limited) => {
                        println!(
                            "Please wait {}s before searching again.",
                            limited.retry_after_seconds()
                        );
                        return;
                    }
                };
                let request = search_request(&self.config.irc.search_bot, &query);
                match self.link.send_message(&request).await {
                    Ok(()) => println!("Searching for \"{}\"...", query),
                    Err(e) => {
                        self.limiter.refund(admission);
                        println!("! Search failed: {}", e);
                    }
                }
            }
            ParsedCommand::Download { target } => {
                let Some(key) = resolve_download(&target, &self.books) else {
                    println!("No result with that number, try /results");
                    return;
                };
                match self.link.send_message(&key).await {
                    Ok(()) => println!("Requested {}", key),
                    Err(e) => println!("! Download request failed: {}", e),
                }
            }
            ParsedCommand::Results => self.print_results(),
            ParsedCommand::Help => println!("{}", commands::HELP),
            ParsedCommand::Quit => {}
        }
    }

    fn show(&mut self, event: CliEvent) {
        match event {
            CliEvent::Status(text) => println!("* {}", text),
            CliEvent::Error(text) => println!("! {}", text),
            CliEvent::Results(results) => {
                let skipped = results.errors.len();
                self.books = results.books;
                self.print_results();
                if skipped > 0 {
                    println!("({} unparseable lines skipped)", skipped);
                }
            }
            CliEvent::Progress(name, progress) => {
                print!("\r{} {:>3}%", name, progress.percent());
                if progress.received >= progress.total {
                    println!();
                }
                let _ = std::io::stdout().flush();
            }
            CliEvent::Downloaded(path) => println!("Saved {}", path.display()),
        }
    }

    fn print_results(&self) {
        if self.books.is_empty() {
            println!("No results.");
            return;
        }
        for (i, book) in self.books.iter().enumerate() {
            println!("{}", format_book(i + 1, book));
        }
    }
}

/// The request key for a download target, looked up in the last results
/// when given by row number.
fn resolve_download(target: &DownloadTarget, books: &[BookRecord]) -> Option<String> {
    match target {
        DownloadTarget::Index(n) => books.get(n.checked_sub(1)?).map(|b| b.full.clone()),
        DownloadTarget::Key(key) => Some(key.clone()),
    }
}

fn format_book(row: usize, book: &BookRecord) -> String {
    let name = if book.author.is_empty() {
        book.title.clone()
    } else {
        format!("{} - {}", book.author, book.title)
    };
    format!(
        "{:>3}. {} [{}] {} ({})",
        row, name, book.format, book.size, book.server
    )
}

fn event_handlers(
    config: &Arc<AppConfig>,
    link: &ChatLink,
    tx: mpsc::UnboundedSender<CliEvent>,
) -> Handlers {
    let report = |make: fn(&Event) -> CliEvent| {
        let tx = tx.clone();
        move |event: Event| {
            let _ = tx.send(make(&event));
            async {}
        }
    };

    let search_tx = tx.clone();
    let search_config = config.clone();
    let book_tx = tx.clone();
    let book_config = config.clone();
    let ping_link = link.clone();

    Handlers::new()
        .on(
            EventKind::NoResults,
            report(|_| CliEvent::Error("No results found.".into())),
        )
        .on(
            EventKind::BadServer,
            report(|_| CliEvent::Error("That server is unavailable, try another one.".into())),
        )
        .on(
            EventKind::SearchAccepted,
            report(|_| CliEvent::Status("Search accepted, waiting for results...".into())),
        )
        .on(
            EventKind::MatchesFound,
            report(|e| CliEvent::Status(format!("Search returned {} matches.", e.payload))),
        )
        .on(EventKind::SearchResult, move |event| {
            let tx = search_tx.clone();
            let config = search_config.clone();
            async move {
                let result = match transfer::accept_offer(&event.payload, &config.dcc) {
                    Ok(offer) => search_results::fetch(&offer, &config.dcc.download_dir).await,
                    Err(e) => Err(e),
                };
                let _ = tx.send(match result {
                    Ok(results) => CliEvent::Results(results),
                    Err(e) => CliEvent::Error(format!("Search results transfer failed: {}", e)),
                });
            }
        })
        .on(EventKind::BookResult, move |event| {
            let tx = book_tx.clone();
            let config = book_config.clone();
            async move {
                let offer = match transfer::accept_offer(&event.payload, &config.dcc) {
                    Ok(offer) => offer,
                    Err(e) => {
                        let _ = tx.send(CliEvent::Error(format!("Book offer refused: {}", e)));
                        return;
                    }
                };

                let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
                let forward_tx = tx.clone();
                let name = offer.filename.clone();
                let forward = tokio::spawn(async move {
                    while let Some(progress) = progress_rx.recv().await {
                        let _ = forward_tx.send(CliEvent::Progress(name.clone(), progress));
                    }
                });

                let result =
                    transfer::download(&offer, &config.dcc.download_dir, Some(&progress_tx)).await;
                drop(progress_tx);
                let _ = forward.await;
                let _ = tx.send(match result {
                    Ok(path) => CliEvent::Downloaded(path),
                    Err(e) => CliEvent::Error(format!("Book transfer failed: {}", e)),
                });
            }
        })
        .on(EventKind::Ping, move |event| {
            let link = ping_link.clone();
            async move {
                if let Err(e) = link.send_line(&pong(&event.payload)).await {
                    tracing::debug!(error = %e, "failed to answer ping");
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(author: &str, title: &str) -> BookRecord {
        BookRecord {
            server: "DV8".into(),
            author: author.into(),
            title: title.into(),
            format: "epub".into(),
            size: "394.7KB".into(),
            full: format!("!DV8 {} - {}.epub", author, title),
        }
    }

    #[test]
    fn rows_resolve_to_request_keys() {
        let books = vec![book("Frank Herbert", "Dune"), book("Iain M. Banks", "Excession")];
        assert_eq!(
            resolve_download(&DownloadTarget::Index(2), &books).as_deref(),
            Some("!DV8 Iain M. Banks - Excession.epub")
        );
        assert_eq!(resolve_download(&DownloadTarget::Index(3), &books), None);
        assert_eq!(resolve_download(&DownloadTarget::Index(0), &books), None);
        assert_eq!(
            resolve_download(&DownloadTarget::Key("!Bot x.epub".into()), &[]).as_deref(),
            Some("!Bot x.epub")
        );
    }

    #[test]
    fn book_rows() {
        assert_eq!(
            format_book(1, &book("Frank Herbert", "Dune")),
            "  1. Frank Herbert - Dune [epub] 394.7KB (DV8)"
        );
        assert_eq!(
            format_book(12, &book("", "Collected Poems")),
            " 12. Collected Poems [epub] 394.7KB (DV8)"
        );
    }

    #[tokio::test]
    async fn chat_events_reach_the_console() {
        let (ours, _peer) = tokio::io::duplex(4096);
        let (link, _reader) = ChatLink::from_io("irc.test:6667", "reader", ours, None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = event_handlers(&Arc::new(AppConfig::default()), &link, tx);

        let matches = handlers.get(EventKind::MatchesFound).unwrap();
        matches(Event::new(EventKind::MatchesFound, "174")).await;
        match rx.recv().await {
            Some(CliEvent::Status(text)) => assert_eq!(text, "Search returned 174 matches."),
            other => panic!("unexpected {:?}", other),
        }

        let book = handlers.get(EventKind::BookResult).unwrap();
        book(Event::new(EventKind::BookResult, "DCC SEND broken")).await;
        assert!(matches!(rx.recv().await, Some(CliEvent::Error(_))));
    }
}
