//! Client requests and chat events of one server-mode session.

use crate::config::AppConfig;
use crate::dcc::parser::TransferOffer;
use crate::dcc::search_results;
use crate::dcc::transfer::{self, TransferError};
use crate::irc::commands;
use crate::irc::dispatcher::{Dispatcher, Handlers};
use crate::irc::event::{Event, EventKind};
use crate::irc::link::{ChatLink, LineReader, LinkOptions, LinkState};
use crate::logging::IrcLogger;
use crate::server::hub::SessionHub;
use crate::server::messages::{Request, Response};
use crate::server::session::ClientSession;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::Arc;

/// Number of unparseable result lines quoted back to the client.
const ERROR_SAMPLES: usize = 5;

/// Everything a request or event handler of one session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: Arc<SessionHub>,
    pub session: Arc<ClientSession>,
    pub config: Arc<AppConfig>,
}

impl SessionContext {
    async fn reply(&self, response: Response) {
        self.session.send(response).await;
    }
}

pub async fn handle_request(ctx: &SessionContext, request: Request) {
    match request {
        Request::Connect => connect(ctx).await,
        Request::Search { query } => search(ctx, &query).await,
        Request::Download { book_key } => download(ctx, &book_key).await,
    }
}

async fn connect(ctx: &SessionContext) {
    if !ctx.session.begin_connect() {
        ctx.reply(Response::error("Already connected.")).await;
        return;
    }

    let irc = &ctx.config.irc;
    let nickname = ctx.session.nickname().to_string();
    let options = LinkOptions {
        address: irc.address(),
        tls: irc.tls,
        nickname: nickname.clone(),
        realname: irc.realname.clone(),
        logger: IrcLogger::new(&ctx.config.logging, &nickname),
        timeout: irc.connect_timeout(),
    };
    let result = tokio::select! {
        _ = ctx.session.cancel_token().cancelled() => return,
        result = ChatLink::connect(options) => result,
    };
    match result {
        Ok((link, reader)) => attach(ctx, link, reader).await,
        Err(e) => {
            ctx.session.end_connect();
            tracing::warn!(session = %ctx.session.id(), error = %e, "chat connection failed");
            ctx.reply(Response::irc_error(format!("Unable to connect to {}: {}", irc.address(), e)))
                .await;
        }
    }
}

/// Bind an open chat link to the session: join the catalog channel and start
/// the session's dispatcher.
pub async fn attach(ctx: &SessionContext, link: ChatLink, reader: LineReader) {
    if !ctx.session.attach_link(link.clone()) || ctx.session.is_closed() {
        link.disconnect().await;
        return;
    }
    if let Err(e) = link.join_channel(&ctx.config.irc.channel).await {
        ctx.reply(Response::irc_error(format!("Unable to join channel: {}", e)))
            .await;
        ctx.hub.unregister(ctx.session.id()).await;
        return;
    }

    let mut dispatcher = Dispatcher::new(
        reader,
        event_handlers(ctx, &link),
        ctx.session.cancel_token().clone(),
    );
    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        let id = task_ctx.session.id();
        if let Err(e) = dispatcher.run().await {
            tracing::info!(session = %id, error = %e, "chat link ended");
            task_ctx
                .reply(Response::irc_error("Lost connection to the chat server."))
                .await;
        }
        task_ctx.hub.unregister(id).await;
    });

    ctx.reply(Response::Connected {
        name: link.nickname().to_string(),
    })
    .await;
}

/// The session's link, once it has joined the catalog channel.
fn joined_link(ctx: &SessionContext) -> Option<&ChatLink> {
    ctx.session
        .link()
        .filter(|link| link.state() == LinkState::Joined)
}

async fn search(ctx: &SessionContext, query: &str) {
    let Some(link) = joined_link(ctx) else {
        ctx.reply(Response::error("Not connected.")).await;
        return;
    };
    let admission = match ctx.hub.limiter().check(ctx.session.id()) {
        Ok(admission) => admission,
        Err(limited) => {
            ctx.reply(Response::RateLimited {
                retry_after_seconds: limited.retry_after_seconds(),
            })
            .await;
            return;
        }
    };

    let request = commands::search_request(&ctx.config.irc.search_bot, query);
    match link.send_message(&request).await {
        Ok(()) => {
            tracing::info!(session = %ctx.session.id(), %query, "search sent");
            ctx.reply(Response::wait("Search request sent.")).await;
        }
        Err(e) => {
            ctx.hub.limiter().refund(admission);
            ctx.reply(Response::irc_error(e.to_string())).await
        }
    }
}

async fn download(ctx: &SessionContext, book_key: &str) {
    let Some(link) = joined_link(ctx) else {
        ctx.reply(Response::error("Not connected.")).await;
        return;
    };
    match link.send_message(book_key).await {
        Ok(()) => ctx.reply(Response::wait("Download request sent.")).await,
        Err(e) => ctx.reply(Response::irc_error(e.to_string())).await,
    }
}

/// The chat event handlers of one session.
pub fn event_handlers(ctx: &SessionContext, link: &ChatLink) -> Handlers {
    let notice = |response: Response| {
        let ctx = ctx.clone();
        move |_: Event| {
            let ctx = ctx.clone();
            let response = response.clone();
            async move { ctx.reply(response).await }
        }
    };

    let matches_ctx = ctx.clone();
    let search_ctx = ctx.clone();
    let book_ctx = ctx.clone();
    let ping_link = link.clone();

    Handlers::new()
        .on(
            EventKind::NoResults,
            notice(Response::irc_error("No results found for that search.")),
        )
        .on(
            EventKind::BadServer,
            notice(Response::irc_error("That server is unavailable, try another one.")),
        )
        .on(
            EventKind::SearchAccepted,
            notice(Response::wait("Search accepted into the queue.")),
        )
        .on(EventKind::MatchesFound, move |event| {
            let ctx = matches_ctx.clone();
            async move {
                ctx.reply(Response::wait(format!(
                    "Your search returned {} matches.",
                    event.payload
                )))
                .await
            }
        })
        .on(EventKind::SearchResult, move |event| {
            let ctx = search_ctx.clone();
            async move { receive_search_results(&ctx, &event.payload).await }
        })
        .on(EventKind::BookResult, move |event| {
            let ctx = book_ctx.clone();
            async move { receive_book(&ctx, &event.payload).await }
        })
        .on(EventKind::Ping, move |event| {
            let link = ping_link.clone();
            async move {
                if let Err(e) = link.send_line(&commands::pong(&event.payload)).await {
                    tracing::debug!(error = %e, "failed to answer ping");
                }
            }
        })
}

/// Parse and vet an offer; failures are reported to the client.
async fn accept_offer(ctx: &SessionContext, line: &str) -> Option<TransferOffer> {
    match transfer::accept_offer(line, &ctx.config.dcc) {
        Ok(offer) => Some(offer),
        Err(TransferError::Malformed(e)) => {
            tracing::warn!(session = %ctx.session.id(), error = %e, "dropping offer");
            ctx.reply(Response::irc_error("Received an unreadable file offer."))
                .await;
            None
        }
        Err(e) => {
            tracing::warn!(session = %ctx.session.id(), error = %e, "offer refused");
            ctx.reply(Response::irc_error(e.to_string())).await;
            None
        }
    }
}

async fn receive_search_results(ctx: &SessionContext, line: &str) {
    let Some(offer) = accept_offer(ctx, line).await else {
        return;
    };
    match search_results::fetch(&offer, &ctx.config.dcc.download_dir).await {
        Ok(results) => {
            ctx.reply(Response::SearchResults {
                parse_errors: results.errors.len(),
                error_samples: results.error_summary(ERROR_SAMPLES),
                books: results.books,
            })
            .await
        }
        Err(e) => {
            ctx.reply(Response::irc_error(format!("Search results transfer failed: {}", e)))
                .await
        }
    }
}

async fn receive_book(ctx: &SessionContext, line: &str) {
    let Some(offer) = accept_offer(ctx, line).await else {
        return;
    };
    match transfer::download(&offer, &ctx.config.dcc.download_dir, None).await {
        Ok(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(offer.filename);
            let link = library_link(&name);
            ctx.reply(Response::DownloadReady { name, link }).await;
        }
        Err(e) => {
            ctx.reply(Response::irc_error(format!("Book transfer failed: {}", e)))
                .await
        }
    }
}

/// Relative URL of a completed download on the library route.
pub fn library_link(name: &str) -> String {
    format!("library/{}", utf8_percent_encode(name, NON_ALPHANUMERIC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::IrcConfig;
    use crate::config::RateLimitScope;
    use crate::server::rate_limit::SearchLimiter;
    use crate::server::session::SessionId;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct Fixture {
        ctx: SessionContext,
        rx: mpsc::Receiver<Response>,
        peer: DuplexStream,
        _dir: tempfile::TempDir,
    }

    async fn connected() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.dcc.download_dir = dir.path().to_path_buf();
        let hub = Arc::new(SessionHub::new(SearchLimiter::new(
            Duration::from_secs(10),
            RateLimitScope::Session,
        )));
        let (session, rx) = ClientSession::new(SessionId::next(), "reader_1".into(), 16);
        let session = Arc::new(session);
        hub.register(session.clone());
        let ctx = SessionContext {
            hub,
            session,
            config: Arc::new(config),
        };

        let (ours, peer) = tokio::io::duplex(8192);
        let (link, reader) = ChatLink::from_io("irc.test:6667", "reader_1", ours, None);
        attach(&ctx, link, reader).await;
        let mut fixture = Fixture {
            ctx,
            rx,
            peer,
            _dir: dir,
        };
        assert_eq!(
            fixture.rx.recv().await,
            Some(Response::Connected {
                name: "reader_1".into()
            })
        );
        fixture
    }

    async fn wire_until(peer: &mut DuplexStream, suffix: &str) -> String {
        let mut wire = String::new();
        let mut buf = [0u8; 1024];
        while !wire.ends_with(suffix) {
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream ended before {:?}, got {:?}", suffix, wire);
            wire.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        wire
    }

    #[tokio::test]
    async fn second_search_inside_interval_is_not_forwarded() {
        let mut f = connected().await;
        let search = Request::Search {
            query: "the great gatsby".into(),
        };

        handle_request(&f.ctx, search.clone()).await;
        assert_eq!(f.rx.recv().await, Some(Response::wait("Search request sent.")));
        handle_request(&f.ctx, search).await;
        match f.rx.recv().await {
            Some(Response::RateLimited {
                retry_after_seconds,
            }) => assert!((1..=10).contains(&retry_after_seconds)),
            other => panic!("expected rate limit, got {:?}", other),
        }

        handle_request(&f.ctx, Request::Download {
            book_key: "!DV8 F. Scott Fitzgerald - The Great Gatsby.epub".into(),
        })
        .await;
        let wire = wire_until(&mut f.peer, "Gatsby.epub\r\n").await;
        assert_eq!(
            wire,
            "JOIN #ebooks\r\n\
             PRIVMSG #ebooks :@search the great gatsby\r\n\
             PRIVMSG #ebooks :!DV8 F. Scott Fitzgerald - The Great Gatsby.epub\r\n"
        );
    }

    /// A session that has not connected yet, with chat settings from `irc`.
    fn unlinked(irc: IrcConfig) -> (SessionContext, mpsc::Receiver<Response>) {
        let (session, rx) = ClientSession::new(SessionId::next(), "reader_2".into(), 4);
        let ctx = SessionContext {
            hub: Arc::new(SessionHub::new(SearchLimiter::new(
                Duration::from_secs(10),
                RateLimitScope::Hub,
            ))),
            session: Arc::new(session),
            config: Arc::new(AppConfig {
                irc,
                ..Default::default()
            }),
        };
        (ctx, rx)
    }

    /// Chat settings pointing at a local port.
    fn local_irc(port: u16, tls: bool) -> IrcConfig {
        IrcConfig {
            server: "127.0.0.1".into(),
            port,
            tls,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn requests_need_a_link() {
        let (ctx, mut rx) = unlinked(Default::default());
        handle_request(&ctx, Request::Search { query: "x".into() }).await;
        assert_eq!(rx.recv().await, Some(Response::error("Not connected.")));
    }

    #[tokio::test]
    async fn failed_connect_can_be_retried() {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (ctx, mut rx) = unlinked(local_irc(port, false));

        for _ in 0..2 {
            handle_request(&ctx, Request::Connect).await;
            match rx.recv().await {
                Some(Response::IrcError { status }) => {
                    assert!(status.starts_with("Unable to connect"), "{}", status)
                }
                other => panic!("expected a connection error, got {:?}", other),
            }
        }
        assert!(!ctx.session.is_closed());
    }

    #[tokio::test]
    async fn closing_the_session_abandons_a_stalled_connect() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // accepts the socket but never answers the TLS hello
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        let (ctx, mut rx) = unlinked(local_irc(port, true));

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handle_request(&ctx, Request::Connect).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.session.close().await;

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.try_recv().is_err());
        server.abort();
    }

    #[tokio::test]
    async fn failed_search_send_keeps_the_rate_limit_slot() {
        let (ctx, mut rx) = unlinked(Default::default());
        let (ours, peer) = tokio::io::duplex(1024);
        let (link, _reader) = ChatLink::from_io("irc.test:6667", "reader_2", ours, None);
        link.join_channel("ebooks").await.unwrap();
        assert!(ctx.session.attach_link(link));
        drop(peer);

        for _ in 0..2 {
            handle_request(&ctx, Request::Search { query: "dune".into() }).await;
            assert!(
                matches!(rx.recv().await, Some(Response::IrcError { .. })),
                "a search that was never sent must not count against the limit"
            );
        }
    }

    #[tokio::test]
    async fn notices_and_pings_are_answered() {
        let mut f = connected().await;
        f.peer
            .write_all(
                b":Search!s@h NOTICE reader_1 :Your search for \"dune\" has been accepted.\r\n\
                  :Search!s@h NOTICE reader_1 :Your search for \"dune\" returned 42 matches.\r\n\
                  :Search!s@h NOTICE reader_1 :Sorry, nothing else.\r\n\
                  PING :irc.test\r\n",
            )
            .await
            .unwrap();

        assert_eq!(
            f.rx.recv().await,
            Some(Response::wait("Search accepted into the queue."))
        );
        assert_eq!(
            f.rx.recv().await,
            Some(Response::wait("Your search returned 42 matches."))
        );
        assert_eq!(
            f.rx.recv().await,
            Some(Response::irc_error("No results found for that search."))
        );
        let wire = wire_until(&mut f.peer, "PONG irc.test\r\n").await;
        assert!(wire.starts_with("JOIN #ebooks\r\n"));
    }

    #[tokio::test]
    async fn book_offer_becomes_download_link() {
        let mut f = connected().await;
        let data = b"not really an epub".to_vec();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let served = data.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&served).await.unwrap();
            let mut acks = Vec::new();
            let _ = socket.read_to_end(&mut acks).await;
        });

        let offer = format!(
            ":DV8!d@h PRIVMSG reader_1 :\x01DCC SEND \"The Great Gatsby.epub\" 2130706433 {} {}\x01\r\n",
            port,
            data.len()
        );
        f.peer.write_all(offer.as_bytes()).await.unwrap();

        assert_eq!(
            f.rx.recv().await,
            Some(Response::DownloadReady {
                name: "The Great Gatsby.epub".into(),
                link: "library/The%20Great%20Gatsby%2Eepub".into(),
            })
        );
        let saved = f.ctx.config.dcc.download_dir.join("The Great Gatsby.epub");
        assert_eq!(std::fs::read(saved).unwrap(), data);
    }

    #[tokio::test]
    async fn malformed_offer_is_reported_not_fetched() {
        let mut f = connected().await;
        f.peer
            .write_all(b":DV8!d@h PRIVMSG reader_1 :\x01DCC SEND broken.epub\x01\r\n")
            .await
            .unwrap();
        assert_eq!(
            f.rx.recv().await,
            Some(Response::irc_error("Received an unreadable file offer."))
        );
    }

    #[tokio::test]
    async fn link_loss_tears_the_session_down() {
        let mut f = connected().await;
        assert_eq!(f.ctx.hub.live_count(), 1);
        drop(f.peer);

        assert_eq!(
            f.rx.recv().await,
            Some(Response::irc_error("Lost connection to the chat server."))
        );
        tokio::time::timeout(Duration::from_secs(1), f.ctx.session.cancel_token().cancelled())
            .await
            .unwrap();
        assert_eq!(f.ctx.hub.live_count(), 0);
    }
}
