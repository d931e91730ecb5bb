//! Line-oriented connection to the chat network.
//!
//! [`ChatLink::connect`] returns two halves: a cloneable [`ChatLink`] that
//! every task may write through, and a [`LineReader`] that is the only way to
//! consume incoming lines. Owning the reader is what makes a task the single
//! reader of a link.

use crate::irc::commands;
use crate::logging::{Direction, IrcLogger};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

const QUIT_MESSAGE: &str = "crabbooks";
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("chat link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chat link closed")]
    Closed,
    #[error("channel not joined")]
    NotJoined,
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("timed out connecting to {0}")]
    TimedOut(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Joined,
}

/// Parameters for [`ChatLink::connect`].
#[derive(Clone)]
pub struct LinkOptions {
    /// `host:port` of the chat server.
    pub address: String,
    pub tls: bool,
    pub nickname: String,
    pub realname: String,
    pub logger: Option<IrcLogger>,
    /// Upper bound on the TCP connect, TLS setup and handshake together.
    pub timeout: Duration,
}

/// Writer handle of one chat connection. Clones share the same socket.
#[derive(Clone)]
pub struct ChatLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    address: String,
    nickname: String,
    channel: Mutex<Option<String>>,
    state: Mutex<LinkState>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    closed: CancellationToken,
    logger: Option<IrcLogger>,
}

/// The receiving half of a chat connection.
pub struct LineReader {
    reader: BufReader<BoxedReader>,
    closed: CancellationToken,
    logger: Option<IrcLogger>,
    buf: Vec<u8>,
}

impl ChatLink {
    /// Open the socket (TLS when requested) and send the identity handshake.
    /// No reply is awaited. Fails with [`LinkError::TimedOut`] when this takes
    /// longer than `options.timeout`.
    pub async fn connect(options: LinkOptions) -> Result<(ChatLink, LineReader), LinkError> {
        match tokio::time::timeout(options.timeout, Self::open(&options)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::TimedOut(options.address.clone())),
        }
    }

    async fn open(options: &LinkOptions) -> Result<(ChatLink, LineReader), LinkError> {
        let tcp = TcpStream::connect(&options.address).await?;
        let (link, reader) = if options.tls {
            let stream = tls_connect(&options.address, tcp).await?;
            Self::from_io(&options.address, &options.nickname, stream, options.logger.clone())
        } else {
            Self::from_io(&options.address, &options.nickname, tcp, options.logger.clone())
        };
        link.handshake(&options.realname).await?;
        tracing::info!(address = %options.address, nick = %options.nickname, "chat link connected");
        Ok((link, reader))
    }

    /// Wrap an already-open stream. The link starts out `Disconnected` until
    /// [`handshake`](Self::handshake) has been sent.
    pub fn from_io<S>(
        address: &str,
        nickname: &str,
        stream: S,
        logger: Option<IrcLogger>,
    ) -> (ChatLink, LineReader)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let closed = CancellationToken::new();
        let link = ChatLink {
            inner: Arc::new(LinkInner {
                address: address.to_string(),
                nickname: nickname.to_string(),
                channel: Mutex::new(None),
                state: Mutex::new(LinkState::Disconnected),
                writer: tokio::sync::Mutex::new(Some(Box::new(write_half))),
                closed: closed.clone(),
                logger: logger.clone(),
            }),
        };
        let reader = LineReader {
            reader: BufReader::new(Box::new(read_half)),
            closed,
            logger,
            buf: Vec::with_capacity(512),
        };
        (link, reader)
    }

    /// Send the `USER`/`NICK` identity lines.
    pub async fn handshake(&self, realname: &str) -> Result<(), LinkError> {
        let nickname = self.inner.nickname.clone();
        self.send_line(&commands::user(&nickname, realname)).await?;
        self.send_line(&commands::nick(&nickname)).await?;
        *self.inner.state.lock() = LinkState::Connected;
        Ok(())
    }

    /// Join `channel` and remember it as the target of [`send_message`](Self::send_message).
    pub async fn join_channel(&self, channel: &str) -> Result<(), LinkError> {
        let channel = commands::channel_name(channel);
        self.send_line(&commands::join(&channel)).await?;
        *self.inner.channel.lock() = Some(channel);
        *self.inner.state.lock() = LinkState::Joined;
        Ok(())
    }

    /// Write one protocol line; CRLF is appended.
    pub async fn send_line(&self, text: &str) -> Result<(), LinkError> {
        if self.inner.closed.is_cancelled() {
            return Err(LinkError::Closed);
        }
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::Closed)?;
        let framed = format!("{}\r\n", text);
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
        if let Some(logger) = &self.inner.logger {
            logger.log_line(Direction::Outbound, text);
        }
        Ok(())
    }

    /// Send a chat message to the joined channel.
    pub async fn send_message(&self, text: &str) -> Result<(), LinkError> {
        let channel = self.channel().ok_or(LinkError::NotJoined)?;
        self.send_line(&commands::privmsg(&channel, text)).await
    }

    /// Say goodbye and close the socket. Calling this again is a no-op.
    ///
    /// Closing also wakes the [`LineReader`], whose next read fails with
    /// [`LinkError::Closed`].
    pub async fn disconnect(&self) {
        let writer = self.inner.writer.lock().await.take();
        self.inner.closed.cancel();
        *self.inner.state.lock() = LinkState::Disconnected;
        let Some(mut writer) = writer else {
            return;
        };
        let quit = format!("{}\r\n", commands::quit(QUIT_MESSAGE));
        let _ = tokio::time::timeout(QUIT_TIMEOUT, async {
            writer.write_all(quit.as_bytes()).await?;
            writer.shutdown().await
        })
        .await;
        if let Some(logger) = &self.inner.logger {
            logger.log_line(Direction::Outbound, quit.trim_end());
        }
        tracing::debug!(address = %self.inner.address, nick = %self.inner.nickname, "chat link closed");
    }

    pub fn nickname(&self) -> &str {
        &self.inner.nickname
    }

    pub fn channel(&self) -> Option<String> {
        self.inner.channel.lock().clone()
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl LineReader {
    /// Wait for the next non-empty line, without its line terminator.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; bots are not careful
    /// about encodings. Fails with [`LinkError::Closed`] on end of stream or
    /// once the link has been disconnected.
    pub async fn next_line(&mut self) -> Result<String, LinkError> {
        loop {
            self.buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(LinkError::Closed),
                read = self.reader.read_until(b'\n', &mut self.buf) => read?,
            };
            if read == 0 {
                return Err(LinkError::Closed);
            }
            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            if let Some(logger) = &self.logger {
                logger.log_line(Direction::Inbound, line);
            }
            return Ok(line.to_string());
        }
    }
}

async fn tls_connect(
    address: &str,
    tcp: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, LinkError> {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let host = address.rsplit_once(':').map(|(h, _)| h).unwrap_or(address);
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| LinkError::Tls(e.to_string()))?;
    let connector = TlsConnector::from(Arc::new(config));
    Ok(connector.connect(server_name, tcp).await?)
}
