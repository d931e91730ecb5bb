use crate::irc::link::ChatLink;
use crate::server::messages::Response;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        SessionId(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected client: its chat link, its outbound queue and the token
/// that tears both down.
pub struct ClientSession {
    id: SessionId,
    nickname: String,
    outbound: mpsc::Sender<Response>,
    cancel: CancellationToken,
    link: OnceLock<ChatLink>,
    connecting: AtomicBool,
}

impl ClientSession {
    /// Create a session and the receiving end of its outbound queue.
    pub fn new(id: SessionId, nickname: String, queue: usize) -> (Self, mpsc::Receiver<Response>) {
        let (outbound, rx) = mpsc::channel(queue.max(1));
        let session = Self {
            id,
            nickname,
            outbound,
            cancel: CancellationToken::new(),
            link: OnceLock::new(),
            connecting: AtomicBool::new(false),
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue a response for the client. Responses to a closed session are
    /// dropped.
    pub async fn send(&self, response: Response) {
        if self.is_closed() {
            tracing::debug!(session = %self.id, ?response, "session closed, dropping response");
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            sent = self.outbound.send(response) => {
                if sent.is_err() {
                    tracing::debug!(session = %self.id, "outbound queue closed");
                }
            }
        }
    }

    /// Claim the right to open this session's chat link. Only the first
    /// caller gets `true`.
    pub fn begin_connect(&self) -> bool {
        self.connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the connect claim back after a connection attempt failed, so the
    /// client may try again.
    pub fn end_connect(&self) {
        if self.link.get().is_none() {
            self.connecting.store(false, Ordering::Release);
        }
    }

    /// Store the chat link. Returns `false` if one is already attached.
    pub fn attach_link(&self, link: ChatLink) -> bool {
        self.link.set(link).is_ok()
    }

    pub fn link(&self) -> Option<&ChatLink> {
        self.link.get()
    }

    /// Tear the session down. Safe to call any number of times, from any
    /// task.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(link) = self.link.get() {
            link.disconnect().await;
        }
    }
}
