use crate::config::DccConfig;
use crate::dcc::archive::{self, ArchiveError, ArchiveKind};
use crate::dcc::parser::{self, MalformedOffer, TransferOffer};
use crate::dcc::security;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 8192;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Malformed(#[from] MalformedOffer),
    #[error("transfer rejected: {0}")]
    Rejected(String),
    #[error("sender closed after {received} of {expected} bytes")]
    ShortRead { expected: u64, received: u64 },
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Bytes received so far out of the offered size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub received: u64,
    pub total: u64,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.received.saturating_mul(100) / self.total).min(100) as u8
    }
}

/// Apply the configured download policy to an offer before connecting.
pub fn check_offer(offer: &TransferOffer, config: &DccConfig) -> Result<(), TransferError> {
    if offer.size > config.max_file_size {
        return Err(TransferError::Rejected(format!(
            "{} is {} bytes, limit is {}",
            offer.filename, offer.size, config.max_file_size
        )));
    }
    if config.reject_private_ips && security::is_private_host(offer.host) {
        return Err(TransferError::Rejected(format!(
            "{} offered from private address {}",
            offer.filename, offer.host
        )));
    }
    Ok(())
}

/// Parse the offer in `line` and apply the download policy to it.
pub fn accept_offer(line: &str, config: &DccConfig) -> Result<TransferOffer, TransferError> {
    let offer = parser::parse_offer(line)?;
    check_offer(&offer, config)?;
    Ok(offer)
}

/// Receive the offered file into `dest_dir` and return where it ended up.
///
/// Data is written to `<name>.part` and renamed once exactly `offer.size`
/// bytes have arrived. Zip containers are extracted and the extracted member
/// is returned in place of the container.
pub async fn download(
    offer: &TransferOffer,
    dest_dir: &Path,
    progress: Option<&mpsc::UnboundedSender<Progress>>,
) -> Result<PathBuf, TransferError> {
    tokio::fs::create_dir_all(dest_dir).await?;
    let path = security::safe_download_path(dest_dir, &offer.filename).ok_or_else(|| {
        TransferError::Rejected(format!("no safe download path for {}", offer.filename))
    })?;
    let part = security::part_path(&path);

    tracing::info!(file = %offer.filename, host = %offer.host, port = offer.port, bytes = offer.size, "starting transfer");
    let mut stream = TcpStream::connect((offer.host, offer.port)).await?;

    let result = receive(&mut stream, &part, offer.size, progress).await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&part).await;
        tracing::warn!(file = %offer.filename, error = %e, "transfer failed");
        return Err(e);
    }
    tokio::fs::rename(&part, &path).await?;
    tracing::info!(file = %path.display(), bytes = offer.size, "transfer complete");

    match archive::archive_kind(&path) {
        Some(ArchiveKind::Zip) => {
            let container = path.clone();
            let dir = dest_dir.to_path_buf();
            let extracted =
                tokio::task::spawn_blocking(move || archive::extract_zip(&container, &dir))
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))??;
            tokio::fs::remove_file(&path).await?;
            Ok(extracted)
        }
        _ => Ok(path),
    }
}

async fn receive(
    stream: &mut TcpStream,
    part: &Path,
    total: u64,
    progress: Option<&mpsc::UnboundedSender<Progress>>,
) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(part).await?;
    let mut received: u64 = 0;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut last_progress = Instant::now();

    while received < total {
        let want = (total - received).min(CHUNK_SIZE as u64) as usize;
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::ShortRead {
                expected: total,
                received,
            });
        }

        file.write_all(&buf[..n]).await?;
        received += n as u64;

        // DCC acknowledgement: running total as 4 big-endian bytes
        let _ = stream.write_all(&(received as u32).to_be_bytes()).await;

        if let Some(tx) = progress {
            if received == total || last_progress.elapsed() >= PROGRESS_INTERVAL {
                let _ = tx.send(Progress { received, total });
                last_progress = Instant::now();
            }
        }
    }

    file.flush().await?;
    if total == 0 {
        if let Some(tx) = progress {
            let _ = tx.send(Progress { received, total });
        }
    }
    Ok(())
}
