//! DCC SEND offer parser.
//!
//! Parses `DCC SEND <filename> <ip_decimal> <port> <filesize>` offers, with
//! the filename optionally quoted when it contains spaces. The offer may be
//! embedded anywhere in a line, typically inside a CTCP-wrapped PRIVMSG.

use crate::dcc::security::sanitize_filename;
use crate::irc::event::SEND_OFFER_MARKER;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// A parsed DCC SEND offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOffer {
    /// Sanitized, never empty; may contain spaces.
    pub filename: String,
    pub host: Ipv4Addr,
    pub port: u16,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed DCC SEND offer: {reason}")]
pub struct MalformedOffer {
    pub reason: &'static str,
}

fn malformed(reason: &'static str) -> MalformedOffer {
    MalformedOffer { reason }
}

/// Parse the DCC SEND offer contained in `text`.
///
/// The IP address is expected in decimal (network byte order u32) format per
/// the DCC protocol. The filename is sanitized to prevent path
/// traversal.
pub fn parse_offer(text: &str) -> Result<TransferOffer, MalformedOffer> {
    let start = text
        .find(SEND_OFFER_MARKER)
        .ok_or_else(|| malformed("missing DCC SEND marker"))?;
    let content = text[start + SEND_OFFER_MARKER.len()..]
        .trim_matches(|c: char| c == '\x01' || c.is_whitespace());

    let (filename, fields) = if let Some(open) = content.find('"') {
        let quoted = &content[open + 1..];
        let close = quoted
            .find('"')
            .ok_or_else(|| malformed("unterminated quoted filename"))?;
        let fields: Vec<&str> = quoted[close + 1..].split_whitespace().take(3).collect();
        (quoted[..close].to_string(), fields)
    } else {
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() < 4 {
            return Err(malformed("expected filename, address, port and size"));
        }
        let split = tokens.len() - 3;
        (tokens[..split].join(" "), tokens[split..].to_vec())
    };

    let [address, port, size] = fields[..] else {
        return Err(malformed("expected address, port and size after filename"));
    };
    let address: u32 = address
        .trim_matches('\x01')
        .parse()
        .map_err(|_| malformed("address is not a decimal integer"))?;
    let port: u16 = port
        .trim_matches('\x01')
        .parse()
        .map_err(|_| malformed("port is not a decimal integer"))?;
    let size: u64 = size
        .trim_matches('\x01')
        .parse()
        .map_err(|_| malformed("size is not a decimal integer"))?;

    let filename = sanitize_filename(&filename).ok_or_else(|| malformed("empty filename"))?;

    Ok(TransferOffer {
        filename,
        host: Ipv4Addr::from(address),
        port,
        size,
    })
}

/// Renders the offer back in wire form, quoting filenames with whitespace.
impl fmt::Display for TransferOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = u32::from(self.host);
        if self.filename.contains(char::is_whitespace) {
            write!(
                f,
                "{} \"{}\" {} {} {}",
                SEND_OFFER_MARKER, self.filename, address, self.port, self.size
            )
        } else {
            write!(
                f,
                "{} {} {} {} {}",
                SEND_OFFER_MARKER, self.filename, address, self.port, self.size
            )
        }
    }
}
