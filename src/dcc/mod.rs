//! DCC (Direct Client-to-Client) file transfer subsystem.
//!
//! Supports receiving files via the DCC SEND protocol with security protections
//! including path traversal prevention, private IP rejection, and file size limits.
//! Search bots deliver their results over the same channel, so parsing of the
//! result documents lives here as well.

pub mod archive;
pub mod parser;
pub mod search_results;
pub mod security;
pub mod transfer;
