//! IRC protocol layer: the chat link, line classification, event dispatch and
//! the wire commands sent to the catalog channel.

pub mod commands;
pub mod dispatcher;
pub mod event;
pub mod link;
