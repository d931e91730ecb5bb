//! Outbound IRC command lines.
//!
//! Builds the handful of protocol lines the client ever sends. Lines are
//! returned without the trailing CRLF; [`ChatLink`](super::link::ChatLink)
//! frames them on the wire.

/// Strip characters that would break framing or smuggle CTCP.
fn clean(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\r' && *c != '\n' && *c != '\x01')
        .collect()
}

/// Add the `#` prefix to a channel name when it is missing.
pub fn channel_name(channel: &str) -> String {
    let channel = channel.trim();
    if channel.starts_with('#') || channel.starts_with('&') {
        channel.to_string()
    } else {
        format!("#{}", channel)
    }
}

/// `USER <name> <name> <name> :<realname>`
pub fn user(name: &str, realname: &str) -> String {
    let name = clean(name);
    format!("USER {0} {0} {0} :{1}", name, clean(realname))
}

/// `NICK <name>`
pub fn nick(name: &str) -> String {
    format!("NICK {}", clean(name))
}

/// `JOIN #<channel>`
pub fn join(channel: &str) -> String {
    format!("JOIN {}", channel_name(&clean(channel)))
}

/// `PRIVMSG #<channel> :<text>`
pub fn privmsg(channel: &str, text: &str) -> String {
    format!("PRIVMSG {} :{}", channel_name(&clean(channel)), clean(text))
}

/// `PONG <server>`
pub fn pong(server: &str) -> String {
    format!("PONG {}", clean(server))
}

/// `QUIT :<message>`
pub fn quit(message: &str) -> String {
    format!("QUIT :{}", clean(message))
}

/// Text of a search request addressed to the catalog's search bot.
pub fn search_request(bot: &str, query: &str) -> String {
    format!("@{} {}", bot.trim_start_matches('@'), query.trim())
}
