//! User slash-command parser.
//!
//! Parses terminal input lines into typed [`ParsedCommand`] values. Text that
//! does not start with `/` is a search.

/// What `/download` refers to: a row of the last result list or a raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// 1-based row number.
    Index(usize),
    Key(String),
}

/// A parsed user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Search { query: String },
    Download { target: DownloadTarget },
    Results,
    Help,
    Quit,
}

/// Parse one input line.
///
/// Returns `None` for blank input, unknown commands and commands missing
/// their argument. Commands are case-insensitive.
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let Some(rest) = input.strip_prefix('/') else {
        return Some(ParsedCommand::Search {
            query: input.to_string(),
        });
    };

    let (cmd, arg) = match rest.split_once(' ') {
        Some((cmd, arg)) => (cmd.to_lowercase(), arg.trim()),
        None => (rest.to_lowercase(), ""),
    };

    match cmd.as_str() {
        "search" | "s" => {
            if arg.is_empty() {
                return None;
            }
            Some(ParsedCommand::Search {
                query: arg.to_string(),
            })
        }
        "download" | "dl" | "get" => {
            if arg.is_empty() {
                return None;
            }
            let target = match arg.parse::<usize>() {
                Ok(n) if n > 0 => DownloadTarget::Index(n),
                Ok(_) => return None,
                Err(_) => DownloadTarget::Key(arg.to_string()),
            };
            Some(ParsedCommand::Download { target })
        }
        "results" | "r" => Some(ParsedCommand::Results),
        "help" | "h" | "?" => Some(ParsedCommand::Help),
        "quit" | "exit" | "q" => Some(ParsedCommand::Quit),
        _ => None,
    }
}

pub const HELP: &str = "\
Commands:
  <text>              search for <text>
  /search <text>      search for <text>
  /download <n>       download row <n> of the last results
  /download !<key>    download by request key
  /results            show the last results again
  /help               show this help
  /quit               disconnect and exit";
