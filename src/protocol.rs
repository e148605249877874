//! Line protocol parser and response generator.
//!
//! Every request is one newline-terminated line of plain text:
//!
//! ```text
//! <command-token> [<arg-token> ...]\n
//! ```
//!
//! Tokens are separated by single ASCII spaces; there is no quoting or
//! escaping. The command token is trimmed and lower-cased, arguments are passed
//! through untouched. Lines whose command matches nothing are chat messages and
//! are relayed verbatim.

use bytes::{Bytes, BytesMut};

/// Characters trimmed from the command token.
const TRIM_CUTSET: &[char] = &[' ', '\n', '\t', '\r', '\x0c', '\x07', '\x08', '\x0b'];

/// A tokenized request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Lower-cased command token, including any leading `:`
    pub command: String,
    /// Remaining tokens, unmodified
    pub args: Vec<String>,
    /// The line as received, without its terminator
    pub line: String,
}

impl Request {
    /// Split a received line into command and arguments.
    ///
    /// Returns `None` for empty lines. A line holding only whitespace is
    /// still a request, and ends up relayed as chat.
    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let mut tokens = line.split(' ');
        let command = tokens
            .next()
            .unwrap_or_default()
            .trim_matches(TRIM_CUTSET)
            .to_lowercase();
        let args = tokens.map(str::to_string).collect();

        Some(Request {
            command,
            args,
            line: line.to_string(),
        })
    }

    /// Built-in verb this request names, if any.
    pub fn builtin(&self) -> Option<Builtin> {
        Builtin::from_command(&self.command)
    }
}

/// Verbs handled by the connection handler itself rather than the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Stream a file from the server to the requester
    Ftp,
    /// Close this connection
    Close,
    /// Slow three-phase echo
    Echo,
    /// Client-to-client file transfer (not available)
    Send,
}

impl Builtin {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            ":ftp" => Some(Builtin::Ftp),
            ":close" => Some(Builtin::Close),
            ":echo" => Some(Builtin::Echo),
            ":send" => Some(Builtin::Send),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Ftp => "ftp",
            Builtin::Close => "close",
            Builtin::Echo => "echo",
            Builtin::Send => "send",
        }
    }
}

/// Response generator
pub struct Response;

impl Response {
    pub const FILE_NOT_FOUND: &'static [u8] = b"file doesn't exist\n";
    pub const FILE_NOT_SPECIFIED: &'static [u8] = b"file is not specified\n";
    pub const DIR_NOT_FOUND: &'static [u8] = b"directory doesn't exist\n";
    pub const DIR_NOT_SPECIFIED: &'static [u8] = b"directory is not specified\n";
    pub const DIR_CREATE_FAILED: &'static [u8] = b"failed to create directory\n";
    pub const FILE_CREATE_FAILED: &'static [u8] = b"failed to create file\n";
    pub const INVALID_ARGUMENTS: &'static [u8] = b"invalid arguments\n";
    pub const OK: &'static [u8] = b"ok\n";
    pub const COMMAND_FAILED: &'static [u8] = b"command failed\n";

    /// A static notice as a payload
    pub fn notice(text: &'static [u8]) -> Bytes {
        Bytes::from_static(text)
    }

    /// A single line of text, newline-terminated
    pub fn line(text: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.extend_from_slice(b"\n");
        buf.freeze()
    }

    /// Notice for features that are not available
    pub fn unavailable(feature: &str) -> Bytes {
        Bytes::from(format!("feature not available: {feature}\n"))
    }

    /// One phase of the echo command
    pub fn echo(text: &str) -> Bytes {
        Bytes::from(format!("\t {text}\n"))
    }

    /// A relayed chat line
    pub fn chat(line: &str) -> Bytes {
        Self::line(line)
    }
}
