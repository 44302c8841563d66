//! Wire protocol definitions
//!
//! Every exchange is one command line from the client, optionally followed
//! by a size line and raw payload, answered by either a status line or (for
//! GET) a size line and raw payload:
//!
//! ```text
//! client: WRITE <path> [R|W]\n<size>\n<size bytes>    server: OK\n | ERROR...\n
//! client: GET <path>\n                                server: <size>\n<size bytes> | ERROR\n
//! client: RM <path>\n                                 server: OK\n | ERROR\n
//! ```

use std::fmt;

use crate::error::ProtocolError;
use crate::permission::Permission;

/// A parsed request line
///
/// Paths are kept as the raw bytes the client sent; they are not required
/// to be UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Store a file; the size line and payload follow on the wire
    Write { path: Vec<u8>, permission: Permission },
    /// Fetch a file
    Get { path: Vec<u8> },
    /// Delete a file and its permission record
    Remove { path: Vec<u8> },
}

impl Command {
    /// Parse a command line.
    ///
    /// Tokens are separated by ASCII whitespace. The command name is matched
    /// exactly and case-sensitively.
    pub fn parse(line: &[u8]) -> Result<Self, ProtocolError> {
        let mut tokens = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|token| !token.is_empty());

        let (name, path) = match (tokens.next(), tokens.next()) {
            (Some(name), Some(path)) => (name, path.to_vec()),
            _ => return Err(ProtocolError::MissingCommandOrPath),
        };

        match name {
            b"WRITE" => Ok(Command::Write {
                path,
                permission: Permission::from_token(tokens.next()),
            }),
            b"GET" => Ok(Command::Get { path }),
            b"RM" => Ok(Command::Remove { path }),
            other => Err(ProtocolError::UnrecognizedCommand(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Write { .. } => "WRITE",
            Command::Get { .. } => "GET",
            Command::Remove { .. } => "RM",
        }
    }

    pub fn path(&self) -> &[u8] {
        match self {
            Command::Write { path, .. } | Command::Get { path } | Command::Remove { path } => path,
        }
    }

    /// Render the command as it is sent on the wire
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.path().len() + 10);
        line.extend_from_slice(self.name().as_bytes());
        line.push(b' ');
        line.extend_from_slice(self.path());
        if let Command::Write { permission, .. } = self {
            line.push(b' ');
            line.push(permission.as_byte());
        }
        line.push(b'\n');
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), String::from_utf8_lossy(self.path()))
    }
}

/// Parse a payload size line.
///
/// Leniency follows C `atol`: leading whitespace and a sign are accepted,
/// parsing stops at the first non-digit, and no digits at all reads as 0.
/// Only strictly positive sizes are valid.
pub fn parse_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let invalid = || ProtocolError::InvalidSize(String::from_utf8_lossy(line).trim().to_string());

    let mut rest = line;
    while let Some((first, tail)) = rest.split_first() {
        if !matches!(first, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c) {
            break;
        }
        rest = tail;
    }

    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let value = rest
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, b| {
            acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
        });

    if negative || value == 0 {
        return Err(invalid());
    }
    Ok(value)
}

/// Render a size line
pub fn size_line(size: u64) -> String {
    format!("{}\n", size)
}

/// Status reply to WRITE and RM (and a failed GET)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ok,
    /// `ERROR` with an optional free-form reason
    Error(Option<String>),
}

impl Response {
    pub fn error(reason: impl Into<String>) -> Self {
        Response::Error(Some(reason.into()))
    }

    pub fn bare_error() -> Self {
        Response::Error(None)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok)
    }

    pub fn to_line(&self) -> String {
        match self {
            Response::Ok => "OK\n".to_string(),
            Response::Error(None) => "ERROR\n".to_string(),
            Response::Error(Some(reason)) => format!("ERROR: {}\n", reason),
        }
    }

    /// Interpret a status line received from the server.
    ///
    /// Returns `None` when the line is neither `OK` nor `ERROR...`.
    pub fn parse(line: &[u8]) -> Option<Self> {
        if line.starts_with(b"OK") {
            return Some(Response::Ok);
        }
        let rest = line.strip_prefix(b"ERROR")?;
        let reason = String::from_utf8_lossy(rest);
        let reason = reason.trim_start_matches(':').trim();
        if reason.is_empty() {
            Some(Response::Error(None))
        } else {
            Some(Response::Error(Some(reason.to_string())))
        }
    }
}

impl From<&ProtocolError> for Response {
    fn from(e: &ProtocolError) -> Self {
        Response::error(e.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_line().trim_end())
    }
}
