//! Minimal IMAP4rev1 client codec.
//!
//! Only what the assistant needs: tagged commands, untagged data lines with
//! `{N}` literals, and parsers for SEARCH and FETCH (RFC822 / UID) replies.

use std::io::{BufRead, BufReader, Read, Write};

use tracing::debug;

use crate::error::ConnectionError;

/// Largest literal the client will accept from a server.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// Command completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Ok,
    No,
    Bad,
}

/// One logical server line with any literals it carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLine {
    /// Line text with CRLFs removed; literal payloads are not inlined.
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Everything the server sent for one tagged command.
#[derive(Debug, Clone)]
pub struct Response {
    pub untagged: Vec<ResponseLine>,
    pub status: Completion,
    /// Text after the completion keyword on the tagged line.
    pub text: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == Completion::Ok
    }
}

/// Buffered IMAP connection over any byte stream.
pub struct ImapStream<S: Read + Write> {
    inner: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
            next_tag: 1,
        }
    }

    /// Read the server greeting. `* BYE` is reported as a rejection.
    pub fn read_greeting(&mut self) -> Result<ResponseLine, ConnectionError> {
        let greeting = self.read_line()?;
        let upper = greeting.text.to_ascii_uppercase();
        if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
            Ok(greeting)
        } else if upper.starts_with("* BYE") {
            Err(ConnectionError::Rejected {
                command: "greeting".into(),
                reason: greeting.text,
            })
        } else {
            Err(ConnectionError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.text
            )))
        }
    }

    /// Send one command and collect its full response.
    pub fn command(&mut self, command: &str) -> Result<Response, ConnectionError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        // Never log arguments: LOGIN carries the password.
        let verb = command.split_whitespace().next().unwrap_or_default();
        debug!(tag = %tag, verb = %verb, "IMAP command");

        let stream = self.inner.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(rest) = line.text.strip_prefix(&prefix) {
                let (keyword, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match keyword.to_ascii_uppercase().as_str() {
                    "OK" => Completion::Ok,
                    "NO" => Completion::No,
                    "BAD" => Completion::Bad,
                    other => {
                        return Err(ConnectionError::Protocol(format!(
                            "unknown completion {other} for {verb}"
                        )));
                    }
                };
                return Ok(Response {
                    untagged,
                    status,
                    text: text.to_string(),
                });
            }
            if line.text.starts_with('+') {
                return Err(ConnectionError::Protocol(format!(
                    "unexpected continuation request during {verb}"
                )));
            }
            untagged.push(line);
        }
    }

    /// Read one logical line, pulling in `{N}` literals as they appear.
    fn read_line(&mut self) -> Result<ResponseLine, ConnectionError> {
        let mut line = ResponseLine::default();
        loop {
            let mut buf = Vec::new();
            let n = self.inner.read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Err(ConnectionError::Closed);
            }
            let segment = String::from_utf8_lossy(&buf);
            let segment = segment.trim_end_matches(['\r', '\n']);
            line.text.push_str(segment);

            match literal_len(segment) {
                Some(len) if len > MAX_LITERAL_BYTES => {
                    return Err(ConnectionError::Protocol(format!(
                        "literal of {len} bytes exceeds limit"
                    )));
                }
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.inner.read_exact(&mut literal)?;
                    line.literals.push(literal);
                }
                None => return Ok(line),
            }
        }
    }
}

/// Parse a trailing `{N}` literal marker.
fn literal_len(segment: &str) -> Option<usize> {
    let body = segment.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// Quote a string for use as an IMAP quoted-string argument.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Sequence numbers from `* SEARCH` lines, in server order.
pub fn parse_search(untagged: &[ResponseLine]) -> Vec<u32> {
    untagged
        .iter()
        .filter_map(|line| {
            let mut words = line.text.split_whitespace();
            let star = words.next()?;
            let keyword = words.next()?;
            (star == "*" && keyword.eq_ignore_ascii_case("SEARCH")).then_some(words)
        })
        .flat_map(|words| words.filter_map(|w| w.parse::<u32>().ok()))
        .collect()
}

/// Is this a `* <seq> FETCH` line for the given message?
fn is_fetch_for(line: &ResponseLine, seq: u32) -> bool {
    let mut words = line.text.split_whitespace();
    words.next() == Some("*")
        && words.next().and_then(|w| w.parse::<u32>().ok()) == Some(seq)
        && words
            .next()
            .is_some_and(|w| w.eq_ignore_ascii_case("FETCH"))
}

/// First literal of the FETCH response for `seq` (the message bytes).
pub fn parse_fetch_body(untagged: &[ResponseLine], seq: u32) -> Option<Vec<u8>> {
    untagged
        .iter()
        .filter(|line| is_fetch_for(line, seq))
        .find_map(|line| line.literals.first().cloned())
}

/// `UID n` from the FETCH response for `seq`.
pub fn parse_uid(untagged: &[ResponseLine], seq: u32) -> Option<u32> {
    untagged
        .iter()
        .filter(|line| is_fetch_for(line, seq))
        .find_map(|line| {
            let flat = line.text.replace(['(', ')'], " ");
            let mut words = flat.split_whitespace();
            while let Some(word) = words.next() {
                if word.eq_ignore_ascii_case("UID") {
                    return words.next().and_then(|w| w.parse().ok());
                }
            }
            None
        })
}
