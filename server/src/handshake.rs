//! Incremental parser for the request line and headers of a connection.
//!
//! The parser is fed whatever bytes the socket produced, in pieces of any
//! size, and reports how many bytes of the last piece belonged to the
//! request head once it is complete. It never does I/O itself.
//!
//! Lines are accumulated in a buffer bounded by [`MAX_LINE_LENGTH`]. A `\r`
//! only ends a line when the byte after it is `\n`; otherwise the `\r` is
//! kept as part of the line. Only the `Sec-WebSocket-Key` header is retained
//! and it is hashed as soon as the end of the headers is seen. Other headers
//! are checked for a colon and then dropped.

use crate::error::HandshakeError;
use sha1::{Digest, Sha1};
use shared::handshake::{KeyHash, KEY_HASH_LEN, WS_KEY_GUID};

/// Longest request line or header line that is accepted.
pub const MAX_LINE_LENGTH: usize = 512;

const KEY_HEADER: &[u8] = b"sec-websocket-key:";
const VERSION_PREFIX: &[u8] = b"HTTP/1.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingRequestLine,
    TerminatingRequestLine,
    ReadingHeader,
    TerminatingHeader,
    CheckingHeaderContinuation,
    Done,
    Error,
}

/// Progress reported by [`HandshakeParser::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    NeedMoreData,
    /// The head is complete. Holds how many bytes of the last fed slice it
    /// used; anything after that belongs to the body.
    Finished(usize),
}

pub struct HandshakeParser {
    state: State,
    buf: Vec<u8>,
    key: Option<Vec<u8>>,
    key_hash: Option<KeyHash>,
    method: String,
    target: String,
    error: Option<HandshakeError>,
}

impl HandshakeParser {
    pub fn new() -> Self {
        Self {
            state: State::ReadingRequestLine,
            buf: Vec::with_capacity(MAX_LINE_LENGTH),
            key: None,
            key_hash: None,
            method: String::new(),
            target: String::new(),
            error: None,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<ParseStatus, HandshakeError> {
        let mut pos = 0;

        while pos < data.len() {
            let consumed = match self.state {
                State::ReadingRequestLine => {
                    self.read_line(&data[pos..], State::TerminatingRequestLine)
                }
                State::TerminatingRequestLine => self.terminate_line(
                    data[pos],
                    State::ReadingRequestLine,
                    Self::process_request_line,
                ),
                State::ReadingHeader => self.read_line(&data[pos..], State::TerminatingHeader),
                State::TerminatingHeader => {
                    self.terminate_line(data[pos], State::ReadingHeader, Self::process_header_line)
                }
                State::CheckingHeaderContinuation => self.check_continuation(data[pos]),
                State::Done => return Ok(ParseStatus::Finished(pos)),
                State::Error => break,
            };

            match consumed {
                Ok(n) => pos += n,
                Err(e) => {
                    self.state = State::Error;
                    self.error = Some(e.clone());
                    return Err(e);
                }
            }
        }

        match self.state {
            State::Done => Ok(ParseStatus::Finished(pos)),
            State::Error => Err(self
                .error
                .clone()
                .unwrap_or(HandshakeError::Invalid("Invalid HTTP request received"))),
            _ => Ok(ParseStatus::NeedMoreData),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Hash of the client key and the fixed GUID, available once finished.
    pub fn key_hash(&self) -> Option<&KeyHash> {
        self.key_hash.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn add_bytes(&mut self, bytes: &[u8]) -> Result<(), HandshakeError> {
        if self.buf.len() + bytes.len() > MAX_LINE_LENGTH {
            return Err(HandshakeError::UnsupportedLineLength);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self, data: &[u8], terminating: State) -> Result<usize, HandshakeError> {
        match data.iter().position(|&b| b == b'\r') {
            Some(end) => {
                self.add_bytes(&data[..end])?;
                self.state = terminating;
                Ok(end + 1)
            }
            None => {
                self.add_bytes(data)?;
                Ok(data.len())
            }
        }
    }

    fn terminate_line(
        &mut self,
        byte: u8,
        reading: State,
        process: fn(&mut Self) -> Result<(), HandshakeError>,
    ) -> Result<usize, HandshakeError> {
        if byte == b'\n' {
            process(self)?;
            Ok(1)
        } else {
            // A lone '\r' is part of the line; the current byte is read again
            self.add_bytes(b"\r")?;
            self.state = reading;
            Ok(0)
        }
    }

    fn process_request_line(&mut self) -> Result<(), HandshakeError> {
        if self.buf.is_empty() {
            // Some clients send a stray CRLF before the request
            self.state = State::ReadingRequestLine;
            return Ok(());
        }

        let line = std::mem::take(&mut self.buf);
        let invalid = HandshakeError::Invalid("Invalid HTTP request received");

        let method_end = line.iter().position(|&b| b == b' ').ok_or(invalid.clone())?;
        let rest = &line[method_end + 1..];
        let target_end = rest.iter().position(|&b| b == b' ').ok_or(invalid)?;
        let version = &rest[target_end + 1..];

        let digits = version
            .strip_prefix(VERSION_PREFIX)
            .ok_or(HandshakeError::UnsupportedVersion)?;
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(HandshakeError::UnsupportedVersion);
        }

        self.method = String::from_utf8_lossy(&line[..method_end]).into_owned();
        self.target = String::from_utf8_lossy(&rest[..target_end]).into_owned();
        self.state = State::ReadingHeader;

        Ok(())
    }

    fn process_header_line(&mut self) -> Result<(), HandshakeError> {
        if self.buf.is_empty() {
            return self.finish_headers();
        }

        self.state = State::CheckingHeaderContinuation;
        Ok(())
    }

    fn check_continuation(&mut self, byte: u8) -> Result<usize, HandshakeError> {
        if byte == b' ' {
            // Folded header: the space stays in the line and reading resumes
            self.state = State::ReadingHeader;
            return Ok(0);
        }

        self.process_header()?;
        self.buf.clear();
        self.state = State::ReadingHeader;
        Ok(0)
    }

    fn process_header(&mut self) -> Result<(), HandshakeError> {
        if !self.buf.contains(&b':') {
            return Err(HandshakeError::Invalid("Invalid HTTP request received"));
        }

        if self.buf.len() < KEY_HEADER.len()
            || !self.buf[..KEY_HEADER.len()].eq_ignore_ascii_case(KEY_HEADER)
        {
            return Ok(());
        }

        if self.key.is_some() {
            return Err(HandshakeError::Invalid(
                "Client sent a WebSocket header with multiple Sec-WebSocket-Key headers",
            ));
        }

        self.key = Some(trim_whitespace(&self.buf[KEY_HEADER.len()..]).to_vec());
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), HandshakeError> {
        let key = self.key.take().ok_or(HandshakeError::Invalid(
            "Client sent a WebSocket header without a Sec-WebSocket-Key header",
        ))?;

        let mut hasher = Sha1::new();
        hasher.update(&key);
        hasher.update(WS_KEY_GUID.as_bytes());
        let digest = hasher.finalize();

        let mut hash = [0u8; KEY_HASH_LEN];
        hash.copy_from_slice(&digest);
        self.key_hash = Some(hash);
        self.state = State::Done;

        Ok(())
    }
}

fn trim_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

impl Default for HandshakeParser {
    fn default() -> Self {
        Self::new()
    }
}
