//! Byte producers for HTTP responses.
//!
//! A [`Response`] fills caller-supplied buffers of any size and keeps enough
//! state to continue where it left off on the next call. The connection task
//! in `network` pulls bytes from a response and writes them to the socket;
//! responses never touch the socket themselves.

use shared::handshake::{accept_token, KeyHash};
use shared::wire;
use std::sync::Arc;
use tokio::sync::Notify;

/// Headers sent with every response.
pub const COMMON_HEADERS: &str = "Cache-Control: no-cache\r\n\
Connection: close\r\n\
Access-Control-Allow-Origin: *\r\n";

pub trait Response: Send {
    /// Writes as many bytes as fit into `buf` and returns how many were
    /// written. Returns 0 when the response is finished or is waiting for
    /// more data.
    fn add_data(&mut self, buf: &mut [u8]) -> usize;

    fn is_finished(&self) -> bool;

    /// Whether a call to [`Response::add_data`] would produce bytes now.
    fn has_pending_data(&self) -> bool;

    /// Notification raised whenever the response may have gained data.
    /// Responses that are complete from the start have none.
    fn changed(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Write cursor over a caller-supplied output buffer.
pub struct OutBuf<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> OutBuf<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn written(&self) -> usize {
        self.len
    }

    /// Copies as much of `data` as fits and returns the number of bytes
    /// copied.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }
}

/// Continues writing `message` from `*pos`. Returns true once the whole
/// message has been written.
pub fn write_message(out: &mut OutBuf<'_>, pos: &mut usize, message: &[u8]) -> bool {
    if *pos < message.len() {
        *pos += out.push(&message[*pos..]);
    }
    *pos >= message.len()
}

/// Continues writing `payload` wrapped in chunked framing.
///
/// The size line, the payload and the trailing CRLF are treated as one
/// continuous message so `*pos` counts bytes from the start of the size
/// line. Returns true once the trailing CRLF has been written.
pub fn write_chunked_message(out: &mut OutBuf<'_>, pos: &mut usize, payload: &[u8]) -> bool {
    let prefix = wire::chunk_prefix(payload.len());
    let zones: [&[u8]; 3] = [prefix.as_bytes(), payload, b"\r\n"];

    let mut zone_start = 0;
    for zone in zones {
        let zone_end = zone_start + zone.len();

        if *pos < zone_end {
            *pos += out.push(&zone[*pos - zone_start..]);
            if *pos < zone_end {
                return false;
            }
        }

        zone_start = zone_end;
    }

    true
}

/// Status line and headers of a response, up to and including the blank
/// line. `extra` is inserted verbatim before the blank line.
pub fn http_header(status: &str, key_hash: Option<&KeyHash>, extra: &str) -> String {
    let mut header = format!("HTTP/1.1 {}\r\n{}", status, COMMON_HEADERS);
    if let Some(hash) = key_hash {
        header.push_str("Sec-WebSocket-Accept: ");
        header.push_str(&accept_token(hash));
        header.push_str("\r\n");
    }
    header.push_str(extra);
    header.push_str("\r\n");
    header
}

/// A response whose bytes are all known when it is created.
pub struct FixedResponse {
    data: Vec<u8>,
    pos: usize,
}

impl FixedResponse {
    pub fn new(status: &str, key_hash: Option<&KeyHash>, body: &str) -> Self {
        let extra = format!(
            "Content-Type: text/plain; charset=UTF-8\r\nContent-Length: {}\r\n",
            body.len()
        );
        let mut data = http_header(status, key_hash, &extra).into_bytes();
        data.extend_from_slice(body.as_bytes());

        Self { data, pos: 0 }
    }

    pub fn ok(key_hash: Option<&KeyHash>) -> Self {
        Self::new("200 OK", key_hash, "ok\n")
    }

    pub fn bad_request(key_hash: Option<&KeyHash>) -> Self {
        Self::new("400 Bad Request", key_hash, "bad request\n")
    }

    pub fn not_found(key_hash: Option<&KeyHash>) -> Self {
        Self::new("404 Not Found", key_hash, "not found\n")
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Response for FixedResponse {
    fn add_data(&mut self, buf: &mut [u8]) -> usize {
        let mut out = OutBuf::new(buf);
        write_message(&mut out, &mut self.pos, &self.data);
        out.written()
    }

    fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn has_pending_data(&self) -> bool {
        !self.is_finished()
    }
}
