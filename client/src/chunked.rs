//! Decoding of the server's HTTP response: the head and a chunked body.

use crate::error::ClientError;

/// Largest response head the client accepts.
const MAX_HEAD_LENGTH: usize = 8192;

/// Longest chunk-size line, extensions included.
const MAX_SIZE_LINE: usize = 64;

/// Status line and the headers the client cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub accept: Option<String>,
    pub chunked: bool,
}

/// Parses a response head from the start of `data`.
///
/// Returns `Ok(None)` until the blank line ending the head has arrived,
/// otherwise the head and the number of bytes it used.
pub fn parse_response_head(data: &[u8]) -> Result<Option<(ResponseHead, usize)>, ClientError> {
    let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
        if data.len() > MAX_HEAD_LENGTH {
            return Err(ClientError::Protocol("response head too long".to_string()));
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&data[..end])
        .map_err(|_| ClientError::Protocol("response head is not UTF-8".to_string()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ClientError::Protocol(format!(
            "bad status line '{}'",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ClientError::Protocol(format!("bad status line '{}'", status_line)))?;

    let mut accept = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("sec-websocket-accept") {
            accept = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.eq_ignore_ascii_case("chunked");
        }
    }

    Ok(Some((
        ResponseHead {
            status,
            accept,
            chunked,
        },
        end + 4,
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Size,
    Data(usize),
    DataCr,
    DataLf,
    Trailer,
    Done,
}

/// Incremental decoder for a chunked body. Each complete chunk is returned
/// as one payload.
pub struct ChunkedDecoder {
    state: DecodeState,
    line: Vec<u8>,
    chunk: Vec<u8>,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Size,
            line: Vec::new(),
            chunk: Vec::new(),
        }
    }

    /// Whether the terminating zero-length chunk has been seen.
    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Vec<u8>>, ClientError> {
        let mut payloads = Vec::new();

        while !data.is_empty() {
            match self.state {
                DecodeState::Size | DecodeState::Trailer => {
                    let Some(newline) = data.iter().position(|&b| b == b'\n') else {
                        self.push_line(data)?;
                        break;
                    };
                    self.push_line(&data[..newline])?;
                    data = &data[newline + 1..];

                    let line = std::mem::take(&mut self.line);
                    let line = line.strip_suffix(b"\r").unwrap_or(&line);

                    if self.state == DecodeState::Trailer {
                        if line.is_empty() {
                            self.state = DecodeState::Done;
                        }
                        continue;
                    }

                    let size = parse_size(line)?;
                    self.state = if size == 0 {
                        DecodeState::Trailer
                    } else {
                        DecodeState::Data(size)
                    };
                }
                DecodeState::Data(remaining) => {
                    let n = remaining.min(data.len());
                    self.chunk.extend_from_slice(&data[..n]);
                    data = &data[n..];
                    self.state = if n == remaining {
                        DecodeState::DataCr
                    } else {
                        DecodeState::Data(remaining - n)
                    };
                }
                DecodeState::DataCr => {
                    self.expect_byte(data[0], b'\r')?;
                    data = &data[1..];
                    self.state = DecodeState::DataLf;
                }
                DecodeState::DataLf => {
                    self.expect_byte(data[0], b'\n')?;
                    data = &data[1..];
                    payloads.push(std::mem::take(&mut self.chunk));
                    self.state = DecodeState::Size;
                }
                DecodeState::Done => break,
            }
        }

        Ok(payloads)
    }

    fn push_line(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        if self.line.len() + bytes.len() > MAX_SIZE_LINE {
            return Err(ClientError::Protocol("chunk size line too long".to_string()));
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    fn expect_byte(&self, byte: u8, expected: u8) -> Result<(), ClientError> {
        if byte == expected {
            Ok(())
        } else {
            Err(ClientError::Protocol("chunk not followed by CRLF".to_string()))
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_size(line: &[u8]) -> Result<usize, ClientError> {
    let digits = line.split(|&b| b == b';').next().unwrap_or_default();
    let digits = std::str::from_utf8(digits)
        .map_err(|_| ClientError::Protocol("bad chunk size".to_string()))?
        .trim();

    if digits.is_empty() || digits.len() > 8 {
        return Err(ClientError::Protocol(format!("bad chunk size '{}'", digits)));
    }

    usize::from_str_radix(digits, 16)
        .map_err(|_| ClientError::Protocol(format!("bad chunk size '{}'", digits)))
}
