//! Chunk payloads streamed from the server to the client.
//!
//! Every payload is a single JSON array terminated by CRLF, for example
//! `["player", {"num": 1, "connected": true, "typing": false}]`. The server
//! renders payloads with the `render_*` functions below and wraps each one in
//! HTTP chunked framing; the client decodes them back into a [`Frame`].
//!
//! The rendering is done by hand rather than through `serde_json` so that the
//! byte layout (spacing, key order, escaping) stays exactly what existing
//! clients expect.

use serde::Deserialize;
use serde_json::Value;

/// Final chunk of a watch stream: the `end` payload followed by the
/// zero-length chunk that terminates the chunked body.
pub const END_CHUNK: &[u8] = b"9\r\n[\"end\"]\r\n\r\n0\r\n\r\n";

/// Payloads sent right after the HTTP header of a watch stream. Some browsers
/// only hand data to scripts after roughly 1KB has arrived.
pub const PADDING_PAYLOADS: [&str; 4] = [
    "[\"padding\", \"This padding is here because it seems that for some reason \
some browsers don't notify Javascript that there is a new chunk of data \
until at least 1024 bytes of the response are received. Just think of all \
those wasted bytes! It's sad.\"]\r\n",
    "[\"padding\", \"Here's a joke to pass the while this padding is being \
downloaded. Why is a giraffe never alone? Because it has a long neck. \
It's not very funny. I apologise for that. Why are you reading this anyway? \
Don't you have anything better to do?\"]\r\n",
    "[\"padding\", \"Ĉi tiuj plenumiloj estas ĉi tie ĉar ŝajne ial iuj retumiloj \
ne informas na Javascript ke nova datumoj alvenis ĝis almenaŭ 1024 bajtoj \
da la respondo reciviĝas. Pensu pri tiu malŝparo de bajtoj! Tio estas \
tristiga.\"]\r\n",
    "[\"padding\", \"Jen ŝerco por pasigi la tempon dum ĉi tiu malŝparo \
elŝutas. Kial girafo neniam solas? Ĉar ĝi havas kolegon. Ĝi estas bona \
ŝerco ĉu ne? Mi ŝatas ĝin ĉar ĝi ne havas sencon en la angla. Do jen la \
fino kaj nun povas komenci la veraj datumoj. Ĝuu!\"]\r\n",
];

/// Chunk-size line for a payload of `len` bytes.
pub fn chunk_prefix(len: usize) -> String {
    format!("{:x}\r\n", len)
}

/// Wraps a payload in a complete chunk: size line, payload, CRLF.
pub fn chunk_frame(payload: &[u8]) -> Vec<u8> {
    let prefix = chunk_prefix(payload.len());
    let mut out = Vec::with_capacity(prefix.len() + payload.len() + 2);
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// Escapes text for a JSON string literal.
///
/// Control characters and whitespace collapse to a single space each, so the
/// result never contains a line break. Quotes and backslashes are escaped.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            c if c <= ' ' => out.push(' '),
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

pub fn render_header(num: usize, id: u64) -> String {
    format!("[\"header\", {{\"num\": {}, \"id\": \"{:016X}\"}}]\r\n", num, id)
}

pub fn render_player(num: usize, connected: bool, typing: bool) -> String {
    format!(
        "[\"player\", {{\"num\": {}, \"connected\": {}, \"typing\": {}}}]\r\n",
        num, connected, typing
    )
}

pub fn render_player_name(num: usize, name: &str) -> String {
    format!(
        "[\"player-name\", {{\"num\": {}, \"name\": \"{}\"}}]\r\n",
        num,
        escape_text(name)
    )
}

pub fn render_message(person: usize, text: &str) -> String {
    format!(
        "[\"message\", {{\"person\": {}, \"text\": \"{}\"}}]\r\n",
        person,
        escape_text(text)
    )
}

pub fn render_shout(num: usize, shouting: bool) -> String {
    format!(
        "[\"shout\", {{\"num\": {}, \"shouting\": {}}}]\r\n",
        num, shouting
    )
}

pub fn render_tile(num: usize, x: i32, y: i32, letter: char, last_player: Option<usize>) -> String {
    let last_player = match last_player {
        Some(player) => player.to_string(),
        None => "null".to_string(),
    };
    format!(
        "[\"tile\", {{\"num\": {}, \"x\": {}, \"y\": {}, \"letter\": \"{}\", \"last-player\": {}}}]\r\n",
        num,
        x,
        y,
        escape_text(&letter.to_string()),
        last_player
    )
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a tagged array")]
    NotTagged,
    #[error("frame '{0}' has no payload object")]
    MissingPayload(String),
    #[error("invalid person id '{0}'")]
    BadId(String),
    #[error("invalid tile letter '{0}'")]
    BadLetter(String),
}

/// A decoded chunk payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Header {
        num: usize,
        id: u64,
    },
    PlayerName {
        num: usize,
        name: String,
    },
    Player {
        num: usize,
        connected: bool,
        typing: bool,
    },
    Message {
        person: usize,
        text: String,
    },
    Shout {
        num: usize,
        shouting: bool,
    },
    Tile {
        num: usize,
        x: i32,
        y: i32,
        letter: char,
        last_player: Option<usize>,
    },
    End,
    Padding,
    /// A frame with a tag this version does not know about.
    Unknown(String),
}

#[derive(Deserialize)]
struct HeaderPayload {
    num: usize,
    id: String,
}

#[derive(Deserialize)]
struct PlayerNamePayload {
    num: usize,
    name: String,
}

#[derive(Deserialize)]
struct PlayerPayload {
    num: usize,
    connected: bool,
    typing: bool,
}

#[derive(Deserialize)]
struct MessagePayload {
    person: usize,
    text: String,
}

#[derive(Deserialize)]
struct ShoutPayload {
    num: usize,
    shouting: bool,
}

#[derive(Deserialize)]
struct TilePayload {
    num: usize,
    x: i32,
    y: i32,
    letter: String,
    #[serde(rename = "last-player")]
    last_player: Option<usize>,
}

impl Frame {
    pub fn decode(payload: &[u8]) -> Result<Frame, FrameError> {
        let value: Value = serde_json::from_slice(payload)?;
        let mut items = match value {
            Value::Array(items) => items.into_iter(),
            _ => return Err(FrameError::NotTagged),
        };
        let tag = match items.next() {
            Some(Value::String(tag)) => tag,
            _ => return Err(FrameError::NotTagged),
        };

        match tag.as_str() {
            "end" => return Ok(Frame::End),
            "padding" => return Ok(Frame::Padding),
            "header" | "player-name" | "player" | "message" | "shout" | "tile" => {}
            _ => return Ok(Frame::Unknown(tag)),
        }

        let body = items
            .next()
            .ok_or_else(|| FrameError::MissingPayload(tag.clone()))?;

        let frame = match tag.as_str() {
            "header" => {
                let p: HeaderPayload = serde_json::from_value(body)?;
                let id = u64::from_str_radix(&p.id, 16).map_err(|_| FrameError::BadId(p.id))?;
                Frame::Header { num: p.num, id }
            }
            "player-name" => {
                let p: PlayerNamePayload = serde_json::from_value(body)?;
                Frame::PlayerName {
                    num: p.num,
                    name: p.name,
                }
            }
            "player" => {
                let p: PlayerPayload = serde_json::from_value(body)?;
                Frame::Player {
                    num: p.num,
                    connected: p.connected,
                    typing: p.typing,
                }
            }
            "message" => {
                let p: MessagePayload = serde_json::from_value(body)?;
                Frame::Message {
                    person: p.person,
                    text: p.text,
                }
            }
            "shout" => {
                let p: ShoutPayload = serde_json::from_value(body)?;
                Frame::Shout {
                    num: p.num,
                    shouting: p.shouting,
                }
            }
            _ => {
                let p: TilePayload = serde_json::from_value(body)?;
                let mut chars = p.letter.chars();
                let letter = match (chars.next(), chars.next()) {
                    (Some(letter), None) => letter,
                    _ => return Err(FrameError::BadLetter(p.letter)),
                };
                Frame::Tile {
                    num: p.num,
                    x: p.x,
                    y: p.y,
                    letter,
                    last_player: p.last_player,
                }
            }
        };

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_chunk_sizes() {
        let sizes: Vec<String> = PADDING_PAYLOADS
            .iter()
            .map(|p| chunk_prefix(p.len()))
            .collect();
        assert_eq!(sizes, vec!["fb\r\n", "fe\r\n", "ee\r\n", "112\r\n"]);
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("hi\"there"), "hi\\\"there");
        assert_eq!(escape_text("a\\b"), "a\\\\b");
        assert_eq!(escape_text("line\nbreak\ttab"), "line break tab");
        assert_eq!(escape_text("ĉu ne?"), "ĉu ne?");
    }

    #[test]
    fn test_render_message_layout() {
        assert_eq!(
            render_message(0, "hi\"there"),
            "[\"message\", {\"person\": 0, \"text\": \"hi\\\"there\"}]\r\n"
        );
    }

    #[test]
    fn test_render_header_uses_uppercase_hex() {
        assert_eq!(
            render_header(2, 0xdead_beef),
            "[\"header\", {\"num\": 2, \"id\": \"00000000DEADBEEF\"}]\r\n"
        );
    }

    #[test]
    fn test_chunk_frame() {
        assert_eq!(chunk_frame(b"[\"end\"]\r\n"), b"9\r\n[\"end\"]\r\n\r\n".to_vec());
        assert!(END_CHUNK.starts_with(&chunk_frame(b"[\"end\"]\r\n")));
    }

    #[test]
    fn test_decode_rendered_frames() {
        assert_eq!(
            Frame::decode(render_header(1, 0x0123_4567_89ab_cdef).as_bytes()).unwrap(),
            Frame::Header {
                num: 1,
                id: 0x0123_4567_89ab_cdef
            }
        );
        assert_eq!(
            Frame::decode(render_player(3, true, false).as_bytes()).unwrap(),
            Frame::Player {
                num: 3,
                connected: true,
                typing: false
            }
        );
        assert_eq!(
            Frame::decode(render_message(0, "a \"quoted\" \\ text").as_bytes()).unwrap(),
            Frame::Message {
                person: 0,
                text: "a \"quoted\" \\ text".to_string()
            }
        );
        assert_eq!(
            Frame::decode(render_tile(7, -20, 40, 'Ŝ', Some(2)).as_bytes()).unwrap(),
            Frame::Tile {
                num: 7,
                x: -20,
                y: 40,
                letter: 'Ŝ',
                last_player: Some(2)
            }
        );
        assert_eq!(
            Frame::decode(render_tile(0, 0, 0, 'A', None).as_bytes()).unwrap(),
            Frame::Tile {
                num: 0,
                x: 0,
                y: 0,
                letter: 'A',
                last_player: None
            }
        );
    }

    #[test]
    fn test_decode_special_frames() {
        assert_eq!(Frame::decode(b"[\"end\"]\r\n").unwrap(), Frame::End);
        assert_eq!(
            Frame::decode(PADDING_PAYLOADS[2].as_bytes()).unwrap(),
            Frame::Padding
        );
        assert_eq!(
            Frame::decode(b"[\"sync\", {}]").unwrap(),
            Frame::Unknown("sync".to_string())
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(Frame::decode(b"{}"), Err(FrameError::NotTagged)));
        assert!(matches!(Frame::decode(b"[1]"), Err(FrameError::NotTagged)));
        assert!(matches!(
            Frame::decode(b"[\"player\"]"),
            Err(FrameError::MissingPayload(_))
        ));
        assert!(matches!(
            Frame::decode(b"[\"header\", {\"num\": 0, \"id\": \"xyz\"}]"),
            Err(FrameError::BadId(_))
        ));
        assert!(matches!(Frame::decode(b"[\"player\", "), Err(FrameError::Json(_))));
    }
}
