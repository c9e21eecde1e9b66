//! Network-side state of one player's session.
//!
//! A [`Connection`] does no I/O itself. The worker hands it the bytes read
//! from the watch stream and asks it for the commands waiting to be sent.
//! Everything it learns is announced through its event signal, which runs
//! listeners on the worker thread with the connection lock held.

use crate::chunked::{parse_response_head, ChunkedDecoder, ResponseHead};
use crate::error::ClientError;
use log::{debug, info, warn};
use shared::handshake::{accept_token, key_hash};
use shared::wire::Frame;
use shared::{ConnectionEvent, ListenerId, PlayerFlags, Request, Signal, TileBitset};
use std::collections::VecDeque;

/// Progress of the conversation as seen from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHeader,
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Shout,
    Turn,
    MoveTile { tile: usize, x: i32, y: i32 },
    SendMessage(String),
    Leave,
}

impl Command {
    fn into_request(self, id: u64) -> Request {
        match self {
            Command::Shout => Request::Shout { id },
            Command::Turn => Request::Turn { id },
            Command::MoveTile { tile, x, y } => Request::MoveTile { id, tile, x, y },
            Command::SendMessage(text) => Request::SendMessage { id, text },
            Command::Leave => Request::Leave { id },
        }
    }
}

/// Decoding state of the watch stream currently attached.
struct Stream {
    expected_accept: String,
    head: Vec<u8>,
    head_done: bool,
    decoder: ChunkedDecoder,
}

impl Stream {
    fn new(key: &str) -> Self {
        Self {
            expected_accept: accept_token(&key_hash(key)),
            head: Vec::new(),
            head_done: false,
            decoder: ChunkedDecoder::new(),
        }
    }

    fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, ClientError> {
        let payloads = if self.head_done {
            self.decoder.feed(data)?
        } else {
            self.head.extend_from_slice(data);
            let Some((head, used)) = parse_response_head(&self.head)? else {
                return Ok(Vec::new());
            };
            self.check_head(&head)?;
            self.head_done = true;

            let rest = self.head.split_off(used);
            self.head.clear();
            self.decoder.feed(&rest)?
        };

        payloads
            .iter()
            .map(|payload| Frame::decode(payload).map_err(ClientError::from))
            .collect()
    }

    fn check_head(&self, head: &ResponseHead) -> Result<(), ClientError> {
        if head.status != 200 {
            return Err(ClientError::Protocol(format!(
                "server answered with status {}",
                head.status
            )));
        }
        if head.accept.as_deref() != Some(self.expected_accept.as_str()) {
            return Err(ClientError::Protocol(
                "Sec-WebSocket-Accept does not match the key".to_string(),
            ));
        }
        if !head.chunked {
            return Err(ClientError::Protocol("response is not chunked".to_string()));
        }
        Ok(())
    }
}

pub struct Connection {
    room: String,
    player_name: String,

    person_id: Option<u64>,
    self_num: Option<usize>,
    next_message: usize,
    state: ConnectionState,
    running: bool,
    known_tiles: TileBitset,

    pending: VecDeque<Command>,
    stream: Option<Stream>,
    event_signal: Signal<ConnectionEvent>,
}

impl Connection {
    pub fn new(room: &str, player_name: &str) -> Self {
        Self {
            room: room.to_string(),
            player_name: player_name.to_string(),
            person_id: None,
            self_num: None,
            next_message: 0,
            state: ConnectionState::AwaitingHeader,
            running: false,
            known_tiles: TileBitset::new(),
            pending: VecDeque::new(),
            stream: None,
            event_signal: Signal::new(),
        }
    }

    pub fn person_id(&self) -> Option<u64> {
        self.person_id
    }

    pub fn self_num(&self) -> Option<usize> {
        self.self_num
    }

    /// Number of chat messages received so far, which is also the index to
    /// resume from.
    pub fn next_message(&self) -> usize {
        self.next_message
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the server has ended the conversation.
    pub fn is_finished(&self) -> bool {
        self.state == ConnectionState::Done
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ConnectionEvent) + Send + 'static,
    {
        self.event_signal.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.event_signal.unsubscribe(id)
    }

    pub fn shout(&mut self) {
        self.queue_command(Command::Shout);
    }

    pub fn turn(&mut self) {
        self.queue_command(Command::Turn);
    }

    pub fn move_tile(&mut self, tile: usize, x: i32, y: i32) {
        self.queue_command(Command::MoveTile { tile, x, y });
    }

    pub fn send_message(&mut self, text: &str) {
        self.queue_command(Command::SendMessage(text.to_string()));
    }

    pub fn leave(&mut self) {
        self.queue_command(Command::Leave);
    }

    fn queue_command(&mut self, command: Command) {
        debug!("Queueing command {:?}", command);
        self.pending.push_back(command);
        self.emit_event(ConnectionEvent::PollChanged);
    }

    /// Starts a new watch stream using the given handshake key and returns
    /// the request to send on it.
    pub fn begin_stream(&mut self, key: &str) -> Request {
        self.stream = Some(Stream::new(key));
        self.set_running(true);

        match self.person_id {
            Some(id) => Request::WatchPerson {
                id,
                last_message: self.next_message,
            },
            None => Request::NewPerson {
                room: self.room.clone(),
                name: self.player_name.clone(),
            },
        }
    }

    /// Feeds bytes read from the watch stream.
    pub fn handle_stream_data(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ClientError::Protocol("no stream attached".to_string()))?;

        for frame in stream.feed(data)? {
            self.handle_frame(frame);
        }

        Ok(())
    }

    /// Takes the queued commands as requests. Commands stay queued until
    /// the server has told us our person id.
    pub fn take_commands(&mut self) -> Vec<Request> {
        let Some(id) = self.person_id else {
            return Vec::new();
        };

        self.pending
            .drain(..)
            .map(|command| command.into_request(id))
            .collect()
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        if self.running != running {
            self.running = running;
            self.emit_event(ConnectionEvent::RunningStateChanged { running });
        }
    }

    /// Drops the stream after a failure and reports it.
    pub(crate) fn report_error(&mut self, message: String) {
        warn!("Connection error: {}", message);
        self.stream = None;
        self.emit_event(ConnectionEvent::Error { message });
        self.set_running(false);
    }

    pub(crate) fn emit_event(&mut self, event: ConnectionEvent) {
        self.event_signal.emit(&event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.emit_event(ConnectionEvent::StateChanged);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Header { num, id } => {
                if self.person_id.is_none() {
                    info!("Joined as player {} with id {:016X}", num, id);
                }
                self.person_id = Some(id);
                self.self_num = Some(num);
                self.emit_event(ConnectionEvent::Header { self_num: num });
                self.set_state(ConnectionState::InProgress);
                if !self.pending.is_empty() {
                    self.emit_event(ConnectionEvent::PollChanged);
                }
            }
            Frame::PlayerName { num, name } => {
                self.emit_event(ConnectionEvent::PlayerNameChanged {
                    player_num: num,
                    name,
                });
            }
            Frame::Player {
                num,
                connected,
                typing,
            } => {
                self.emit_event(ConnectionEvent::PlayerFlagsChanged {
                    player_num: num,
                    flags: PlayerFlags::from_status(connected, typing),
                });
            }
            Frame::Message { person, text } => {
                self.next_message += 1;
                self.emit_event(ConnectionEvent::Message {
                    player: person,
                    text,
                });
            }
            Frame::Shout { num, shouting } => {
                self.emit_event(ConnectionEvent::PlayerShoutingChanged {
                    player_num: num,
                    shouting,
                });
            }
            Frame::Tile {
                num,
                x,
                y,
                letter,
                last_player,
            } => {
                if num >= TileBitset::CAPACITY {
                    warn!("Ignoring tile {} beyond the tile limit", num);
                    return;
                }
                let new_tile = !self.known_tiles.get(num);
                self.known_tiles.set(num, true);
                self.emit_event(ConnectionEvent::TileChanged {
                    num,
                    x,
                    y,
                    letter,
                    last_player_moved: last_player,
                    new_tile,
                });
            }
            Frame::End => {
                info!("Conversation finished");
                self.set_state(ConnectionState::Done);
                self.set_running(false);
            }
            Frame::Padding => {}
            Frame::Unknown(tag) => {
                debug!("Ignoring unknown frame '{}'", tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shared::wire;
    use std::sync::Arc;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn recorder(connection: &mut Connection) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        connection.subscribe(move |event| sink.lock().push(event.clone()));
        events
    }

    fn head() -> Vec<u8> {
        format!(
            "HTTP/1.1 200 OK\r\nSec-WebSocket-Accept: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
            accept_token(&key_hash(KEY))
        )
        .into_bytes()
    }

    fn chunk(payload: &str) -> Vec<u8> {
        wire::chunk_frame(payload.as_bytes())
    }

    #[test]
    fn test_first_stream_joins_room() {
        let mut connection = Connection::new("lobby", "Ann");
        let events = recorder(&mut connection);

        let request = connection.begin_stream(KEY);
        assert_eq!(
            request,
            Request::NewPerson {
                room: "lobby".to_string(),
                name: "Ann".to_string()
            }
        );
        assert!(connection.is_running());
        assert_eq!(
            *events.lock(),
            vec![ConnectionEvent::RunningStateChanged { running: true }]
        );
    }

    #[test]
    fn test_frames_become_events() {
        let mut connection = Connection::new("lobby", "Ann");
        connection.begin_stream(KEY);
        let events = recorder(&mut connection);

        let mut data = head();
        data.extend(chunk(wire::PADDING_PAYLOADS[0]));
        data.extend(chunk(&wire::render_header(1, 0xABCD)));
        data.extend(chunk(&wire::render_player_name(0, "Bob")));
        data.extend(chunk(&wire::render_player(0, true, true)));
        data.extend(chunk(&wire::render_message(0, "hi")));
        data.extend(chunk(&wire::render_shout(0, true)));
        data.extend(chunk(&wire::render_tile(5, 20, 40, 'A', None)));
        data.extend(chunk(&wire::render_tile(5, 60, 40, 'A', Some(1))));
        data.extend(chunk("[\"future-frame\", {}]\r\n"));

        connection.handle_stream_data(&data).unwrap();

        assert_eq!(connection.person_id(), Some(0xABCD));
        assert_eq!(connection.self_num(), Some(1));
        assert_eq!(connection.next_message(), 1);
        assert_eq!(connection.state(), ConnectionState::InProgress);
        assert_eq!(
            *events.lock(),
            vec![
                ConnectionEvent::Header { self_num: 1 },
                ConnectionEvent::StateChanged,
                ConnectionEvent::PlayerNameChanged {
                    player_num: 0,
                    name: "Bob".to_string()
                },
                ConnectionEvent::PlayerFlagsChanged {
                    player_num: 0,
                    flags: PlayerFlags::CONNECTED | PlayerFlags::TYPING
                },
                ConnectionEvent::Message {
                    player: 0,
                    text: "hi".to_string()
                },
                ConnectionEvent::PlayerShoutingChanged {
                    player_num: 0,
                    shouting: true
                },
                ConnectionEvent::TileChanged {
                    num: 5,
                    x: 20,
                    y: 40,
                    letter: 'A',
                    last_player_moved: None,
                    new_tile: true
                },
                ConnectionEvent::TileChanged {
                    num: 5,
                    x: 60,
                    y: 40,
                    letter: 'A',
                    last_player_moved: Some(1),
                    new_tile: false
                },
            ]
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut whole = Connection::new("lobby", "Ann");
        whole.begin_stream(KEY);
        let whole_events = recorder(&mut whole);

        let mut split = Connection::new("lobby", "Ann");
        split.begin_stream(KEY);
        let split_events = recorder(&mut split);

        let mut data = head();
        data.extend(chunk(&wire::render_header(0, 7)));
        data.extend(chunk(&wire::render_message(0, "a \"quoted\" line")));
        data.extend_from_slice(wire::END_CHUNK);

        whole.handle_stream_data(&data).unwrap();
        for byte in &data {
            split.handle_stream_data(std::slice::from_ref(byte)).unwrap();
        }

        assert_eq!(*whole_events.lock(), *split_events.lock());
        assert!(split.is_finished());
    }

    #[test]
    fn test_end_stops_running() {
        let mut connection = Connection::new("lobby", "Ann");
        connection.begin_stream(KEY);
        let events = recorder(&mut connection);

        let mut data = head();
        data.extend(chunk(&wire::render_header(0, 7)));
        data.extend_from_slice(wire::END_CHUNK);
        connection.handle_stream_data(&data).unwrap();

        assert!(connection.is_finished());
        assert!(!connection.is_running());
        assert_eq!(
            events.lock().last(),
            Some(&ConnectionEvent::RunningStateChanged { running: false })
        );
    }

    #[test]
    fn test_bad_accept_is_rejected() {
        let mut connection = Connection::new("lobby", "Ann");
        connection.begin_stream("some other key");

        assert!(matches!(
            connection.handle_stream_data(&head()),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_error_status_is_rejected() {
        let mut connection = Connection::new("lobby", "Ann");
        connection.begin_stream(KEY);

        let result = connection.handle_stream_data(b"HTTP/1.1 404 Not Found\r\n\r\n");
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_data_without_stream() {
        let mut connection = Connection::new("lobby", "Ann");
        assert!(connection.handle_stream_data(b"x").is_err());
    }

    #[test]
    fn test_commands_wait_for_person_id() {
        let mut connection = Connection::new("lobby", "Ann");
        let events = recorder(&mut connection);

        connection.shout();
        connection.move_tile(3, 10, -20);
        assert_eq!(
            *events.lock(),
            vec![ConnectionEvent::PollChanged, ConnectionEvent::PollChanged]
        );
        assert!(connection.take_commands().is_empty());
        assert_eq!(connection.pending_commands(), 2);

        connection.begin_stream(KEY);
        let mut data = head();
        data.extend(chunk(&wire::render_header(2, 0x42)));
        connection.handle_stream_data(&data).unwrap();
        assert_eq!(events.lock().last(), Some(&ConnectionEvent::PollChanged));

        connection.turn();
        connection.send_message("hello");
        connection.leave();

        assert_eq!(
            connection.take_commands(),
            vec![
                Request::Shout { id: 0x42 },
                Request::MoveTile {
                    id: 0x42,
                    tile: 3,
                    x: 10,
                    y: -20
                },
                Request::Turn { id: 0x42 },
                Request::SendMessage {
                    id: 0x42,
                    text: "hello".to_string()
                },
                Request::Leave { id: 0x42 },
            ]
        );
        assert_eq!(connection.pending_commands(), 0);
    }

    #[test]
    fn test_reconnect_resumes_from_last_message() {
        let mut connection = Connection::new("lobby", "Ann");
        connection.begin_stream(KEY);

        let mut data = head();
        data.extend(chunk(&wire::render_header(0, 0x99)));
        data.extend(chunk(&wire::render_message(0, "one")));
        data.extend(chunk(&wire::render_message(0, "two")));
        connection.handle_stream_data(&data).unwrap();

        let events = recorder(&mut connection);
        connection.report_error("connection reset".to_string());
        assert!(!connection.is_running());
        assert_eq!(
            *events.lock(),
            vec![
                ConnectionEvent::Error {
                    message: "connection reset".to_string()
                },
                ConnectionEvent::RunningStateChanged { running: false },
            ]
        );

        assert_eq!(
            connection.begin_stream(KEY),
            Request::WatchPerson {
                id: 0x99,
                last_message: 2
            }
        );
    }

    #[test]
    fn test_unsubscribe() {
        let mut connection = Connection::new("lobby", "Ann");
        let id = connection.subscribe(|_| {});
        assert!(connection.unsubscribe(id));
        assert!(!connection.unsubscribe(id));
    }
}
