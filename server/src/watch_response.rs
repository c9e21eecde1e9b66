//! Long-lived chunked response that streams a conversation to one person.
//!
//! After the HTTP header and the padding chunks, the response sends a
//! `header` frame naming the person's player number and id. From then on it
//! sits in `AwaitingData` and, whenever the caller offers buffer space, picks
//! the next frame to send in a fixed priority order:
//!
//! 1. the name of a player that has not been announced yet
//! 2. the status of a player whose dirty bit is set (lowest index first)
//! 3. the next chat message
//! 4. the shouting state of a player whose shout bit is set
//! 5. the position of a tile whose dirty bit is set
//! 6. the `end` frame, once the watched player has left
//!
//! Dirty bits are set by listeners registered on the conversation's signals
//! and are cleared when a frame is selected, so a change that arrives while
//! that frame is still being written is sent again afterwards. Every frame is
//! fully rendered at selection time and then written with
//! [`write_chunked_message`], so output can stop and resume at any byte.

use crate::conversation::{Conversation, ConversationChange};
use crate::conversation_set::SharedConversation;
use crate::response::{http_header, write_chunked_message, write_message, OutBuf, Response};
use log::warn;
use parking_lot::Mutex;
use shared::handshake::KeyHash;
use shared::{wire, ListenerId, PlayerBitset, TileBitset};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WritingHttpHeader,
    WritingHeaderFrame,
    AwaitingData,
    WritingName,
    WritingPlayer,
    WritingMessages,
    WritingShout,
    WritingTile,
    WritingEnd,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextFrame {
    Name(usize),
    Player(usize),
    Message(usize),
    Shout(usize),
    Tile(usize),
    End,
}

#[derive(Default)]
struct Dirty {
    players: PlayerBitset,
    shouts: PlayerBitset,
    tiles: TileBitset,
}

/// State shared between the response and its signal listeners.
#[derive(Default)]
struct ResponseShared {
    dirty: Mutex<Dirty>,
    changed: Arc<Notify>,
}

impl ResponseShared {
    fn player_changed(&self, num: usize) {
        self.dirty.lock().players.set(num, true);
        self.changed.notify_one();
    }

    fn conversation_changed(&self, change: ConversationChange) {
        match change {
            ConversationChange::StateChanged | ConversationChange::MessageAdded => {}
            ConversationChange::TileChanged(num) => self.dirty.lock().tiles.set(num, true),
            ConversationChange::ShoutingChanged(num) => self.dirty.lock().shouts.set(num, true),
        }
        self.changed.notify_one();
    }
}

/// Listener registrations on a conversation, removed on drop.
///
/// Dropping takes the conversation lock, so a response must not be dropped
/// while that lock is held.
struct Listeners {
    conversation: SharedConversation,
    changed: ListenerId,
    player_changed: ListenerId,
}

impl Drop for Listeners {
    fn drop(&mut self) {
        let mut conversation = self.conversation.lock();

        if !conversation.changed_signal.unsubscribe(self.changed) {
            warn!("Watch response changed listener was already removed");
        }
        if !conversation
            .player_changed_signal
            .unsubscribe(self.player_changed)
        {
            warn!("Watch response player listener was already removed");
        }
    }
}

pub struct WatchPersonResponse {
    state: State,
    message_pos: usize,
    http_header: Vec<u8>,
    current_frame: Vec<u8>,
    player_num: usize,
    named_players: usize,
    message_num: usize,
    shared: Arc<ResponseShared>,
    listeners: Listeners,
}

impl WatchPersonResponse {
    /// Starts streaming `conversation` to player `player_num`. Chat messages
    /// before `last_message` are assumed to be known to the client already.
    pub fn new(
        conversation: SharedConversation,
        person_id: u64,
        player_num: usize,
        last_message: usize,
        key_hash: Option<&KeyHash>,
    ) -> Self {
        let shared = Arc::new(ResponseShared::default());

        let (changed, player_changed, message_num) = {
            let mut c = conversation.lock();

            {
                let mut dirty = shared.dirty.lock();
                dirty.players.set_range(c.players().len());
                dirty.tiles.set_range(c.tiles().len());
                if let Some(shouter) = c.shouting_player() {
                    dirty.shouts.set(shouter, true);
                }
            }

            let s = Arc::clone(&shared);
            let changed = c
                .changed_signal
                .subscribe(move |change| s.conversation_changed(*change));
            let s = Arc::clone(&shared);
            let player_changed = c
                .player_changed_signal
                .subscribe(move |num| s.player_changed(*num));

            (changed, player_changed, last_message.min(c.messages().len()))
        };

        let mut header = http_header(
            "200 OK",
            key_hash,
            "Content-Type: text/plain; charset=UTF-8\r\nTransfer-Encoding: chunked\r\n",
        )
        .into_bytes();
        for padding in wire::PADDING_PAYLOADS {
            header.extend_from_slice(&wire::chunk_frame(padding.as_bytes()));
        }

        Self {
            state: State::WritingHttpHeader,
            message_pos: 0,
            http_header: header,
            current_frame: wire::render_header(player_num, person_id).into_bytes(),
            player_num,
            named_players: 0,
            message_num,
            shared,
            listeners: Listeners {
                conversation,
                changed,
                player_changed,
            },
        }
    }

    /// Index of the next chat message that will be sent.
    pub fn message_num(&self) -> usize {
        self.message_num
    }

    fn next_frame(&self, conversation: &Conversation, dirty: &Dirty) -> Option<NextFrame> {
        let players = conversation.players();

        if self.named_players < players.len() {
            return Some(NextFrame::Name(self.named_players));
        }
        if let Some(num) = dirty.players.first_set().filter(|&n| n < players.len()) {
            return Some(NextFrame::Player(num));
        }
        if self.message_num < conversation.messages().len() {
            return Some(NextFrame::Message(self.message_num));
        }
        if let Some(num) = dirty.shouts.first_set() {
            return Some(NextFrame::Shout(num));
        }
        if let Some(num) = dirty.tiles.first_set().filter(|&n| n < conversation.tiles().len()) {
            return Some(NextFrame::Tile(num));
        }
        if !players.get(self.player_num).map_or(false, |p| p.connected) {
            return Some(NextFrame::End);
        }

        None
    }

    /// Picks the next frame, renders it into `current_frame` and clears the
    /// dirty bit it covers. Returns the state that writes it.
    fn select_frame(&mut self) -> Option<State> {
        let conversation = self.listeners.conversation.lock();
        let mut dirty = self.shared.dirty.lock();

        let state = match self.next_frame(&conversation, &dirty)? {
            NextFrame::Name(num) => {
                self.current_frame = conversation.players()[num].name_message().as_bytes().to_vec();
                self.named_players += 1;
                State::WritingName
            }
            NextFrame::Player(num) => {
                dirty.players.set(num, false);
                let player = &conversation.players()[num];
                self.current_frame =
                    wire::render_player(num, player.connected, player.typing).into_bytes();
                State::WritingPlayer
            }
            NextFrame::Message(num) => {
                self.current_frame = conversation.messages()[num].as_bytes().to_vec();
                self.message_num += 1;
                State::WritingMessages
            }
            NextFrame::Shout(num) => {
                dirty.shouts.set(num, false);
                let shouting = conversation.shouting_player() == Some(num);
                self.current_frame = wire::render_shout(num, shouting).into_bytes();
                State::WritingShout
            }
            NextFrame::Tile(num) => {
                dirty.tiles.set(num, false);
                let tile = &conversation.tiles()[num];
                self.current_frame =
                    wire::render_tile(num, tile.x, tile.y, tile.letter, tile.last_player)
                        .into_bytes();
                State::WritingTile
            }
            NextFrame::End => State::WritingEnd,
        };

        Some(state)
    }
}

impl Response for WatchPersonResponse {
    fn add_data(&mut self, buf: &mut [u8]) -> usize {
        let mut out = OutBuf::new(buf);

        loop {
            match self.state {
                State::WritingHttpHeader => {
                    if !write_message(&mut out, &mut self.message_pos, &self.http_header) {
                        break;
                    }
                    self.message_pos = 0;
                    self.state = State::WritingHeaderFrame;
                }
                State::WritingHeaderFrame
                | State::WritingName
                | State::WritingPlayer
                | State::WritingMessages
                | State::WritingShout
                | State::WritingTile => {
                    if !write_chunked_message(&mut out, &mut self.message_pos, &self.current_frame)
                    {
                        break;
                    }
                    self.message_pos = 0;
                    self.state = State::AwaitingData;
                }
                State::AwaitingData => {
                    // Selecting clears dirty bits, so only do it when at least
                    // one byte of the frame can be written
                    if out.is_full() {
                        break;
                    }
                    match self.select_frame() {
                        Some(state) => {
                            self.message_pos = 0;
                            self.state = state;
                        }
                        None => break,
                    }
                }
                State::WritingEnd => {
                    if !write_message(&mut out, &mut self.message_pos, wire::END_CHUNK) {
                        break;
                    }
                    self.message_pos = 0;
                    self.state = State::Done;
                }
                State::Done => break,
            }
        }

        out.written()
    }

    fn is_finished(&self) -> bool {
        self.state == State::Done
    }

    fn has_pending_data(&self) -> bool {
        match self.state {
            State::AwaitingData => {
                let conversation = self.listeners.conversation.lock();
                let dirty = self.shared.dirty.lock();
                self.next_frame(&conversation, &dirty).is_some()
            }
            State::Done => false,
            _ => true,
        }
    }

    fn changed(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.shared.changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Instant;

    fn conversation_with(players: &[&str]) -> SharedConversation {
        let mut conversation = Conversation::with_tile_bag(vec!['C', 'B', 'A']);
        for name in players {
            conversation.add_player(name);
        }
        Arc::new(Mutex::new(conversation))
    }

    fn drain(response: &mut WatchPersonResponse, piece: usize) -> Vec<u8> {
        let mut output = Vec::new();
        let mut buf = vec![0u8; piece];
        loop {
            let n = response.add_data(&mut buf);
            if n == 0 {
                return output;
            }
            output.extend_from_slice(&buf[..n]);
        }
    }

    fn frame(payload: &str) -> Vec<u8> {
        wire::chunk_frame(payload.as_bytes())
    }

    #[test]
    fn test_initial_output() {
        let conversation = conversation_with(&["Ana", "Bo"]);
        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 0xabc, 0, 0, None);

        let output = drain(&mut response, 4096);

        let mut expected = response.http_header.clone();
        expected.extend(frame(&wire::render_header(0, 0xabc)));
        expected.extend(frame(&wire::render_player_name(0, "Ana")));
        expected.extend(frame(&wire::render_player_name(1, "Bo")));
        expected.extend(frame(&wire::render_player(0, true, false)));
        expected.extend(frame(&wire::render_player(1, true, false)));
        assert_eq!(output, expected);

        assert!(!response.has_pending_data());
        assert!(!response.is_finished());
    }

    #[test]
    fn test_http_header_layout() {
        let conversation = conversation_with(&["Ana"]);
        let response = WatchPersonResponse::new(conversation, 1, 0, 0, None);
        let header = String::from_utf8(response.http_header.clone()).unwrap();

        assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(header.contains("Transfer-Encoding: chunked\r\n\r\nfb\r\n[\"padding\""));
        assert!(header.ends_with("Ĝuu!\"]\r\n\r\n"));
    }

    #[test]
    fn test_message_then_end_scenario() {
        let conversation = conversation_with(&["Ana", "Bo"]);
        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        drain(&mut response, 4096);

        conversation.lock().add_message(0, "hi\"there");
        assert!(response.has_pending_data());
        let output = drain(&mut response, 4096);
        let payload = "[\"message\", {\"person\": 0, \"text\": \"hi\\\"there\"}]\r\n";
        assert_eq!(output, format!("{:x}\r\n{}\r\n", payload.len(), payload).into_bytes());
        assert!(!response.is_finished());

        conversation.lock().player_left(0);
        let output = drain(&mut response, 4096);
        let mut expected = frame(&wire::render_player(0, false, false));
        expected.extend_from_slice(wire::END_CHUNK);
        assert_eq!(output, expected);

        assert!(response.is_finished());
        assert!(!response.has_pending_data());
        assert_eq!(drain(&mut response, 4096), Vec::<u8>::new());
    }

    #[test]
    fn test_dirty_bit_race_sends_second_status() {
        let conversation = conversation_with(&["Ana", "Bo"]);
        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        drain(&mut response, 4096);

        conversation.lock().set_typing(1, true);
        let mut partial = [0u8; 5];
        let n = response.add_data(&mut partial);
        assert_eq!(n, 5);
        assert!(response.message_pos > 0);

        conversation.lock().set_typing(1, false);

        let mut output = partial.to_vec();
        output.extend(drain(&mut response, 4096));

        let mut expected = frame(&wire::render_player(1, true, true));
        expected.extend(frame(&wire::render_player(1, true, false)));
        assert_eq!(output, expected);
    }

    #[test]
    fn test_priority_order() {
        let conversation = conversation_with(&["Ana"]);
        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        drain(&mut response, 4096);

        {
            let mut c = conversation.lock();
            let now = Instant::now();
            c.add_player("Cy");
            c.turn(0);
            c.shout(0, now);
            c.add_message(0, "m");
            c.set_typing(0, true);
        }

        let output = drain(&mut response, 4096);
        let mut expected = Vec::new();
        expected.extend(frame(&wire::render_player_name(1, "Cy")));
        expected.extend(frame(&wire::render_player(0, true, true)));
        expected.extend(frame(&wire::render_player(1, true, false)));
        expected.extend(frame(&wire::render_message(0, "m")));
        expected.extend(frame(&wire::render_shout(0, true)));
        expected.extend(frame(&wire::render_tile(0, 0, 0, 'A', Some(0))));
        assert_eq!(output, expected);
    }

    #[test]
    fn test_resume_from_last_message() {
        let conversation = conversation_with(&["Ana"]);
        {
            let mut c = conversation.lock();
            c.add_message(0, "one");
            c.add_message(0, "two");
        }

        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 1, None);
        let output = drain(&mut response, 4096);
        let tail = frame(&wire::render_message(0, "two"));

        assert!(output.ends_with(&tail));
        assert!(!output
            .windows(b"\"one\"".len())
            .any(|w| w == b"\"one\""));
        assert_eq!(response.message_num(), 2);
    }

    #[test]
    fn test_existing_state_is_sent_on_attach() {
        let conversation = conversation_with(&["Ana", "Bo"]);
        {
            let mut c = conversation.lock();
            c.turn(1);
            c.shout(1, Instant::now());
        }

        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        let output = drain(&mut response, 4096);

        let mut tail = frame(&wire::render_shout(1, true));
        tail.extend(frame(&wire::render_tile(0, 0, 0, 'A', Some(1))));
        assert!(output.ends_with(&tail));
    }

    #[test]
    fn test_drop_removes_listeners() {
        let conversation = conversation_with(&["Ana"]);
        let response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        {
            let c = conversation.lock();
            assert_eq!(c.changed_signal.len(), 1);
            assert_eq!(c.player_changed_signal.len(), 1);
        }

        drop(response);

        let c = conversation.lock();
        assert!(c.changed_signal.is_empty());
        assert!(c.player_changed_signal.is_empty());
    }

    #[test]
    fn test_changes_raise_notification() {
        let conversation = conversation_with(&["Ana"]);
        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        drain(&mut response, 4096);
        let notify = response.changed().unwrap();

        conversation.lock().add_message(0, "ping");

        // notify_one stores a permit when nobody is waiting
        tokio_test::block_on(notify.notified());
        assert!(response.has_pending_data());
    }

    #[test]
    fn test_zero_length_buffer_writes_nothing() {
        let conversation = conversation_with(&["Ana"]);
        let mut response = WatchPersonResponse::new(Arc::clone(&conversation), 7, 0, 0, None);
        drain(&mut response, 4096);

        conversation.lock().set_typing(0, true);
        let mut empty: [u8; 0] = [];
        assert_eq!(response.add_data(&mut empty), 0);
        // The dirty player was not consumed by the empty call
        assert_eq!(drain(&mut response, 4096), frame(&wire::render_player(0, true, true)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Message(usize, String),
        Typing(usize, bool),
        Leave(usize),
        Join,
        Turn(usize),
        Move(usize, usize, i32, i32),
        Shout(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, "[ -~]{0,12}").prop_map(|(p, t)| Op::Message(p, t)),
            (0usize..3, any::<bool>()).prop_map(|(p, t)| Op::Typing(p, t)),
            (0usize..3).prop_map(Op::Leave),
            Just(Op::Join),
            (0usize..3).prop_map(Op::Turn),
            (0usize..3, 0usize..3, -50i32..50, -50i32..50)
                .prop_map(|(p, t, x, y)| Op::Move(p, t, x, y)),
            (0usize..3).prop_map(Op::Shout),
        ]
    }

    fn apply(conversation: &SharedConversation, op: &Op, now: Instant) {
        let mut c = conversation.lock();
        match op {
            Op::Message(p, text) => c.add_message(*p, text),
            Op::Typing(p, typing) => c.set_typing(*p, *typing),
            Op::Leave(p) => c.player_left(*p),
            Op::Join => {
                c.add_player("joiner");
            }
            Op::Turn(p) => {
                c.turn(*p);
            }
            Op::Move(p, t, x, y) => c.move_tile(*p, *t, *x, *y),
            Op::Shout(p) => {
                c.shout(*p, now);
            }
        }
    }

    fn drain_schedule(response: &mut WatchPersonResponse, sizes: &[usize], next: &mut usize) -> Vec<u8> {
        let mut output = Vec::new();
        loop {
            let size = sizes[*next % sizes.len()];
            *next += 1;
            let mut buf = vec![0u8; size];
            let n = response.add_data(&mut buf);
            output.extend_from_slice(&buf[..n]);
            if n == 0 && size > 0 {
                return output;
            }
        }
    }

    proptest! {
        #[test]
        fn prop_buffer_schedule_does_not_change_output(
            ops in proptest::collection::vec(op(), 0..20),
            sizes in proptest::collection::vec(1usize..16, 1..6),
        ) {
            let now = Instant::now();
            let small = conversation_with(&["Ana", "Bo"]);
            let large = conversation_with(&["Ana", "Bo"]);
            let mut small_response = WatchPersonResponse::new(Arc::clone(&small), 1, 0, 0, None);
            let mut large_response = WatchPersonResponse::new(Arc::clone(&large), 1, 0, 0, None);

            let mut next = 0;
            let mut small_output = drain_schedule(&mut small_response, &sizes, &mut next);
            let mut large_output = drain(&mut large_response, 1 << 16);

            for op in &ops {
                apply(&small, op, now);
                apply(&large, op, now);
                small_output.extend(drain_schedule(&mut small_response, &sizes, &mut next));
                large_output.extend(drain(&mut large_response, 1 << 16));
            }

            prop_assert_eq!(small_output, large_output);
            prop_assert_eq!(small_response.is_finished(), large_response.is_finished());
        }
    }
}
