//! Rooms that can still be joined.

use crate::conversation::Conversation;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type SharedConversation = Arc<Mutex<Conversation>>;

/// Maps room names to the conversation new players join.
///
/// Only conversations that are still open are kept. Once a conversation
/// starts or fills up, the next lookup for the room creates a fresh one.
#[derive(Default)]
pub struct ConversationSet {
    pending: HashMap<String, SharedConversation>,
}

impl ConversationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_conversation(&mut self, room: &str) -> SharedConversation {
        if let Some(conversation) = self.pending.get(room) {
            if conversation.lock().is_open() {
                return Arc::clone(conversation);
            }
        }

        debug!("Creating new conversation for room '{}'", room);
        let conversation = Arc::new(Mutex::new(Conversation::new()));
        self.pending
            .insert(room.to_string(), Arc::clone(&conversation));
        conversation
    }

    /// Drops conversations that can no longer be joined.
    pub fn prune(&mut self) {
        self.pending.retain(|_, conversation| conversation.lock().is_open());
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MAX_PLAYERS;

    #[test]
    fn test_same_room_shares_conversation() {
        let mut set = ConversationSet::new();
        let a = set.get_conversation("room");
        let b = set.get_conversation("room");
        let c = set.get_conversation("other");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_started_conversation_is_replaced() {
        let mut set = ConversationSet::new();
        let first = set.get_conversation("room");
        first.lock().start();

        let second = set.get_conversation("room");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_full_conversation_is_replaced() {
        let mut set = ConversationSet::new();
        let first = set.get_conversation("room");
        for i in 0..MAX_PLAYERS {
            first.lock().add_player(&i.to_string());
        }

        let second = set.get_conversation("room");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().players().len(), 0);
    }

    #[test]
    fn test_prune() {
        let mut set = ConversationSet::new();
        set.get_conversation("a").lock().start();
        set.get_conversation("b");

        set.prune();
        assert_eq!(set.len(), 1);
    }
}
