//! Person lifecycle management for the server.
//!
//! A person is one participant in a conversation, identified by the random
//! 64-bit id handed out when they join. Every later request carries that id.
//! This module handles:
//! - Joining a room and allocating the person's player slot
//! - Looking persons up by id and refreshing their activity time
//! - Tracking attached watch streams so active viewers never time out
//! - Removing idle persons and telling their conversation they left

use crate::conversation_set::{ConversationSet, SharedConversation};
use crate::id::generate_id;
use log::info;
use shared::NetAddress;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A participant in a conversation
#[derive(Clone)]
pub struct Person {
    /// Unique id, also used as the credential for requests
    pub id: u64,
    /// Index of the person's player within the conversation
    pub player_num: usize,
    /// Conversation the person joined
    pub conversation: SharedConversation,
    /// Address the person first connected from
    pub remote: NetAddress,
    /// Last time a request arrived or a watch stream was active
    pub last_seen: Instant,
    /// Number of watch streams currently attached
    pub watchers: usize,
}

impl Person {
    /// Checks if the person has been idle longer than `timeout`
    ///
    /// A person with an attached watch stream is never considered idle.
    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        self.watchers == 0 && now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Registry of all persons and the rooms they can join
///
/// Lock order: the person set is locked before any conversation, and a
/// conversation before any response state.
#[derive(Default)]
pub struct PersonSet {
    persons: HashMap<u64, Person>,
    conversations: ConversationSet,
}

impl PersonSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `room` as a new player called `name`
    ///
    /// Reuses the room's pending conversation when it can still be joined,
    /// otherwise starts a new one. Returns the new person.
    pub fn add_person(&mut self, room: &str, name: &str, remote: NetAddress) -> Person {
        let (conversation, player_num) = loop {
            let conversation = self.conversations.get_conversation(room);
            let added = conversation.lock().add_player(name);
            if let Some(player_num) = added {
                break (conversation, player_num);
            }
        };

        let mut id = generate_id(&remote);
        while self.persons.contains_key(&id) {
            id = generate_id(&remote);
        }

        let person = Person {
            id,
            player_num,
            conversation,
            remote,
            last_seen: Instant::now(),
            watchers: 0,
        };

        info!(
            "Person {:016X} joined room '{}' as player {} from {}",
            id, room, player_num, remote
        );
        self.persons.insert(id, person.clone());
        self.conversations.prune();

        person
    }

    pub fn ids(&self) -> Vec<u64> {
        self.persons.keys().copied().collect()
    }

    pub fn get(&self, id: u64) -> Option<&Person> {
        self.persons.get(&id)
    }

    /// Looks a person up and marks them as active
    pub fn touch(&mut self, id: u64) -> Option<Person> {
        let person = self.persons.get_mut(&id)?;
        person.last_seen = Instant::now();
        Some(person.clone())
    }

    /// Records that a watch stream for `id` started
    pub fn attach_watcher(&mut self, id: u64) -> bool {
        match self.persons.get_mut(&id) {
            Some(person) => {
                person.watchers += 1;
                person.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Records that a watch stream for `id` ended
    ///
    /// The idle timer starts counting from this moment.
    pub fn detach_watcher(&mut self, id: u64) {
        if let Some(person) = self.persons.get_mut(&id) {
            person.watchers = person.watchers.saturating_sub(1);
            person.last_seen = Instant::now();
        }
    }

    /// Removes a person and marks their player as having left
    ///
    /// Returns false if the person was already gone.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.persons.remove(&id) {
            Some(person) => {
                person.conversation.lock().player_left(person.player_num);
                info!("Person {:016X} left", id);
                true
            }
            None => false,
        }
    }

    /// Removes every person idle for longer than `timeout`
    ///
    /// Returns the removed ids so callers can log or clean up further.
    pub fn check_timeouts(&mut self, timeout: Duration, now: Instant) -> Vec<u64> {
        let timed_out: Vec<u64> = self
            .persons
            .values()
            .filter(|person| person.is_timed_out(timeout, now))
            .map(|person| person.id)
            .collect();

        for id in &timed_out {
            info!("Person {:016X} timed out", id);
            self.remove(*id);
        }

        timed_out
    }

    /// Distinct conversations that still have persons in them
    pub fn conversations(&self) -> Vec<SharedConversation> {
        let mut result: Vec<SharedConversation> = Vec::new();
        for person in self.persons.values() {
            if !result.iter().any(|c| Arc::ptr_eq(c, &person.conversation)) {
                result.push(Arc::clone(&person.conversation));
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}
