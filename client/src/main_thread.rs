//! Idle callbacks for the thread that owns the game model.
//!
//! Any thread may queue a callback. The owning thread runs them with
//! [`MainThread::flush_idle`], or blocks in [`MainThread::run_until`].
//! Callbacks run in queue order without the queue lock held, so they may
//! queue further callbacks.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Handle for cancelling a queued callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleToken(u64);

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct IdleQueue {
    next_token: u64,
    callbacks: VecDeque<(IdleToken, Callback)>,
}

#[derive(Default)]
pub struct MainThread {
    queue: Mutex<IdleQueue>,
    ready: Condvar,
}

impl MainThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_idle<F>(&self, callback: F) -> IdleToken
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.queue.lock();
        queue.next_token += 1;
        let token = IdleToken(queue.next_token);
        queue.callbacks.push_back((token, Box::new(callback)));
        drop(queue);

        self.ready.notify_all();
        token
    }

    /// Removes a callback that has not run yet. Returns false if it already
    /// ran or was never queued.
    pub fn cancel_idle(&self, token: IdleToken) -> bool {
        let mut queue = self.queue.lock();
        match queue.callbacks.iter().position(|(t, _)| *t == token) {
            Some(index) => {
                queue.callbacks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Runs every callback queued so far and returns how many ran.
    pub fn flush_idle(&self) -> usize {
        let callbacks = std::mem::take(&mut self.queue.lock().callbacks);
        let count = callbacks.len();

        for (_, callback) in callbacks {
            callback();
        }

        count
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().callbacks.len()
    }

    /// Blocks until a callback is queued or the timeout elapses. Returns
    /// whether callbacks are waiting.
    pub fn wait_for_idle(&self, timeout: Option<Duration>) -> bool {
        let mut queue = self.queue.lock();
        while queue.callbacks.is_empty() {
            match timeout {
                Some(timeout) => {
                    if self.ready.wait_for(&mut queue, timeout).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut queue),
            }
        }
        !queue.callbacks.is_empty()
    }

    /// Runs callbacks as they arrive until `done` returns true. `done` is
    /// checked after every flush.
    pub fn run_until<F>(&self, mut done: F)
    where
        F: FnMut() -> bool,
    {
        loop {
            self.flush_idle();
            if done() {
                break;
            }
            self.wait_for_idle(None);
        }
    }

    /// Wakes a thread blocked in `wait_for_idle` or `run_until` so it
    /// re-checks its exit condition.
    pub fn wake(&self) {
        self.queue_idle(|| {});
    }
}
