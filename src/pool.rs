use std::collections::{HashMap, HashSet};
use std::io::Write;

use mio::Interest;
use tracing::debug;

use crate::conn::Connection;
use crate::error::RelayError;

const READ_WRITE: Interest = Interest::READABLE.add(Interest::WRITABLE);

/// Registry of live connections plus the readiness bookkeeping the event
/// loop works from: which tokens to watch for reads, which for writes, and
/// the largest live token.
///
/// Invariants held between dispatch cycles:
/// - every live token is in the read-interest set;
/// - a token is in the write-interest set iff its outbound queue is
///   non-empty;
/// - `max_token` is the largest live token, `None` when the pool is empty.
pub struct ConnPool<S> {
    conns: HashMap<usize, Connection<S>>,
    read_interest: HashSet<usize>,
    write_interest: HashSet<usize>,
    /// Tokens whose poll registration must be refreshed even if the desired
    /// interest is unchanged. An edge-triggered poller reports an edge only
    /// once; re-registering re-arms it.
    rearm: HashSet<usize>,
    max_token: Option<usize>,
}

impl<S> Default for ConnPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnPool<S> {
    pub fn new() -> Self {
        Self {
            conns: HashMap::new(),
            read_interest: HashSet::new(),
            write_interest: HashSet::new(),
            rearm: HashSet::new(),
            max_token: None,
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn contains(&self, token: usize) -> bool {
        self.conns.contains_key(&token)
    }

    pub fn get_mut(&mut self, token: usize) -> Option<&mut Connection<S>> {
        self.conns.get_mut(&token)
    }

    pub fn max_token(&self) -> Option<usize> {
        self.max_token
    }

    pub fn wants_read(&self, token: usize) -> bool {
        self.read_interest.contains(&token)
    }

    pub fn wants_write(&self, token: usize) -> bool {
        self.write_interest.contains(&token)
    }

    /// Sorted snapshot of the live tokens.
    pub fn tokens(&self) -> Vec<usize> {
        let mut tokens: Vec<usize> = self.conns.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    pub fn add(&mut self, token: usize, stream: S) {
        debug_assert!(!self.conns.contains_key(&token));
        self.read_interest.insert(token);
        if self.max_token.is_none_or(|max| token > max) {
            self.max_token = Some(token);
        }
        self.conns.insert(token, Connection::new(token, stream));
    }

    /// Unlinks a connection, clearing it from both interest sets. Queued
    /// messages are dropped with the returned connection. The max token is
    /// rescanned only when the removed token held it.
    pub fn remove(&mut self, token: usize) -> Result<Connection<S>, RelayError> {
        let conn = self
            .conns
            .remove(&token)
            .ok_or(RelayError::NotFound(token))?;
        self.read_interest.remove(&token);
        self.write_interest.remove(&token);
        self.rearm.remove(&token);
        if self.max_token == Some(token) {
            self.max_token = self.conns.keys().copied().max();
        }
        Ok(conn)
    }

    /// Visits every live token in sorted order. A visitor that removes the
    /// current entry does not disturb the rest of the pass; entries removed
    /// mid-pass are skipped instead of dereferenced.
    pub fn for_each_safe<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Self, usize),
    {
        for token in self.tokens() {
            if !self.conns.contains_key(&token) {
                continue;
            }
            visit(self, token);
        }
    }

    /// Appends a message at the tail of one connection's queue and marks it
    /// write-interested. A queue going empty to non-empty schedules a
    /// re-arm: the last writable edge for this token may already have been
    /// consumed. Queues are unbounded: a receiver that never drains grows
    /// its queue without limit.
    pub fn enqueue(&mut self, token: usize, msg: Vec<u8>) {
        let Some(conn) = self.conns.get_mut(&token) else {
            debug!(token, "connection vanished before enqueue");
            return;
        };
        if conn.outbound.is_empty() {
            self.rearm.insert(token);
        }
        conn.outbound.push_back(msg);
        self.write_interest.insert(token);
    }

    /// Asks for this token's registration to be refreshed next cycle so the
    /// poller reports a fresh edge.
    pub fn request_rearm(&mut self, token: usize) {
        if self.conns.contains_key(&token) {
            self.rearm.insert(token);
        }
    }

    /// Tokens whose poll registration must be refreshed, paired with the
    /// interest to register: either the desired interest drifted from the
    /// registered one, or a re-arm is pending. Pending re-arms are consumed
    /// by the call.
    pub fn stale_interests(&mut self) -> Vec<(usize, Interest)> {
        let rearm = std::mem::take(&mut self.rearm);
        self.conns
            .iter()
            .filter_map(|(&token, conn)| {
                debug_assert!(self.read_interest.contains(&token));
                let desired = if self.write_interest.contains(&token) {
                    READ_WRITE
                } else {
                    Interest::READABLE
                };
                (conn.interest != desired || rearm.contains(&token))
                    .then_some((token, desired))
            })
            .collect()
    }

    /// Removes every connection, handing each to `on_close` so the caller
    /// can shut its transport down and deregister it. Queued messages drop
    /// with their connection.
    pub fn teardown<F>(&mut self, mut on_close: F)
    where
        F: FnMut(&mut Connection<S>),
    {
        for (token, mut conn) in self.conns.drain() {
            debug!(token, pending = conn.pending(), "removing connection");
            on_close(&mut conn);
        }
        self.read_interest.clear();
        self.write_interest.clear();
        self.rearm.clear();
        self.max_token = None;
    }
}

impl<S: Write> ConnPool<S> {
    /// Flushes one connection's queue: every queued message gets a single
    /// send attempt, then the token leaves the write-interest set.
    pub fn flush(&mut self, token: usize) -> Result<(), RelayError> {
        let conn = self
            .conns
            .get_mut(&token)
            .ok_or(RelayError::NotFound(token))?;
        if conn.outbound.is_empty() {
            return Err(RelayError::EmptyQueue(token));
        }
        conn.flush_outbound();
        self.write_interest.remove(&token);
        Ok(())
    }
}
