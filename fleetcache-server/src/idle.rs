//! An intrusive doubly-linked list of connections ordered by last-activity
//! time, most-recently-active at the head.
//!
//! Fused with the TTL expiry heap, this is what lets the event loop compute
//! a single "wake me up in N milliseconds" poll timeout instead of busy
//! waiting: the tail of this list is always the connection closest to
//! tripping the idle timeout, so its deadline plus the TTL heap's next
//! expiry is all the information the poll call needs.

use mio::Token;
use slab::Slab;

struct Node {
    token: Token,
    last_active_ms: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// The idle-connection list. Connections own their node index (see
/// [`crate::connection::Connection::idle_node`]) so touching or removing a
/// connection is O(1).
#[derive(Default)]
pub struct IdleList {
    nodes: Slab<Node>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl IdleList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly-accepted connection at the head (most recently
    /// active). Returns the node index to store on the connection.
    pub fn insert(&mut self, token: Token, now_ms: u64) -> usize {
        let id = self.nodes.insert(Node {
            token,
            last_active_ms: now_ms,
            prev: None,
            next: self.head,
        });
        if let Some(head) = self.head {
            self.nodes[head].prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
        id
    }

    /// Records activity and moves the connection to the head.
    pub fn touch(&mut self, id: usize, now_ms: u64) {
        self.unlink(id);
        self.nodes[id].last_active_ms = now_ms;
        self.nodes[id].prev = None;
        self.nodes[id].next = self.head;
        if let Some(head) = self.head {
            self.nodes[head].prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    /// Removes a connection from the list (it closed or was evicted).
    pub fn remove(&mut self, id: usize) {
        self.unlink(id);
        self.nodes.remove(id);
    }

    fn unlink(&mut self, id: usize) {
        let (prev, next) = (self.nodes[id].prev, self.nodes[id].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
    }

    /// The least-recently-active connection, if any.
    pub fn oldest(&self) -> Option<(Token, u64)> {
        self.tail.map(|id| (self.nodes[id].token, self.nodes[id].last_active_ms))
    }

    /// Pops and returns every connection whose last activity is more than
    /// `idle_timeout_ms` behind `now_ms`, oldest first.
    pub fn pop_expired(&mut self, now_ms: u64, idle_timeout_ms: u64) -> Vec<Token> {
        let mut expired = Vec::new();
        while let Some(id) = self.tail {
            let node = &self.nodes[id];
            if now_ms.saturating_sub(node.last_active_ms) < idle_timeout_ms {
                break;
            }
            expired.push(node.token);
            self.unlink(id);
            self.nodes.remove(id);
        }
        expired
    }

    /// Milliseconds until the oldest connection would trip the idle
    /// timeout, or `None` if the list is empty. Saturates at 0 if it's
    /// already overdue (the caller should poll with a zero timeout and
    /// reap it on the next iteration).
    pub fn next_deadline_ms(&self, now_ms: u64, idle_timeout_ms: u64) -> Option<u64> {
        self.oldest().map(|(_, last_active)| {
            let due_at = last_active + idle_timeout_ms;
            due_at.saturating_sub(now_ms)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(n: usize) -> Token {
        Token(n)
    }

    #[test]
    fn oldest_is_the_least_recently_touched() {
        let mut list = IdleList::new();
        let a = list.insert(tok(1), 0);
        let _b = list.insert(tok(2), 10);
        assert_eq!(list.oldest(), Some((tok(1), 0)));
        list.touch(a, 20);
        assert_eq!(list.oldest(), Some((tok(2), 10)));
    }

    #[test]
    fn pop_expired_returns_only_overdue_connections_oldest_first() {
        let mut list = IdleList::new();
        list.insert(tok(1), 0);
        list.insert(tok(2), 50);
        list.insert(tok(3), 100);

        let expired = list.pop_expired(160, 100);
        assert_eq!(expired, vec![tok(1)]);

        let expired = list.pop_expired(300, 100);
        assert_eq!(expired, vec![tok(2), tok(3)]);
        assert_eq!(list.oldest(), None);
    }

    #[test]
    fn remove_unlinks_from_any_position() {
        let mut list = IdleList::new();
        let a = list.insert(tok(1), 0);
        let b = list.insert(tok(2), 10);
        let c = list.insert(tok(3), 20);
        list.remove(b);
        assert_eq!(list.pop_expired(1000, 0), vec![tok(1), tok(3)]);
        let _ = (a, c);
    }

    #[test]
    fn next_deadline_counts_down_to_zero() {
        let mut list = IdleList::new();
        list.insert(tok(1), 0);
        assert_eq!(list.next_deadline_ms(40, 100), Some(60));
        assert_eq!(list.next_deadline_ms(150, 100), Some(0));
    }
}
