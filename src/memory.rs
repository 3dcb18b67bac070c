//! Bounded per-session conversation memory.
//!
//! Turns live in a `VecDeque` per session behind a single `RwLock`, so
//! appends for the same session are serialized and two concurrent answers
//! can never interleave turn order. The cap is enforced oldest-first on
//! every append.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::models::Turn;

/// In-memory session history store with a hard per-session cap.
pub struct MemoryStore {
    max_turns: usize,
    sessions: RwLock<HashMap<String, VecDeque<Turn>>>,
}

impl MemoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Append a user/assistant turn pair, then trim oldest-first so the
    /// session never exceeds the cap.
    pub fn append(&self, session_id: &str, user: Turn, assistant: Turn) {
        let mut sessions = self.sessions.write().unwrap();
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push_back(user);
        turns.push_back(assistant);
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// Full history for a session, oldest first. Unknown sessions return
    /// an empty list.
    pub fn get(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a session's history. Idempotent.
    pub fn clear(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnRole;

    #[test]
    fn test_cap_keeps_last_entries_in_order() {
        let store = MemoryStore::new(4);
        store.append("s1", Turn::user("u1"), Turn::assistant("a1"));
        store.append("s1", Turn::user("u2"), Turn::assistant("a2"));
        store.append("s1", Turn::user("u3"), Turn::assistant("a3"));

        let turns = store.get("s1");
        assert_eq!(turns.len(), 4);
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["u2", "a2", "u3", "a3"]);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = MemoryStore::new(4);
        assert!(store.get("nope").is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MemoryStore::new(4);
        store.append("s1", Turn::user("u"), Turn::assistant("a"));
        store.clear("s1");
        store.clear("s1");
        assert!(store.get("s1").is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = MemoryStore::new(4);
        store.append("s1", Turn::user("u1"), Turn::assistant("a1"));
        store.append("s2", Turn::user("x1"), Turn::assistant("y1"));
        assert_eq!(store.get("s1").len(), 2);
        assert_eq!(store.get("s2")[0].content, "x1");
    }
}
