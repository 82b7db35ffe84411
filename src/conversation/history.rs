use super::Turn;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of turns retained per conversation.
pub const DEFAULT_MAX_HISTORY: usize = 30;

/// Bounded, ordered turn buffer for one conversation.
///
/// Appending past the bound evicts the oldest turn regardless of its role, so
/// a buffer may start with a model turn after eviction.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_HISTORY * 2)),
            capacity,
        }
    }

    /// Append a turn, evicting from the front while over capacity.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Copy of the current turns, oldest first.
    pub fn to_vec(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }
}

/// Handle to one conversation's history, shared between the store and callers.
pub type SharedHistory = Arc<Mutex<ConversationHistory>>;

/// Per-conversation history, keyed by conversation id.
///
/// Entries are created lazily and removed entirely on reset. Locks are held
/// only for the duration of a single operation and never across `.await`.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    histories: Mutex<HashMap<String, SharedHistory>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Return the history for `conversation_id`, creating an empty one if needed.
    pub fn get_or_create(&self, conversation_id: &str) -> SharedHistory {
        let mut histories = self.histories.lock();
        Arc::clone(
            histories
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ConversationHistory::new(self.capacity)))),
        )
    }

    pub fn append(&self, conversation_id: &str, turn: Turn) {
        let history = self.get_or_create(conversation_id);
        history.lock().push(turn);
    }

    /// Read-only copy of a conversation's turns; empty when the id is unknown.
    pub fn snapshot(&self, conversation_id: &str) -> Vec<Turn> {
        let history = self.histories.lock().get(conversation_id).cloned();
        history.map(|h| h.lock().to_vec()).unwrap_or_default()
    }

    /// Drop a conversation entirely. Returns `true` when an entry existed.
    pub fn reset(&self, conversation_id: &str) -> bool {
        self.histories.lock().remove(conversation_id).is_some()
    }

    pub fn conversation_count(&self) -> usize {
        self.histories.lock().len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn history_never_exceeds_capacity() {
        let store = HistoryStore::new(4);
        for i in 0..25 {
            store.append("42", Turn::user(format!("m{i}")));
            assert!(store.snapshot("42").len() <= 4);
        }
        assert_eq!(store.snapshot("42").len(), 4);
    }

    #[test]
    fn eviction_drops_exactly_the_oldest_turn() {
        let store = HistoryStore::new(3);
        store.append("1", Turn::user("a"));
        store.append("1", Turn::model("b"));
        store.append("1", Turn::user("c"));
        store.append("1", Turn::model("d"));

        let texts: Vec<String> = store
            .snapshot("1")
            .iter()
            .map(|t| t.text().to_string())
            .collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
    }

    #[test]
    fn eviction_may_leave_model_turn_first() {
        let store = HistoryStore::new(2);
        store.append("1", Turn::user("q1"));
        store.append("1", Turn::model("a1"));
        store.append("1", Turn::user("q2"));

        let turns = store.snapshot("1");
        assert_eq!(turns[0].role(), Role::Model);
        assert_eq!(turns[1].role(), Role::User);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = HistoryStore::new(5);
        let first = store.get_or_create("7");
        first.lock().push(Turn::user("hi"));
        let second = store.get_or_create("7");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().len(), 1);
        assert_eq!(store.conversation_count(), 1);
    }

    #[test]
    fn reset_then_get_or_create_yields_fresh_history() {
        let store = HistoryStore::new(5);
        let before = store.get_or_create("7");
        store.append("7", Turn::user("hi"));

        assert!(store.reset("7"));
        let after = store.get_or_create("7");

        assert!(after.lock().is_empty());
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn reset_unknown_conversation_reports_false() {
        let store = HistoryStore::new(5);
        assert!(!store.reset("missing"));
        assert_eq!(store.conversation_count(), 0);
    }

    #[test]
    fn conversations_are_independent() {
        let store = HistoryStore::new(5);
        store.append("a", Turn::user("for a"));
        store.append("b", Turn::user("for b"));
        store.append("b", Turn::model("reply b"));

        assert_eq!(store.snapshot("a").len(), 1);
        assert_eq!(store.snapshot("b").len(), 2);
        assert!(store.snapshot("c").is_empty());
        assert_eq!(store.conversation_count(), 2);
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let store = HistoryStore::new(5);
        store.append("a", Turn::user("one"));
        let snapshot = store.snapshot("a");
        store.append("a", Turn::model("two"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.snapshot("a").len(), 2);
    }
}
