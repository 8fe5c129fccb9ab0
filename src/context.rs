//! Multi-command context registry.
//!
//! Tracks which multi-command is active per `(bot_id, chat_id)`. Purely in
//! memory: sessions are deliberately dropped on restart and on bot stop.

use parking_lot::RwLock;
use std::collections::HashMap;

pub struct ContextRegistry {
    active: RwLock<HashMap<(String, String), String>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Active multi-command id for this chat, if any.
    pub fn get(&self, bot_id: &str, chat_id: &str) -> Option<String> {
        self.active
            .read()
            .get(&(bot_id.to_string(), chat_id.to_string()))
            .cloned()
    }

    pub fn set(&self, bot_id: &str, chat_id: &str, command_id: &str) {
        self.active.write().insert(
            (bot_id.to_string(), chat_id.to_string()),
            command_id.to_string(),
        );
    }

    pub fn remove(&self, bot_id: &str, chat_id: &str) {
        self.active
            .write()
            .remove(&(bot_id.to_string(), chat_id.to_string()));
    }

    /// Drops every session of a bot. Called on bot stop.
    pub fn clear_bot(&self, bot_id: &str) {
        self.active.write().retain(|(b, _), _| b != bot_id);
    }

    /// Drops sessions pinned to one multi-command, returning how many.
    pub fn clear_command(&self, bot_id: &str, command_id: &str) -> usize {
        let mut active = self.active.write();
        let before = active.len();
        active.retain(|(b, _), cmd| !(b == bot_id && cmd == command_id));
        before - active.len()
    }

    /// Drops everything. Called on process shutdown.
    pub fn clear_all(&self) {
        self.active.write().clear();
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let reg = ContextRegistry::new();
        assert_eq!(reg.get("b1", "c1"), None);

        reg.set("b1", "c1", "cmd1");
        assert_eq!(reg.get("b1", "c1"), Some("cmd1".to_string()));
        assert_eq!(reg.get("b1", "c2"), None);

        reg.remove("b1", "c1");
        assert_eq!(reg.get("b1", "c1"), None);
    }

    #[test]
    fn test_clear_bot_scoped() {
        let reg = ContextRegistry::new();
        reg.set("b1", "c1", "cmd1");
        reg.set("b1", "c2", "cmd2");
        reg.set("b2", "c1", "cmd3");

        reg.clear_bot("b1");
        assert_eq!(reg.get("b1", "c1"), None);
        assert_eq!(reg.get("b1", "c2"), None);
        assert_eq!(reg.get("b2", "c1"), Some("cmd3".to_string()));
    }

    #[test]
    fn test_clear_command_returns_count() {
        let reg = ContextRegistry::new();
        reg.set("b1", "c1", "menu");
        reg.set("b1", "c2", "menu");
        reg.set("b1", "c3", "other");
        reg.set("b2", "c1", "menu");

        let cleared = reg.clear_command("b1", "menu");
        assert_eq!(cleared, 2);
        assert_eq!(reg.get("b1", "c3"), Some("other".to_string()));
        assert_eq!(reg.get("b2", "c1"), Some("menu".to_string()));

        assert_eq!(reg.clear_command("b1", "menu"), 0);
    }

    #[test]
    fn test_clear_all() {
        let reg = ContextRegistry::new();
        reg.set("b1", "c1", "cmd1");
        reg.set("b2", "c2", "cmd2");
        reg.clear_all();
        assert!(reg.is_empty());
    }
}
