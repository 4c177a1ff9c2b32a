use std::collections::HashMap;

use chat_api::Message;

/// Deduplicated, time ordered message list of one room activation.
#[derive(Debug, Clone, Default)]
pub struct MessageView {
    items: Vec<Message>,
}

impl MessageView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in display order (oldest first).
    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Merge a batch into the view. Entries are keyed by id and a later
    /// write replaces an earlier one. The result is ordered by
    /// `(created_at, id)` and only swapped in once fully built.
    ///
    /// Returns true when the visible list changed.
    pub fn merge<I>(&mut self, incoming: I) -> bool
    where
        I: IntoIterator<Item = Message>,
    {
        let mut by_id: HashMap<String, Message> = self
            .items
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
        for msg in incoming {
            by_id.insert(msg.id.clone(), msg);
        }
        let mut merged: Vec<Message> = by_id.into_values().collect();
        merged.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if merged == self.items {
            return false;
        }
        self.items = merged;
        true
    }

    /// Oldest message currently held.
    pub fn oldest(&self) -> Option<&Message> {
        self.items.first()
    }

    /// Newest message currently held.
    pub fn newest(&self) -> Option<&Message> {
        self.items.last()
    }
}
