//! In-place text search over the loaded messages of the active conversation.

use squadlink_messaging::{Message, MessageId};
use std::time::Duration;

/// Presentation hint: scroll to and flash this message, then clear after `clear_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub message_id: MessageId,
    pub clear_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Matches { count: usize, first: Highlight },
    NoResults,
    /// Blank query; any previous cursor was dropped.
    Cleared,
}

/// Snapshot of the cursor for the view model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    pub query: String,
    pub matches: Vec<MessageId>,
    pub current: Option<usize>,
}

impl SearchState {
    pub fn no_results(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn current_match(&self) -> Option<&MessageId> {
        self.current.and_then(|i| self.matches.get(i))
    }
}

#[derive(Debug)]
pub struct MessageSearchIndex {
    highlight_for: Duration,
    query: Option<String>,
    matches: Vec<MessageId>,
    current: Option<usize>,
}

impl MessageSearchIndex {
    pub fn new(highlight_for: Duration) -> Self {
        Self {
            highlight_for,
            query: None,
            matches: Vec::new(),
            current: None,
        }
    }

    /// Replace the cursor with the matches of `query` among `messages`, in the order given.
    pub fn search<'a>(
        &mut self,
        query: &str,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> SearchOutcome {
        self.clear();
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return SearchOutcome::Cleared;
        }

        let needle = trimmed.to_lowercase();
        self.matches = messages
            .into_iter()
            .filter(|m| m.text_contains(&needle))
            .map(|m| m.id.clone())
            .collect();
        self.query = Some(trimmed.to_string());

        if self.matches.is_empty() {
            return SearchOutcome::NoResults;
        }
        self.current = Some(0);
        SearchOutcome::Matches {
            count: self.matches.len(),
            first: self.highlight(0),
        }
    }

    /// Step to the next match, wrapping from the last to the first.
    pub fn next(&mut self) -> Option<Highlight> {
        let len = self.matches.len();
        let index = match self.current {
            _ if len == 0 => return None,
            Some(i) => (i + 1) % len,
            None => 0,
        };
        self.current = Some(index);
        Some(self.highlight(index))
    }

    /// Step to the previous match, wrapping from the first to the last.
    pub fn previous(&mut self) -> Option<Highlight> {
        let len = self.matches.len();
        let index = match self.current {
            _ if len == 0 => return None,
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.current = Some(index);
        Some(self.highlight(index))
    }

    fn highlight(&self, index: usize) -> Highlight {
        Highlight {
            message_id: self.matches[index].clone(),
            clear_after: self.highlight_for,
        }
    }

    /// Follow a message whose id changed on confirmation.
    pub fn retarget(&mut self, old: &MessageId, new: &MessageId) {
        for id in self.matches.iter_mut().filter(|id| *id == old) {
            *id = new.clone();
        }
    }

    /// Drop a message that left the thread, keeping the cursor on a valid match.
    pub fn forget(&mut self, id: &MessageId) {
        let Some(position) = self.matches.iter().position(|m| m == id) else {
            return;
        };
        self.matches.remove(position);
        self.current = match self.current {
            _ if self.matches.is_empty() => None,
            Some(current) if current > position => Some(current - 1),
            Some(current) if current >= self.matches.len() => Some(0),
            other => other,
        };
    }

    pub fn clear(&mut self) {
        self.query = None;
        self.matches.clear();
        self.current = None;
    }

    pub fn is_active(&self) -> bool {
        self.query.is_some()
    }

    pub fn state(&self) -> Option<SearchState> {
        self.query.as_ref().map(|query| SearchState {
            query: query.clone(),
            matches: self.matches.clone(),
            current: self.current,
        })
    }
}
