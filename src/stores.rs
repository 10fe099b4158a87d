//! In-memory stores backing the UI lists.
//!
//! Plain single-owner collections; no persistence. Ingredient names are
//! deduplicated case-insensitively, matching the detection accumulator.

use crate::detect::IngredientHit;
use chrono::{DateTime, Utc};

/// Pantry contents as confirmed by the user.
#[derive(Debug, Default)]
pub struct IngredientStore {
    items: Vec<IngredientHit>,
}

impl IngredientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one ingredient. Returns false when an entry with the same
    /// name (case-insensitive) already exists.
    pub fn add(&mut self, hit: IngredientHit) -> bool {
        if self.contains(&hit.name) {
            return false;
        }
        self.items.push(hit);
        true
    }

    /// Merge detected hits, keeping only names not already present.
    pub fn extend(&mut self, hits: impl IntoIterator<Item = IngredientHit>) -> usize {
        hits.into_iter().filter(|hit| self.add(hit.clone())).count()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let folded = name.to_lowercase();
        let before = self.items.len();
        self.items.retain(|item| item.name.to_lowercase() != folded);
        self.items.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        let folded = name.to_lowercase();
        self.items.iter().any(|item| item.name.to_lowercase() == folded)
    }

    pub fn items(&self) -> &[IngredientHit] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ToCookItem {
    pub title: String,
    pub done: bool,
    pub added_at: DateTime<Utc>,
}

/// Queue of dishes the user intends to cook.
#[derive(Debug, Default)]
pub struct ToCookStore {
    items: Vec<ToCookItem>,
}

impl ToCookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, title: impl Into<String>) {
        self.items.push(ToCookItem {
            title: title.into(),
            done: false,
            added_at: Utc::now(),
        });
    }

    /// Flip the done flag at `index`. Returns the new value, or `None`
    /// when the index is out of range.
    pub fn toggle_done(&mut self, index: usize) -> Option<bool> {
        let item = self.items.get_mut(index)?;
        item.done = !item.done;
        Some(item.done)
    }

    pub fn remove(&mut self, index: usize) -> Option<ToCookItem> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn items(&self) -> &[ToCookItem] {
        &self.items
    }

    pub fn pending(&self) -> impl Iterator<Item = &ToCookItem> {
        self.items.iter().filter(|item| !item.done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Ordered conversation history for the chat screen.
#[derive(Debug, Default)]
pub struct ChatLog {
    turns: Vec<ChatTurn>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(ChatRole::User, text);
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(ChatRole::Assistant, text);
    }

    fn push(&mut self, role: ChatRole, text: impl Into<String>) {
        self.turns.push(ChatTurn {
            role,
            text: text.into(),
            at: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }
}
