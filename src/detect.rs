//! Ingredient detection from model output text.
//!
//! The model is prompted to embed a JSON fragment listing detected
//! ingredients in its replies, but the output format is not contractually
//! guaranteed. This module does a best-effort scan for a parseable
//! fragment and falls back to an empty result on anything else; callers
//! must treat "no ingredients" and "unparseable text" identically.

use serde_json::Value;
use std::collections::HashSet;

/// One detected food item.
#[derive(Debug, Clone, PartialEq)]
pub struct IngredientHit {
    pub name: String,
    pub confidence: Option<f32>,
    pub category: Option<String>,
}

/// Scan free-form model text for an embedded ingredient list.
///
/// Accepted shapes, in order of preference:
/// - a fenced ```json block containing any of the shapes below
/// - `{"ingredients": [...]}` with object or string elements
/// - a bare array of ingredient objects or names
/// - a single object keyed `name` or `ingredient`
///
/// Returns an empty vec when nothing parseable is found.
pub fn extract_ingredients(text: &str) -> Vec<IngredientHit> {
    for body in fenced_blocks(text) {
        if let Some(hits) = parse_fragment(body) {
            return hits;
        }
    }

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' || bytes[i] == b'[' {
            if let Some(end) = balanced_end(bytes, i) {
                if let Some(hits) = parse_fragment(&text[i..=end]) {
                    return hits;
                }
                // Parsed but yielded nothing useful; skip past it.
                i = end;
            }
        }
        i += 1;
    }

    Vec::new()
}

/// Bodies of ``` fenced blocks, with an optional `json` language tag.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let start = rest.find("```")?;
        let after = &rest[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        let end = after.find("```")?;
        let body = &after[..end];
        rest = &after[end + 3..];
        Some(body.trim())
    })
}

/// Index of the bracket closing the one at `start`, honoring JSON
/// string literals and escapes.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_fragment(fragment: &str) -> Option<Vec<IngredientHit>> {
    let value: Value = serde_json::from_str(fragment).ok()?;
    let hits = hits_from_value(&value);
    if hits.is_empty() {
        None
    } else {
        Some(hits)
    }
}

fn hits_from_value(value: &Value) -> Vec<IngredientHit> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("ingredients") {
                items.iter().filter_map(hit_from_element).collect()
            } else {
                hit_from_element(value).into_iter().collect()
            }
        }
        Value::Array(items) => items.iter().filter_map(hit_from_element).collect(),
        _ => Vec::new(),
    }
}

fn hit_from_element(value: &Value) -> Option<IngredientHit> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(IngredientHit {
            name: name.trim().to_string(),
            confidence: None,
            category: None,
        }),
        Value::Object(map) => {
            let name = map
                .get("name")
                .or_else(|| map.get("ingredient"))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|n| !n.is_empty())?;
            Some(IngredientHit {
                name: name.to_string(),
                confidence: map.get("confidence").and_then(|v| v.as_f64()).map(|c| c as f32),
                category: map
                    .get("category")
                    .and_then(|v| v.as_str())
                    .map(|c| c.to_string()),
            })
        }
        _ => None,
    }
}

/// Session-scoped accumulator deduplicating hits by case-insensitive name.
#[derive(Debug, Default)]
pub struct IngredientSet {
    seen: HashSet<String>,
    items: Vec<IngredientHit>,
}

impl IngredientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a hit, returning false if an ingredient with the same
    /// (case-insensitive) name is already present.
    pub fn insert(&mut self, hit: IngredientHit) -> bool {
        if self.seen.insert(hit.name.to_lowercase()) {
            self.items.push(hit);
            true
        } else {
            false
        }
    }

    /// Insert a batch, returning only the hits that were new.
    pub fn insert_all(&mut self, hits: Vec<IngredientHit>) -> Vec<IngredientHit> {
        hits.into_iter().filter(|h| self.insert(h.clone())).collect()
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

    pub fn clear(&mut self) {
        self.seen.clear();
        self.items.clear();
    }
}
