//! Token substitution over arbitrary JSON documents.
//!
//! [`transform_strings`] is the generic walk: objects keep their keys and
//! order, arrays keep their order, every string scalar is handed to a
//! callback and replaced by whatever value it returns, and all other
//! scalars are copied as-is. [`Rewriter`] plugs a [`TokenMap`] into that
//! walk.

use serde_json::{Map, Value};

use crate::tokens::TokenMap;

/// Rebuild `value`, passing every string scalar through `f`.
///
/// The result shares no structure with the input.
pub fn transform_strings<F>(value: &Value, f: &mut F) -> Value
where
    F: FnMut(&str) -> Value,
{
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), transform_strings(child, f));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| transform_strings(v, f)).collect()),
        Value::String(s) => f(s),
        other => other.clone(),
    }
}

/// Resolves placeholder tokens inside a workflow document.
///
/// A string that is exactly a token is replaced by the token's value,
/// which may change its JSON type. Any other string has each embedded
/// token occurrence replaced by the value's text form. Embedded matches
/// are found in one left-to-right scan that tries longer tokens first,
/// so substituted text is never scanned again.
pub struct Rewriter<'a> {
    tokens: &'a TokenMap,
    /// `(token, replacement text)` sorted by descending token length.
    candidates: Vec<(&'a str, String)>,
}

impl<'a> Rewriter<'a> {
    pub fn new(tokens: &'a TokenMap) -> Self {
        let mut candidates: Vec<(&str, String)> = tokens
            .iter()
            .filter(|(token, _)| !token.is_empty())
            .map(|(token, value)| (token, value_text(value)))
            .collect();
        // Stable: equal-length tokens stay in mapping order.
        candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self { tokens, candidates }
    }

    /// Produce a fully resolved copy of `document`.
    pub fn rewrite(&self, document: &Value) -> Value {
        transform_strings(document, &mut |s| self.resolve(s))
    }

    /// Resolve a single string scalar.
    pub fn resolve(&self, s: &str) -> Value {
        if let Some(value) = self.tokens.get(s) {
            return value.clone();
        }
        Value::String(self.substitute(s))
    }

    fn substitute(&self, s: &str) -> String {
        if !self.candidates.iter().any(|(token, _)| s.contains(token)) {
            return s.to_string();
        }

        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        'scan: while !rest.is_empty() {
            for (token, replacement) in &self.candidates {
                if let Some(tail) = rest.strip_prefix(token) {
                    out.push_str(replacement);
                    rest = tail;
                    continue 'scan;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
        out
    }
}

/// Rewrite `document` with `tokens`. See [`Rewriter`].
pub fn replace_tokens(document: &Value, tokens: &TokenMap) -> Value {
    Rewriter::new(tokens).rewrite(document)
}

/// Text form of a token value for embedding inside a larger string.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
