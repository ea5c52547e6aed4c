//! Prefix-trie event registry shared by the v11 and v12 collators.
//!
//! Mirrors the original `pygtrie`-backed collator, but since Rust schemas
//! are known at construction time (not discovered through runtime
//! reflection), registration takes an explicit literal key path instead of
//! inspecting a model's fields.

use std::collections::HashMap;

use thiserror::Error;

/// A single discriminator position: either a plain field, or a group of
/// mutually-exclusive alternative fields (e.g. v11's
/// `message_type`/`notice_type`/`request_type`/`meta_event_type`).
#[derive(Debug, Clone, Copy)]
pub enum KeySpec {
    Field(&'static str),
    Group(&'static [&'static str]),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollatorError {
    #[error("more than one alternative present in a grouped discriminator: {0:?}")]
    AmbiguousGroup(Vec<String>),
    #[error("empty key segment precedes a non-empty one in the same path")]
    InvalidKeyOrder,
}

/// At most one of `fields` may be `Some`; returns that one value (or `None`
/// if none are present). Used to resolve a grouped [`KeySpec::Group`].
pub fn extract_group<'a>(fields: &[Option<&'a str>]) -> Result<Option<&'a str>, CollatorError> {
    let mut present = fields.iter().filter_map(|f| *f);
    let first = present.next();
    if present.next().is_some() {
        return Err(CollatorError::AmbiguousGroup(
            fields.iter().flatten().map(|s| s.to_string()).collect(),
        ));
    }
    Ok(first)
}

const SEPARATOR: char = '/';

/// Generic prefix-trie registry. `V` is whatever a registration maps to —
/// typically a parse function or an enum tag identifying a concrete schema.
pub struct Collator<V> {
    name: &'static str,
    keys: Vec<KeySpec>,
    tree: HashMap<String, V>,
}

impl<V> Collator<V> {
    pub fn new(name: &'static str, keys: Vec<KeySpec>) -> Self {
        Self {
            name,
            keys,
            tree: HashMap::new(),
        }
    }

    pub fn keys(&self) -> &[KeySpec] {
        &self.keys
    }

    /// Register `value` under the literal key path. `literals` must have
    /// the same length as `self.keys`; `None` marks an unconstrained
    /// (wildcard) position. Collisions overwrite the previous value and
    /// are logged.
    pub fn register(
        &mut self,
        literals: &[Option<&str>],
        value: V,
    ) -> Result<(), CollatorError> {
        let path = generate_key(literals)?;
        if self.tree.contains_key(&path) {
            tracing::debug!(
                collator = self.name,
                path = %path,
                "schema registration overrides an existing entry"
            );
        }
        self.tree.insert(path, value);
        Ok(())
    }

    /// Returns the values registered at every prefix of the payload's key,
    /// deepest (most specific) first.
    pub fn classify(&self, literals: &[Option<&str>]) -> Result<Vec<&V>, CollatorError> {
        let path = generate_key(literals)?;
        let mut prefixes = vec![String::new()];
        let mut acc = String::new();
        for seg in path.split(SEPARATOR).skip(1) {
            if seg.is_empty() {
                continue;
            }
            acc.push(SEPARATOR);
            acc.push_str(seg);
            prefixes.push(acc.clone());
        }
        Ok(prefixes
            .iter()
            .rev()
            .filter_map(|p| self.tree.get(p))
            .collect())
    }
}

/// Builds the `"" / k1 / k2 / ..."` path, dropping trailing empty keys and
/// rejecting an empty key that precedes a non-empty one.
fn generate_key(literals: &[Option<&str>]) -> Result<String, CollatorError> {
    let mut seen_gap = false;
    for v in literals {
        if v.is_none() {
            seen_gap = true;
        } else if seen_gap {
            return Err(CollatorError::InvalidKeyOrder);
        }
    }
    let mut parts = vec![String::new()];
    for v in literals.iter().flatten() {
        parts.push((*v).to_owned());
    }
    Ok(parts.join(&SEPARATOR.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_build_and_lookup() {
        let mut c: Collator<&'static str> = Collator::new("test", vec![
            KeySpec::Field("type"),
            KeySpec::Field("detail_type"),
        ]);
        c.register(&[None, None], "TestModel").unwrap();
        c.register(&[Some("message"), None], "MessageModel").unwrap();
        c.register(&[Some("message"), Some("private")], "PrivateModel")
            .unwrap();

        let models = c.classify(&[Some("not_exists"), None]).unwrap();
        assert_eq!(models, vec![&"TestModel"]);

        let models = c.classify(&[Some("message"), Some("private")]).unwrap();
        assert_eq!(models, vec![&"PrivateModel", &"MessageModel", &"TestModel"]);

        let models = c.classify(&[Some("message"), Some("not_exists")]).unwrap();
        assert_eq!(models, vec![&"MessageModel", &"TestModel"]);
    }

    #[test]
    fn later_registration_wins_on_collision() {
        let mut c: Collator<&'static str> = Collator::new("test", vec![KeySpec::Field("type")]);
        c.register(&[Some("message")], "First").unwrap();
        c.register(&[Some("message")], "Second").unwrap();
        let models = c.classify(&[Some("message")]).unwrap();
        assert_eq!(models, vec![&"Second"]);
    }

    #[test]
    fn grouped_key_rejects_multiple_alternatives() {
        let fields = [Some("a"), Some("b")];
        assert!(matches!(
            extract_group(&fields),
            Err(CollatorError::AmbiguousGroup(_))
        ));
    }

    #[test]
    fn gap_before_literal_is_rejected() {
        let mut c: Collator<&'static str> = Collator::new("test", vec![
            KeySpec::Field("a"),
            KeySpec::Field("b"),
        ]);
        assert!(c.register(&[None, Some("x")], "Bad").is_err());
    }

    #[test]
    fn every_registered_schema_classifies_to_itself_first() {
        let mut c: Collator<&'static str> = Collator::new("test", vec![
            KeySpec::Field("post_type"),
            KeySpec::Field("message_type"),
        ]);
        c.register(&[Some("message"), None], "Message").unwrap();
        c.register(&[Some("message"), Some("private")], "Private")
            .unwrap();
        let result = c.classify(&[Some("message"), Some("private")]).unwrap();
        assert_eq!(result[0], &"Private");
    }
}
