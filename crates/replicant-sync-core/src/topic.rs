//! Topic identifiers and the registry of tracked topics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies one replicant: the owning bundle's namespace plus the replicant name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey {
    /// Owning bundle (e.g., "ipl-overlay-controls")
    pub namespace: String,
    /// Replicant name, unique within the namespace (e.g., "scoreboardData")
    pub name: String,
}

impl TopicKey {
    /// Create a new topic key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` pair.
    ///
    /// The namespace is everything before the first `/`.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let (namespace, name) = input.split_once('/')?;
        if namespace.trim().is_empty() || name.trim().is_empty() {
            return None;
        }
        Some(Self::new(namespace.trim(), name.trim()))
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The fixed set of topics a session synchronizes, grouped by namespace.
///
/// Decided by the embedding caller and only replaced by reconfiguring the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicRegistry {
    namespaces: BTreeMap<String, Vec<String>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single topic. Duplicates are ignored.
    pub fn insert(&mut self, key: TopicKey) {
        let names = self.namespaces.entry(key.namespace).or_default();
        if !names.contains(&key.name) {
            names.push(key.name);
        }
    }

    /// Register every name under `namespace`.
    #[must_use]
    pub fn with_namespace<I, S>(mut self, namespace: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.insert(TopicKey::new(namespace, name));
        }
        self
    }

    /// Whether the topic is tracked.
    #[must_use]
    pub fn contains(&self, key: &TopicKey) -> bool {
        self.contains_parts(&key.namespace, &key.name)
    }

    /// Whether the topic is tracked, without building a key.
    #[must_use]
    pub fn contains_parts(&self, namespace: &str, name: &str) -> bool {
        self.namespaces
            .get(namespace)
            .is_some_and(|names| names.iter().any(|n| n == name))
    }

    /// All tracked namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// All tracked topics, grouped by namespace in registration order.
    pub fn topics(&self) -> impl Iterator<Item = TopicKey> + '_ {
        self.namespaces
            .iter()
            .flat_map(|(ns, names)| names.iter().map(move |name| TopicKey::new(ns, name)))
    }

    /// Number of tracked topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.values().map(Vec::len).sum()
    }

    /// Whether no topic is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<TopicKey> for TopicRegistry {
    fn from_iter<T: IntoIterator<Item = TopicKey>>(iter: T) -> Self {
        let mut registry = Self::new();
        for key in iter {
            registry.insert(key);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_key_display_and_parse() {
        let key = TopicKey::new("pkgA", "score");
        assert_eq!(key.to_string(), "pkgA/score");
        assert_eq!(TopicKey::parse("pkgA/score"), Some(key));
        assert_eq!(TopicKey::parse("pkgA/"), None);
        assert_eq!(TopicKey::parse("score"), None);
    }

    #[test]
    fn registry_membership() {
        let registry = TopicRegistry::new()
            .with_namespace("pkgA", ["score", "teams", "score"])
            .with_namespace("nodecg", ["bundles"]);

        assert_eq!(registry.len(), 3);
        assert!(registry.contains(&TopicKey::new("pkgA", "teams")));
        assert!(!registry.contains(&TopicKey::new("pkgB", "teams")));
        assert!(!registry.contains_parts("pkgA", "missing"));
        assert_eq!(registry.namespaces().collect::<Vec<_>>(), ["nodecg", "pkgA"]);
    }

    #[test]
    fn registry_deserializes_from_namespace_map() {
        let registry: TopicRegistry =
            serde_json::from_str(r#"{"pkgA": ["score"], "pkgB": ["a", "b"]}"#).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains_parts("pkgB", "b"));
    }
}
