//! String key/value property bags attached to streams, ports and channels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key holding the human readable media name of a stream.
pub const MEDIA_NAME: &str = "media.name";

/// Ordered string-to-string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set `media.name` unless it is already present.
    pub fn ensure_media_name(&mut self, name: &str) {
        if !self.contains(MEDIA_NAME) {
            self.set(MEDIA_NAME, name);
        }
    }

    /// Return a copy of `self` with every entry of `other` applied on top.
    pub fn merged(&self, other: &Properties) -> Properties {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.set(k, v);
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_media_name_only_when_missing() {
        let mut props = Properties::new();
        props.ensure_media_name("mic");
        assert_eq!(props.get(MEDIA_NAME), Some("mic"));

        props.ensure_media_name("other");
        assert_eq!(props.get(MEDIA_NAME), Some("mic"));
    }

    #[test]
    fn test_merged_overrides() {
        let base = Properties::from_pairs([("a", "1"), ("b", "2")]);
        let over = Properties::from_pairs([("b", "3"), ("c", "4")]);
        let merged = base.merged(&over);

        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("3"));
        assert_eq!(merged.get("c"), Some("4"));
        assert_eq!(base.get("b"), Some("2"));
    }

    #[test]
    fn test_json_is_a_plain_object() {
        let props = Properties::from_pairs([("media.name", "cam")]);
        let json = props.to_json().unwrap();
        assert_eq!(json, r#"{"media.name":"cam"}"#);
        assert_eq!(Properties::from_json(&json).unwrap(), props);
    }
}
