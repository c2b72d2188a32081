use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::event::Event;
use crate::error::{NostrError, Result};
use crate::tag_parsing::has_tag_value;

/// Subscription filter.
///
/// Populated fields are AND-ed together; values inside one field are OR-ed. Tag constraints
/// are keyed by their single-letter name and serialize as `#<letter>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u16>>,
    pub tags: BTreeMap<char, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn hashtags<I, S>(self, hashtags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag('t', hashtags)
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject filters a relay would refuse or that can never match.
    pub fn validate(&self) -> Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(NostrError::InvalidFilter(format!(
                "since ({since}) is after until ({until})"
            )));
        }

        for name in self.tags.keys() {
            if !name.is_ascii_alphabetic() {
                return Err(NostrError::InvalidFilter(format!(
                    "tag filter key must be a single letter, got '{name}'"
                )));
            }
        }

        for (label, values) in [("ids", &self.ids), ("authors", &self.authors)] {
            if let Some(values) = values
                && let Some(bad) = values.iter().find(|value| !is_lower_hex_32(value))
            {
                return Err(NostrError::InvalidFilter(format!(
                    "{label} entry is not 64-char lowercase hex: {bad}"
                )));
            }
        }

        Ok(())
    }

    /// Local evaluation against an event. `limit` only applies to stored-event queries and
    /// is ignored here.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(name, values)| {
            let name = name.to_string();
            values
                .iter()
                .any(|value| has_tag_value(&event.tags, &name, value))
        })
    }

    fn from_json_object(object: &Map<String, Value>) -> Result<Self> {
        let mut filter = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "ids" => filter.ids = Some(field(key, value)?),
                "authors" => filter.authors = Some(field(key, value)?),
                "kinds" => filter.kinds = Some(field(key, value)?),
                "since" => filter.since = Some(field(key, value)?),
                "until" => filter.until = Some(field(key, value)?),
                "limit" => filter.limit = Some(field(key, value)?),
                tag_key if tag_key.starts_with('#') => {
                    let mut chars = tag_key.chars().skip(1);
                    let (Some(name), None) = (chars.next(), chars.next()) else {
                        return Err(NostrError::InvalidFilter(format!(
                            "tag filter key must be '#' plus one letter, got '{tag_key}'"
                        )));
                    };
                    filter.tags.insert(name, field(key, value)?);
                }
                // NIP-50 search and other extensions are not evaluated by this client.
                _ => {}
            }
        }
        Ok(filter)
    }
}

/// Union across filters: true when any filter matches.
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| filter.matches(event))
}

fn field<T: serde::de::DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|error| NostrError::InvalidFilter(format!("invalid '{key}': {error}")))
}

fn is_lower_hex_32(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

impl Serialize for Filter {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        for (name, values) in &self.tags {
            map.serialize_entry(&format!("#{name}"), values)?;
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_json_object(&object).map_err(D::Error::custom)
    }
}
