//! A single emulator argument: `-name value,id=...,key=value,flag`
//!
//! Arguments are immutable values. Every update returns a new argument.
//! Identity for merging is the pair `(name, id)`.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, Result};

/// Attribute key that carries an argument's identity.
pub const ID_KEY: &str = "id";

/// Insertion-ordered attribute mapping.
///
/// A `None` value is a presence flag (rendered as a bare `key`).
/// Equality ignores order: two mappings are equal when they hold the same
/// keys with the same values.
#[derive(Debug, Clone, Default, Eq)]
pub struct Attributes {
    entries: Vec<(String, Option<String>)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a `key=value` attribute.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    /// Builder-style insert of a presence flag.
    pub fn with_flag(mut self, key: impl Into<String>) -> Self {
        self.insert(key, None);
        self
    }

    /// Look up a key. The outer `Option` is presence, the inner one the value.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or overwrite. An existing key keeps its position; a new key goes last.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) -> Option<Option<String>> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k) == Some(v.as_deref()))
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (k, v) in iter {
            attributes.insert(k, v);
        }
        attributes
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// One emulator argument.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Argument {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    attributes: Attributes,
}

impl Argument {
    /// Create an argument, validating its name and id.
    pub fn new(name: impl Into<String>, value: Option<String>, attributes: Attributes) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        match attributes.get(ID_KEY) {
            Some(None) | Some(Some("")) => return Err(Error::InvalidIdentity { name }),
            _ => {}
        }
        Ok(Self {
            name,
            value,
            attributes,
        })
    }

    /// Argument with neither a positional value nor attributes.
    pub fn bare(name: impl Into<String>) -> Result<Self> {
        Self::new(name, None, Attributes::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The `id` attribute, if assigned. Always non-empty when present.
    pub fn id_value(&self) -> Option<&str> {
        self.attributes.get(ID_KEY).flatten()
    }

    /// True when both arguments share `(name, id)`.
    pub fn id_matches(&self, other: &Argument) -> bool {
        self.name == other.name && self.id_value() == other.id_value()
    }

    pub fn replace_value(&self, value: Option<String>) -> Argument {
        Argument {
            value,
            ..self.clone()
        }
    }

    /// Overlay `new_values` onto the attributes.
    ///
    /// Existing keys keep their position, new keys are appended in the
    /// order of `new_values`. Once an id is assigned, `new_values` must
    /// carry the same id.
    pub fn update_arguments(&self, new_values: &Attributes) -> Result<Argument> {
        if let Some(current) = self.id_value() {
            let requested = match new_values.get(ID_KEY) {
                Some(Some(id)) if id == current => None,
                Some(Some(id)) => Some(format!("changed to '{}'", id)),
                Some(None) => Some("cleared".to_string()),
                None => Some("dropped by an update without id".to_string()),
            };
            if let Some(requested) = requested {
                return Err(Error::IdentityConflict {
                    name: self.name.clone(),
                    current: current.to_string(),
                    requested,
                });
            }
        }

        let mut attributes = self.attributes.clone();
        for (k, v) in new_values.iter() {
            attributes.insert(k, v.map(str::to_string));
        }
        Argument::new(self.name.clone(), self.value.clone(), attributes)
    }

    /// Drop the named attributes. Names that are not set are ignored.
    pub fn remove_arguments(&self, names: &[&str]) -> Result<Argument> {
        if names.contains(&ID_KEY) {
            return Err(Error::IdentityConflict {
                name: self.name.clone(),
                current: self.id_value().unwrap_or("(unset)").to_string(),
                requested: "removed".to_string(),
            });
        }

        let mut attributes = self.attributes.clone();
        for name in names {
            attributes.remove(name);
        }
        Ok(Argument {
            attributes,
            ..self.clone()
        })
    }
}
