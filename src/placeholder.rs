use std::collections::BTreeMap;

use crate::error::Error;

const OPEN: char = '{';
const CLOSE: char = '}';

/// Named `{token}` replacements applied to URL components, headers and form
/// fields right before a request is sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> crate::Result<()> {
        let name = name.into();
        let value = value.into();
        if contains_delimiter(&name) || contains_delimiter(&value) {
            return Err(Error::InvalidPlaceholder { name });
        }
        self.values.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Replaces every occurrence of each configured token in `text`.
    ///
    /// Each token is handled in its own pass; a replacement value is never
    /// searched again for the token that produced it.
    pub fn apply(&self, text: &str) -> String {
        let mut resolved = text.to_owned();
        for (name, value) in &self.values {
            let token = format!("{OPEN}{name}{CLOSE}");
            let mut from = 0;
            while let Some(offset) = resolved[from..].find(&token) {
                let start = from + offset;
                resolved.replace_range(start..start + token.len(), value);
                from = start + value.len();
            }
        }
        resolved
    }
}

fn contains_delimiter(text: &str) -> bool {
    text.contains(OPEN) || text.contains(CLOSE)
}
