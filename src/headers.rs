//! Case-insensitive, insertion-ordered header multimap.
//!
//! Lookups use the lower-cased header name, while the casing supplied the
//! first time a name is seen is the one transmitted on the wire. Repeated
//! names accumulate values instead of replacing them.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderValues {
    name: String,
    values: Vec<String>,
}

impl HeaderValues {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lookup_key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn first(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    /// Values joined by `", "` in insertion order, the form used on the wire.
    pub fn joined(&self) -> String {
        self.values.join(", ")
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<HeaderValues>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.entries.push(HeaderValues::new(name));
                self.entries.len() - 1
            }
        };
        self.entries[index]
            .values
            .extend(values.into_iter().map(Into::into));
    }

    /// Replaces every value recorded under `name` (any casing) with `values`.
    pub fn set<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.remove(name);
        self.append(name, values);
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValues> {
        self.entries.iter().find(|entry| entry.matches(name))
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValues::first)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValues> {
        let index = self.position(name)?;
        Some(self.entries.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HeaderValues> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.matches(name))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a HeaderValues;
    type IntoIter = std::slice::Iter<'a, HeaderValues>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), [value]);
        }
        headers
    }
}
