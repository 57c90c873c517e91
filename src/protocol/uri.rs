//! CURIE prefix table and URI resolution.

use std::borrow::Cow;

/// Per-session table of `prefix -> base URI` mappings.
///
/// Entries keep their insertion order; registering an existing prefix
/// replaces its URI in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixTable {
    entries: Vec<(String, String)>,
}

impl PrefixTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `prefix` as shorthand for `uri`.
    pub fn insert(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        let uri = uri.into();
        match self.entries.iter_mut().find(|(known, _)| *known == prefix) {
            Some((_, existing)) => *existing = uri,
            None => self.entries.push((prefix, uri)),
        }
    }

    /// Base URI registered for `prefix`.
    #[must_use]
    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(known, _)| known == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Number of registered prefixes.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` if no prefix is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over `(prefix, uri)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(prefix, uri)| (prefix.as_str(), uri.as_str()))
    }

    /// Expand `value` if it is a CURIE with a registered prefix.
    ///
    /// `prefix:suffix` becomes `uri#suffix`. Values carrying an explicit
    /// `http://` or `https://` scheme are returned unchanged, as are values
    /// whose prefix is unknown.
    #[must_use]
    pub fn resolve<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if value.contains("http://") || value.contains("https://") {
            return Cow::Borrowed(value);
        }
        let Some((prefix, suffix)) = value.split_once(':') else {
            return Cow::Borrowed(value);
        };
        match self.get(prefix) {
            Some(base) => Cow::Owned(format!("{base}#{suffix}")),
            None => Cow::Borrowed(value),
        }
    }
}
