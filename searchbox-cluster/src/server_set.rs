use indexmap::IndexSet;
use std::fmt;

/// Ordered set of server URLs.
///
/// Keeps insertion order and collapses duplicates. A set is built once per
/// discovery cycle and moved into the client on publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSet(IndexSet<String>);

impl ServerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a URL, returning `false` if it was already present
    pub fn insert(&mut self, url: impl Into<String>) -> bool {
        self.0.insert(url.into())
    }

    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.0.contains(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ServerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for ServerSet {
    type Item = String;
    type IntoIter = indexmap::set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ServerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, url) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{url}")?;
        }
        write!(f, "]")
    }
}
