use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator between key namespaces.
pub const SEPARATOR: char = '/';

/// Hierarchical, path-like datastore key.
///
/// A `Key` is always held in its canonical form: it starts with `/`, has no
/// repeated or trailing separators, and the root key is exactly `/`. Two keys
/// are equal if and only if their canonical strings are equal.
///
/// Keys are ordered namespace by namespace, so `/a/b` sorts before `/a-b`
/// even though `-` sorts before `/` bytewise.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Build a key from any string, cleaning it into canonical form.
    ///
    /// ```
    /// use dsx_types::Key;
    ///
    /// assert_eq!(Key::new("a//b/").as_str(), "/a/b");
    /// assert_eq!(Key::new("").as_str(), "/");
    /// ```
    pub fn new(s: impl AsRef<str>) -> Self {
        Self::from_namespaces(s.as_ref().split(SEPARATOR))
    }

    /// The root key `/`.
    pub fn root() -> Self {
        Self(SEPARATOR.to_string())
    }

    /// Join a list of namespaces into a key. Empty namespaces are skipped.
    pub fn from_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = String::new();
        for ns in namespaces {
            let ns = ns.as_ref();
            if ns.is_empty() {
                continue;
            }
            out.push(SEPARATOR);
            out.push_str(ns);
        }
        if out.is_empty() {
            return Self::root();
        }
        Self(out)
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the root key `/`.
    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Iterate over the namespaces of this key. The root key has none.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> + '_ {
        self.0[1..].split(SEPARATOR).filter(|ns| !ns.is_empty())
    }

    /// Namespaces collected into a vector.
    pub fn list(&self) -> Vec<&str> {
        self.namespaces().collect()
    }

    /// The last namespace, or `""` for the root key.
    pub fn name(&self) -> &str {
        self.namespaces().last().unwrap_or("")
    }

    /// The parent key. The parent of a top-level key (and of the root) is `/`.
    pub fn parent(&self) -> Key {
        match self.0.rfind(SEPARATOR) {
            Some(0) | None => Self::root(),
            Some(idx) => Self(self.0[..idx].to_string()),
        }
    }

    /// Append `key` below this key: `/a`.child(`/b/c`) is `/a/b/c`.
    pub fn child(&self, key: &Key) -> Key {
        if self.is_root() {
            return key.clone();
        }
        if key.is_root() {
            return self.clone();
        }
        Self(format!("{}{}", self.0, key.0))
    }

    /// Returns `true` if `other` lies strictly below this key.
    ///
    /// Ancestry follows namespace boundaries: `/a` is an ancestor of `/a/b`
    /// but not of `/ab`. The root is an ancestor of every other key.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    /// Returns `true` if this key lies strictly below `other`.
    pub fn is_descendant_of(&self, other: &Key) -> bool {
        other.is_ancestor_of(self)
    }

    /// Remove `ancestor` from the front of this key.
    ///
    /// Returns `/` when the keys are equal and `None` when `ancestor` is
    /// neither equal to nor an ancestor of this key.
    pub fn strip_ancestor(&self, ancestor: &Key) -> Option<Key> {
        if ancestor.is_root() {
            return Some(self.clone());
        }
        if self == ancestor {
            return Some(Self::root());
        }
        if ancestor.is_ancestor_of(self) {
            return Some(Self(self.0[ancestor.0.len()..].to_string()));
        }
        None
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::root()
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.namespaces().cmp(other.namespaces())
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl FromStr for Key {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
