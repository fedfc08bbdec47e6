//! Array paths and their symbolic rendering
//!
//! An [`ArrayPath`] is the canonical address of a tree node: an ordered list of
//! field and index selectors. Its symbolic form (`a.b[2].c`) is used as a map
//! key and for cross-referencing dependencies. Converting between the two is
//! lossless.

use std::fmt;

use crate::error::{Error, Result};

/// A single step in an [`ArrayPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subpath {
    /// A key in a mapping (e.g., "database" in "database.host")
    Field(String),
    /// An index in a sequence (e.g., 0 in "servers[0]")
    Index(usize),
}

impl Subpath {
    /// Build a field selector
    pub fn field(name: impl Into<String>) -> Self {
        Subpath::Field(name.into())
    }

    /// Build an index selector
    pub fn index(i: usize) -> Self {
        Subpath::Index(i)
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Subpath::Field(_))
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Subpath::Index(_))
    }

    /// Is this a field selector with the given name?
    pub fn is_named_field(&self, name: &str) -> bool {
        matches!(self, Subpath::Field(f) if f == name)
    }

    pub fn as_field(&self) -> Option<&str> {
        match self {
            Subpath::Field(f) => Some(f),
            Subpath::Index(_) => None,
        }
    }
}

/// Ordered sequence of [`Subpath`] selectors addressing a node from the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArrayPath(Vec<Subpath>);

impl ArrayPath {
    /// The empty path (the root itself)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(subpaths: Vec<Subpath>) -> Self {
        Self(subpaths)
    }

    /// Split a symbolic path into its selectors.
    ///
    /// Supports: "key", "key.subkey", "key[0]", "key[0].subkey", "m[0][1]".
    /// The empty string is the root path.
    pub fn parse(sympath: &str) -> Result<Self> {
        let mut subpaths = Vec::new();
        let mut current = String::new();
        let mut chars = sympath.chars().peekable();
        // A field is required at the start and after every '.'
        let mut expect_field = !sympath.is_empty();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !current.is_empty() {
                        subpaths.push(Subpath::Field(std::mem::take(&mut current)));
                    } else if !matches!(subpaths.last(), Some(Subpath::Index(_))) || expect_field {
                        return Err(Error::invalid_path(sympath, "Empty field name"));
                    }
                    expect_field = true;
                }
                '[' => {
                    if !current.is_empty() {
                        subpaths.push(Subpath::Field(std::mem::take(&mut current)));
                    } else if expect_field {
                        return Err(Error::invalid_path(sympath, "Index without a field"));
                    }
                    let mut index_str = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        index_str.push(c);
                    }
                    if !closed {
                        return Err(Error::invalid_path(sympath, "Unclosed '[' in path"));
                    }
                    let idx: usize = index_str.parse().map_err(|_| {
                        Error::invalid_path(
                            sympath,
                            format!("Invalid array index in path: {}", index_str),
                        )
                    })?;
                    subpaths.push(Subpath::Index(idx));
                    expect_field = false;
                    if let Some(&next) = chars.peek() {
                        if next != '.' && next != '[' {
                            return Err(Error::invalid_path(
                                sympath,
                                format!("Unexpected '{}' after index", next),
                            ));
                        }
                    }
                }
                ']' => {
                    return Err(Error::invalid_path(sympath, "Unexpected ']' in path"));
                }
                _ => {
                    current.push(c);
                    expect_field = false;
                }
            }
        }

        if !current.is_empty() {
            subpaths.push(Subpath::Field(current));
        } else if expect_field {
            return Err(Error::invalid_path(sympath, "Path ends with '.'"));
        }

        Ok(Self(subpaths))
    }

    /// Render the symbolic form of this path
    pub fn join(&self) -> String {
        self.to_string()
    }

    pub fn subpaths(&self) -> &[Subpath] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Subpath> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Subpath> {
        self.0.last()
    }

    /// A new path with `subpath` appended
    pub fn child(&self, subpath: Subpath) -> Self {
        let mut next = self.0.clone();
        next.push(subpath);
        Self(next)
    }

    pub fn push(&mut self, subpath: Subpath) {
        self.0.push(subpath);
    }

    /// The path of the enclosing branch (root for top-level nodes)
    pub fn parent(&self) -> Self {
        let mut parent = self.0.clone();
        parent.pop();
        Self(parent)
    }

    /// This path followed by every selector of `other`
    pub fn concat(&self, other: &ArrayPath) -> Self {
        let mut joined = self.0.clone();
        joined.extend(other.0.iter().cloned());
        Self(joined)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subpath> {
        self.0.iter()
    }
}

impl fmt::Display for ArrayPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, subpath) in self.0.iter().enumerate() {
            match subpath {
                Subpath::Field(name) if i == 0 => write!(f, "{}", name)?,
                Subpath::Field(name) => write!(f, ".{}", name)?,
                Subpath::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

impl From<Vec<Subpath>> for ArrayPath {
    fn from(v: Vec<Subpath>) -> Self {
        Self(v)
    }
}

impl std::str::FromStr for ArrayPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'a> IntoIterator for &'a ArrayPath {
    type Item = &'a Subpath;
    type IntoIter = std::slice::Iter<'a, Subpath>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
