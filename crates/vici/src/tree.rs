//! In-memory tree of a parsed VICI message.

use common::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A node in a message tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Section(Section),
    List(Vec<Vec<u8>>),
    Value(Vec<u8>),
}

/// Named children of a section. Keys are unique; a repeated key replaces
/// the earlier child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    children: BTreeMap<String, Node>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, node: Node) {
        self.children.insert(name.into(), node);
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        match self.get(name)? {
            Node::Section(section) => Some(section),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[Vec<u8>]> {
        match self.get(name)? {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn value(&self, name: &str) -> Option<&[u8]> {
        match self.get(name)? {
            Node::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Value as UTF-8 text; `None` if missing, not a value, or not UTF-8.
    pub fn value_str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn require_section(&self, name: &str) -> Result<&Section> {
        self.section(name)
            .ok_or_else(|| Error::parse(format!("missing section '{}'", name)))
    }

    pub fn require_value(&self, name: &str) -> Result<&str> {
        self.value_str(name)
            .ok_or_else(|| Error::parse(format!("missing value '{}'", name)))
    }

    /// Parse a value with [`FromStr`].
    pub fn parse_value<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.require_value(name)?;
        raw.parse()
            .map_err(|e| Error::parse(format!("invalid value '{}' for '{}': {}", raw, name, e)))
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for (name, node) in &self.children {
            match node {
                Node::Section(section) => {
                    writeln!(f, "{}{} {{", pad, name)?;
                    section.write_indented(f, depth + 1)?;
                    writeln!(f, "{}}}", pad)?;
                }
                Node::List(items) => {
                    let items: Vec<_> = items.iter().map(|i| String::from_utf8_lossy(i)).collect();
                    writeln!(f, "{}{} = [{}]", pad, name, items.join(", "))?;
                }
                Node::Value(value) => {
                    writeln!(f, "{}{} = {}", pad, name, String::from_utf8_lossy(value))?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
