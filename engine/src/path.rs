//! Path model and canonical string codec.
//!
//! A path addresses one position inside a JSON-like value tree. Each segment
//! is either an object key or an array index. Paths render to a canonical,
//! order-preserving string form where every segment is bracketed:
//!
//! - string segment: `['key']`, with embedded quotes doubled (`['it''s']`)
//! - index segment: `[3]`
//!
//! The canonical form is designed so that plain lexicographic comparison of
//! path strings agrees with structural comparison of paths: a string segment
//! always sorts before an index segment at the same position (`'` precedes
//! every decimal digit), and a prefix path always sorts before its
//! descendants. Index segments therefore compare by their decimal rendering,
//! which is what [`EntityPath`]'s `Ord` implements.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One step of a path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Object key
    Key(String),
    /// Array index
    Index(u64),
}

impl Segment {
    /// Render this segment in canonical bracketed form.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            Segment::Key(key) => {
                out.push_str("['");
                for ch in key.chars() {
                    if ch == '\'' {
                        out.push('\'');
                    }
                    out.push(ch);
                }
                out.push_str("']");
            }
            Segment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }

    /// Whether this segment is an object key.
    pub fn is_key(&self) -> bool {
        matches!(self, Segment::Key(_))
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    /// Ordering matches lexicographic comparison of the canonical encoding.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // `'` precedes every digit, so keys sort before indices.
            (Segment::Key(_), Segment::Index(_)) => Ordering::Less,
            (Segment::Index(_), Segment::Key(_)) => Ordering::Greater,
            _ => self.encode().cmp(&other.encode()),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<u64> for Segment {
    fn from(index: u64) -> Self {
        Segment::Index(index)
    }
}

/// How two paths relate to one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathRelationship {
    /// Paths are identical
    Equal,
    /// The first path is a strict prefix of the second
    Ancestor,
    /// The second path is a strict prefix of the first
    Descendant,
    /// Neither contains the other
    None,
}

/// A read-target path: any mix of key and index segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityPath(Vec<Segment>);

impl EntityPath {
    /// The empty (root) path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments.
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self(segments.into_iter().collect())
    }

    /// The segments of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a segment.
    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    /// This path extended by a relative sub-path.
    pub fn join(&self, relative: &[Segment]) -> Self {
        let mut path = self.clone();
        path.0.extend(relative.iter().cloned());
        path
    }

    /// The segments of `self` below `ancestor`, or `None` when `ancestor`
    /// does not contain `self`.
    pub fn strip_prefix(&self, ancestor: &EntityPath) -> Option<&[Segment]> {
        if self.0.len() < ancestor.0.len() || self.0[..ancestor.0.len()] != ancestor.0[..] {
            return None;
        }
        Some(&self.0[ancestor.0.len()..])
    }

    /// Classify how `self` relates to `other`.
    pub fn relationship(&self, other: &EntityPath) -> PathRelationship {
        let shared = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if shared < self.0.len() && shared < other.0.len() {
            PathRelationship::None
        } else if self.0.len() == other.0.len() {
            PathRelationship::Equal
        } else if self.0.len() < other.0.len() {
            PathRelationship::Ancestor
        } else {
            PathRelationship::Descendant
        }
    }
}

impl Ord for EntityPath {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                // Differing canonical segments never prefix one another
                // (quote doubling keeps `']` unambiguous), so the first
                // differing segment decides the full-string comparison.
                order => return order,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for EntityPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for segment in &self.0 {
            segment.encode_into(&mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for EntityPath {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        parse_path(text)
    }
}

impl From<NodePath> for EntityPath {
    fn from(path: NodePath) -> Self {
        EntityPath(path.0.into_iter().map(Segment::Key).collect())
    }
}

impl<S: Into<Segment>> FromIterator<S> for EntityPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        EntityPath(iter.into_iter().map(Into::into).collect())
    }
}

/// A write-target path: key segments only.
///
/// Leaves are always created under object keys; array positions come into
/// existence through values, not through writes addressed at indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// The empty (root) path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from key segments.
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The key segments of this path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Convert into the general path form.
    pub fn to_entity_path(&self) -> EntityPath {
        self.clone().into()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_entity_path().fmt(f)
    }
}

impl<S: Into<String>> FromIterator<S> for NodePath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        NodePath(iter.into_iter().map(Into::into).collect())
    }
}

/// Parse a canonical path string back into a path.
///
/// Inverse of [`EntityPath`]'s `Display`. Fails on unmatched brackets,
/// unescaped quotes and tokens outside brackets.
pub fn parse_path(text: &str) -> Result<EntityPath> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'[' {
            return Err(Error::MalformedPath(format!(
                "expected '[' at byte {pos} of {text:?}"
            )));
        }
        pos += 1;
        if pos >= bytes.len() {
            return Err(Error::MalformedPath(format!("unmatched bracket in {text:?}")));
        }

        if bytes[pos] == b'\'' {
            pos += 1;
            let mut key = String::new();
            loop {
                match next_char(text, pos) {
                    None => {
                        return Err(Error::MalformedPath(format!(
                            "unterminated quote in {text:?}"
                        )))
                    }
                    Some(('\'', after)) => {
                        // Doubled quote is a literal quote; a single quote
                        // terminates the key.
                        if bytes.get(after) == Some(&b'\'') {
                            key.push('\'');
                            pos = after + 1;
                        } else {
                            pos = after;
                            break;
                        }
                    }
                    Some((ch, after)) => {
                        key.push(ch);
                        pos = after;
                    }
                }
            }
            if bytes.get(pos) != Some(&b']') {
                return Err(Error::MalformedPath(format!(
                    "expected ']' after quoted key in {text:?}"
                )));
            }
            pos += 1;
            segments.push(Segment::Key(key));
        } else {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == start {
                return Err(Error::MalformedPath(format!(
                    "expected quoted key or index at byte {start} of {text:?}"
                )));
            }
            if bytes.get(pos) != Some(&b']') {
                return Err(Error::MalformedPath(format!("unmatched bracket in {text:?}")));
            }
            let index = text[start..pos]
                .parse::<u64>()
                .map_err(|_| Error::MalformedPath(format!("index out of range in {text:?}")))?;
            pos += 1;
            segments.push(Segment::Index(index));
        }
    }

    Ok(EntityPath(segments))
}

fn next_char(text: &str, pos: usize) -> Option<(char, usize)> {
    let ch = text[pos..].chars().next()?;
    Some((ch, pos + ch.len_utf8()))
}

/// Classify how path string `a` relates to path string `b` using prefix
/// comparison alone.
///
/// Both inputs must be canonical path strings. Because every segment opens
/// with `[` and quote doubling keeps `']` unambiguous inside keys, a
/// canonical string that prefixes another at a `[` boundary denotes an
/// ancestor path. This is the hot-path variant used by the trie and by
/// subscription matching; it never parses.
pub fn string_relationship(a: &str, b: &str) -> PathRelationship {
    if a == b {
        return PathRelationship::Equal;
    }
    if let Some(rest) = b.strip_prefix(a) {
        if rest.starts_with('[') {
            return PathRelationship::Ancestor;
        }
        return PathRelationship::None;
    }
    if let Some(rest) = a.strip_prefix(b) {
        if rest.starts_with('[') {
            return PathRelationship::Descendant;
        }
    }
    PathRelationship::None
}
