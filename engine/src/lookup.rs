//! Path-classification trie over the current leaf set.
//!
//! [`NodeLookup`] is the authority consulted before any write is accepted:
//! it answers, in one walk of the query path, whether a path denotes an
//! existing leaf, sits above one (ancestor), spans a set of descendant
//! leaves, or touches nothing. Keeping the leaf set an antichain (no leaf
//! above or below another) is the caller's job; the trie only reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::{EntityPath, Segment};

/// The relationship between a queried path and the current leaf set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    /// No leaf relates to the query path
    None,
    /// The query path is itself a leaf
    Leaf,
    /// A leaf lies strictly above the query path
    Ancestor,
    /// Zero or more leaves lie strictly below the query path
    Descendants,
}

/// Result of classifying a path against the leaf set.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub match_type: MatchType,
    /// The related leaf paths: one for `Leaf`/`Ancestor`, all matched
    /// leaves in depth-first order for `Descendants`, empty for `None`.
    pub paths: Vec<EntityPath>,
}

impl Classification {
    fn none() -> Self {
        Self {
            match_type: MatchType::None,
            paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    children: BTreeMap<Segment, Node>,
    leaf: bool,
}

impl Node {
    fn collect_leaves(&self, prefix: &EntityPath, out: &mut Vec<EntityPath>) {
        if self.leaf {
            out.push(prefix.clone());
        }
        for (segment, child) in &self.children {
            child.collect_leaves(&prefix.child(segment.clone()), out);
        }
    }
}

/// Trie over the leaf paths currently present in the store.
#[derive(Debug, Clone, Default)]
pub struct NodeLookup {
    root: Node,
    len: usize,
}

impl NodeLookup {
    /// Create an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no leaves are registered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register a leaf path. Returns `false` if it was already present.
    pub fn add(&mut self, path: &EntityPath) -> bool {
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = node.children.entry(segment.clone()).or_default();
        }
        let added = !node.leaf;
        node.leaf = true;
        if added {
            self.len += 1;
        }
        added
    }

    /// Register many leaf paths.
    pub fn add_many<'a>(&mut self, paths: impl IntoIterator<Item = &'a EntityPath>) {
        for path in paths {
            self.add(path);
        }
    }

    /// Register many leaf paths given as canonical path strings.
    pub fn add_path_strings<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for key in keys {
            let path: EntityPath = key.parse()?;
            self.add(&path);
        }
        Ok(())
    }

    /// Remove a leaf path, pruning interior nodes left empty so they cannot
    /// produce spurious `Descendants` matches later. Returns `false` if the
    /// path was not a leaf.
    pub fn remove(&mut self, path: &EntityPath) -> bool {
        let removed = Self::remove_at(&mut self.root, path.segments());
        if removed {
            self.len -= 1;
        }
        removed
    }

    fn remove_at(node: &mut Node, path: &[Segment]) -> bool {
        match path.split_first() {
            None => {
                let was_leaf = node.leaf;
                node.leaf = false;
                was_leaf
            }
            Some((segment, rest)) => {
                let Some(child) = node.children.get_mut(segment) else {
                    return false;
                };
                let removed = Self::remove_at(child, rest);
                if removed && !child.leaf && child.children.is_empty() {
                    node.children.remove(segment);
                }
                removed
            }
        }
    }

    /// Drop all leaves.
    pub fn clear(&mut self) {
        self.root = Node::default();
        self.len = 0;
    }

    /// All registered leaf paths in depth-first order.
    pub fn leaf_paths(&self) -> Vec<EntityPath> {
        let mut out = Vec::new();
        self.root.collect_leaves(&EntityPath::root(), &mut out);
        out
    }

    /// Classify how `query` relates to the leaf set.
    pub fn classify(&self, query: &EntityPath) -> Classification {
        let mut node = &self.root;
        let mut walked = EntityPath::root();
        for segment in query.segments() {
            if node.leaf {
                return Classification {
                    match_type: MatchType::Ancestor,
                    paths: vec![walked],
                };
            }
            match node.children.get(segment) {
                Some(child) => {
                    walked.push(segment.clone());
                    node = child;
                }
                None => return Classification::none(),
            }
        }
        if node.leaf {
            Classification {
                match_type: MatchType::Leaf,
                paths: vec![query.clone()],
            }
        } else {
            let mut paths = Vec::new();
            node.collect_leaves(query, &mut paths);
            Classification {
                match_type: MatchType::Descendants,
                paths,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> EntityPath {
        text.parse().unwrap()
    }

    fn lookup(keys: &[&str]) -> NodeLookup {
        let mut lookup = NodeLookup::new();
        lookup.add_path_strings(keys.iter().copied()).unwrap();
        lookup
    }

    #[test]
    fn classify_leaf() {
        let lookup = lookup(&["['a']['b']"]);
        let c = lookup.classify(&path("['a']['b']"));
        assert_eq!(c.match_type, MatchType::Leaf);
        assert_eq!(c.paths, vec![path("['a']['b']")]);
    }

    #[test]
    fn classify_ancestor() {
        let lookup = lookup(&["['a']['b']"]);
        let c = lookup.classify(&path("['a']['b']['c'][0]"));
        assert_eq!(c.match_type, MatchType::Ancestor);
        assert_eq!(c.paths, vec![path("['a']['b']")]);
    }

    #[test]
    fn classify_descendants_in_depth_first_order() {
        let lookup = lookup(&["['a']['y']", "['a']['x'][1]", "['a']['x'][0]", "['b']"]);
        let c = lookup.classify(&path("['a']"));
        assert_eq!(c.match_type, MatchType::Descendants);
        assert_eq!(
            c.paths,
            vec![path("['a']['x'][0]"), path("['a']['x'][1]"), path("['a']['y']")]
        );
    }

    #[test]
    fn classify_none() {
        let lookup = lookup(&["['a']['b']"]);
        let c = lookup.classify(&path("['z']"));
        assert_eq!(c.match_type, MatchType::None);
        assert!(c.paths.is_empty());
    }

    #[test]
    fn empty_root_query_reports_descendants() {
        let lookup = NodeLookup::new();
        let c = lookup.classify(&EntityPath::root());
        assert_eq!(c.match_type, MatchType::Descendants);
        assert!(c.paths.is_empty());
    }

    #[test]
    fn root_leaf_is_ancestor_of_everything() {
        let mut lookup = NodeLookup::new();
        lookup.add(&EntityPath::root());
        let c = lookup.classify(&path("['a']"));
        assert_eq!(c.match_type, MatchType::Ancestor);
        assert_eq!(c.paths, vec![EntityPath::root()]);
    }

    #[test]
    fn remove_prunes_interior_nodes() {
        let mut lookup = lookup(&["['a']['b']['c']"]);
        assert!(lookup.remove(&path("['a']['b']['c']")));
        // No dangling interior nodes: the branch is gone entirely.
        let c = lookup.classify(&path("['a']"));
        assert_eq!(c.match_type, MatchType::None);
        assert!(lookup.is_empty());
    }

    #[test]
    fn remove_reenables_overlapping_add() {
        let mut lookup = lookup(&["['a']['b']"]);
        assert!(lookup.remove(&path("['a']['b']")));
        // The ancestor position is free again.
        assert!(lookup.add(&path("['a']")));
        let c = lookup.classify(&path("['a']"));
        assert_eq!(c.match_type, MatchType::Leaf);
    }

    #[test]
    fn remove_keeps_sibling_branches() {
        let mut lookup = lookup(&["['a']['b']", "['a']['c']"]);
        lookup.remove(&path("['a']['b']"));
        let c = lookup.classify(&path("['a']"));
        assert_eq!(c.match_type, MatchType::Descendants);
        assert_eq!(c.paths, vec![path("['a']['c']")]);
        assert_eq!(lookup.len(), 1);
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut lookup = lookup(&["['a']['b']"]);
        assert!(!lookup.remove(&path("['a']")));
        assert!(!lookup.remove(&path("['z']")));
        assert_eq!(lookup.len(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let mut lookup = lookup(&["['a']", "['b']"]);
        lookup.clear();
        assert!(lookup.is_empty());
        assert_eq!(lookup.classify(&path("['a']")).match_type, MatchType::None);
    }

    #[test]
    fn leaf_paths_depth_first() {
        let lookup = lookup(&["['b']", "['a'][2]", "['a']['k']"]);
        let keys: Vec<String> = lookup.leaf_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(keys, vec!["['a']['k']", "['a'][2]", "['b']"]);
    }
}
