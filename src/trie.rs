//! The span-retrieve trie: a producer-local memoization structure mapping
//! each observed attribute-value prefix tuple to a short path id, per span
//! name. Edges are attribute-value ids (or the `"#"` sentinel for an absent
//! stable key); leaves hold path ids.

use std::collections::HashMap;

#[derive(Debug, Default)]
struct TrieNode {
    branches: HashMap<String, TrieNode>,
    leaves: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub(crate) struct SpanRetrieveTrie {
    roots: HashMap<String, TrieNode>,
}

impl SpanRetrieveTrie {
    pub(crate) fn new() -> SpanRetrieveTrie {
        SpanRetrieveTrie::default()
    }

    /// Drops the subtree for `name`. Called when the name's stable order
    /// changes, since old paths no longer describe the new prefix schema.
    pub(crate) fn reset_name(&mut self, name: &str) {
        self.roots.insert(name.to_string(), TrieNode::default());
    }

    pub(crate) fn clear(&mut self) {
        self.roots.clear();
    }

    /// Path id for `path` under `name`, allocating through `alloc` on first
    /// sight. Returns `None` for an empty path (the span has no stable keys
    /// and the compact form omits the path tag). The boolean is true when
    /// this call created the leaf.
    pub(crate) fn get_or_assign<F>(
        &mut self,
        name: &str,
        path: &[String],
        alloc: F,
    ) -> Option<(String, bool)>
    where
        F: FnOnce(&[String]) -> String,
    {
        let (last, prefix) = path.split_last()?;
        let mut node = self.roots.entry(name.to_string()).or_default();
        for edge in prefix {
            node = node.branches.entry(edge.clone()).or_default();
        }
        if let Some(id) = node.leaves.get(last) {
            return Some((id.clone(), false));
        }
        let id = alloc(path);
        node.leaves.insert(last.clone(), id.clone());
        Some((id, true))
    }
}
