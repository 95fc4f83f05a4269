//! Prefix trie over the node store.
//!
//! The trie is stored as a left-child / right-sibling binary tree: a node's
//! `child_offset` points at the first of its children and the children are
//! chained through `next_sibling_offset` in insertion order. Every record
//! therefore has the same size regardless of fan-out, at the price of a linear
//! scan of the sibling chain for each character looked up.
//!
//! Offset 0 holds a synthetic root whose character is never compared.

use std::sync::Arc;

use crate::cache::NodeCache;
use crate::error::StoreError;
use crate::node::{TrieNode, NO_NODE};
use crate::stats::IndexStats;
use crate::store::NodeStore;

/// Offset of the synthetic root node.
pub const ROOT: i64 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Maximum number of names a search returns.
    pub limit: usize,
    /// Compare characters after ASCII uppercasing. Results keep the stored case.
    pub case_insensitive: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            case_insensitive: true,
        }
    }
}

pub struct Trie {
    store: Arc<NodeStore>,
    cache: Option<Arc<NodeCache>>,
    options: SearchOptions,
}

impl Trie {
    /// Wraps `store`, writing the root node if the store is empty.
    pub fn open(store: Arc<NodeStore>) -> Result<Self, StoreError> {
        if store.is_empty() {
            let root = store.append_node(&TrieNode::root())?;
            debug_assert_eq!(root, ROOT);
        }
        Ok(Self {
            store,
            cache: None,
            options: SearchOptions::default(),
        })
    }

    /// Routes search reads through `cache`.
    pub fn with_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<NodeCache>> {
        self.cache.as_ref()
    }

    pub fn options(&self) -> SearchOptions {
        self.options
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats::from_store(&self.store)
    }

    /// Adds one occurrence of `name`. Empty names are ignored.
    ///
    /// Reads go straight to the store; any cached copy of a record this
    /// rewrites is invalidated.
    pub fn insert(&mut self, name: &[u8]) -> Result<(), StoreError> {
        if name.is_empty() {
            return Ok(());
        }

        let mut offset = ROOT;
        let mut node = self.store.read_node(ROOT)?;
        for &character in name {
            (offset, node) = self.find_or_append_child(offset, &mut node, character)?;
        }

        // Counts past the slot width are rejected by the codec.
        node.terminal_count += 1;
        self.write(offset, &node)
    }

    /// Returns the child of `parent` holding `character`, appending a new one
    /// at the end of the sibling chain if there is none.
    fn find_or_append_child(
        &self,
        parent_offset: i64,
        parent: &mut TrieNode,
        character: u8,
    ) -> Result<(i64, TrieNode), StoreError> {
        if !parent.has_child() {
            let child = TrieNode::new(character);
            let child_offset = self.store.append_node(&child)?;
            parent.child_offset = child_offset;
            self.write(parent_offset, parent)?;
            return Ok((child_offset, child));
        }

        let mut offset = parent.child_offset;
        loop {
            let mut node = self.store.read_node(offset)?;
            if node.character == character {
                return Ok((offset, node));
            }
            if !node.has_next_sibling() {
                let sibling = TrieNode::new(character);
                let sibling_offset = self.store.append_node(&sibling)?;
                node.next_sibling_offset = sibling_offset;
                self.write(offset, &node)?;
                return Ok((sibling_offset, sibling));
            }
            offset = node.next_sibling_offset;
        }
    }

    fn write(&self, offset: i64, node: &TrieNode) -> Result<(), StoreError> {
        self.store.update_node(offset, node)?;
        if let Some(cache) = &self.cache {
            cache.invalidate(offset);
        }
        Ok(())
    }

    fn read(&self, offset: i64) -> Result<TrieNode, StoreError> {
        let Some(cache) = &self.cache else {
            return self.store.read_node(offset);
        };
        if let Some(node) = cache.get(offset) {
            return Ok(node);
        }
        let node = self.store.read_node(offset)?;
        cache.put(offset, node);
        Ok(node)
    }

    /// Searches with the trie's [`SearchOptions`], ignoring surrounding whitespace.
    pub fn search(&self, input: &str) -> Result<Vec<String>, StoreError> {
        self.search_prefix(
            input.trim().as_bytes(),
            self.options.limit,
            self.options.case_insensitive,
        )
    }

    /// Returns up to `limit` stored names starting with `input`.
    ///
    /// If `input` itself was stored it comes first. The rest follow in
    /// depth-first order, children before later siblings. When the whole of
    /// `input` cannot be matched the result is empty, as it is for an empty
    /// `input`.
    pub fn search_prefix(
        &self,
        input: &[u8],
        limit: usize,
        case_insensitive: bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut results = Vec::new();
        if input.is_empty() || limit == 0 {
            return Ok(results);
        }

        let mut name = Vec::with_capacity(input.len() + 32);
        let mut node = self.read(ROOT)?;
        for &wanted in input {
            match self.find_child(&node, wanted, case_insensitive)? {
                Some(child) => {
                    // The stored byte, not the query byte, so results keep
                    // the indexed spelling.
                    name.push(child.character);
                    node = child;
                }
                None => return Ok(results),
            }
        }

        if node.is_terminal() {
            results.push(to_name(&name));
        }
        if node.has_child() && results.len() < limit {
            self.collect(node.child_offset, &mut name, limit, &mut results)?;
        }

        tracing::trace!(
            input = %String::from_utf8_lossy(input),
            results = results.len(),
            "prefix search"
        );
        Ok(results)
    }

    fn find_child(
        &self,
        parent: &TrieNode,
        wanted: u8,
        case_insensitive: bool,
    ) -> Result<Option<TrieNode>, StoreError> {
        let mut offset = parent.child_offset;
        while offset != NO_NODE {
            let node = self.read(offset)?;
            let found = if case_insensitive {
                node.character.eq_ignore_ascii_case(&wanted)
            } else {
                node.character == wanted
            };
            if found {
                return Ok(Some(node));
            }
            offset = node.next_sibling_offset;
        }
        Ok(None)
    }

    /// Appends every name found in the sibling chain starting at `offset` and
    /// below it. The budget is checked before each read, so no node is
    /// fetched once `limit` names have been found.
    fn collect(
        &self,
        mut offset: i64,
        name: &mut Vec<u8>,
        limit: usize,
        results: &mut Vec<String>,
    ) -> Result<(), StoreError> {
        while offset != NO_NODE && results.len() < limit {
            let node = self.read(offset)?;
            name.push(node.character);
            if node.is_terminal() {
                results.push(to_name(name));
            }
            if node.has_child() && results.len() < limit {
                self.collect(node.child_offset, name, limit, results)?;
            }
            name.pop();
            offset = node.next_sibling_offset;
        }
        Ok(())
    }
}

fn to_name(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(name) => name.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::error::CodecError;
    use crate::node::{MAX_COUNT, RECORD_SIZE};

    fn trie(records_per_file: u64) -> (tempfile::TempDir, Trie) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NodeStore::open(dir.path(), records_per_file).unwrap());
        (dir, Trie::open(store).unwrap())
    }

    /// Walks to the node spelling `name` exactly, comparing case-sensitively.
    fn node_at(trie: &Trie, name: &[u8]) -> Option<(i64, TrieNode)> {
        let mut offset = ROOT;
        let mut node = trie.store.read_node(ROOT).unwrap();
        for &c in name {
            let mut next = node.child_offset;
            loop {
                if next == NO_NODE {
                    return None;
                }
                let child = trie.store.read_node(next).unwrap();
                if child.character == c {
                    offset = next;
                    node = child;
                    break;
                }
                next = child.next_sibling_offset;
            }
        }
        Some((offset, node))
    }

    #[test]
    fn test_open_writes_root_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NodeStore::open(dir.path(), 8).unwrap());
        Trie::open(Arc::clone(&store)).unwrap();
        Trie::open(Arc::clone(&store)).unwrap();
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.read_node(ROOT).unwrap(), TrieNode::root());
    }

    #[test]
    fn test_insert_counts_repeats() {
        let (_dir, mut trie) = trie(64);
        for _ in 0..4 {
            trie.insert(b"Sol").unwrap();
        }
        let (_, node) = node_at(&trie, b"Sol").unwrap();
        assert_eq!(node.terminal_count, 4);
        assert_eq!(node_at(&trie, b"So").unwrap().1.terminal_count, 0);
        // root + S + o + l
        assert_eq!(trie.store.node_count(), 4);
    }

    #[test]
    fn test_insert_shares_prefix() {
        let (_dir, mut trie) = trie(64);
        for name in [b"Sol", b"Sox", b"Soy"] {
            trie.insert(name).unwrap();
        }
        // root + S + o + l + x + y
        assert_eq!(trie.store.node_count(), 6);

        let (_, o) = node_at(&trie, b"So").unwrap();
        let l = trie.store.read_node(o.child_offset).unwrap();
        let x = trie.store.read_node(l.next_sibling_offset).unwrap();
        let y = trie.store.read_node(x.next_sibling_offset).unwrap();
        assert_eq!((l.character, x.character, y.character), (b'l', b'x', b'y'));
        assert_eq!(y.next_sibling_offset, NO_NODE);
        for node in [l, x, y] {
            assert_eq!(node.terminal_count, 1);
        }
    }

    #[test]
    fn test_insert_empty_name_is_noop() {
        let (_dir, mut trie) = trie(64);
        trie.insert(b"").unwrap();
        assert_eq!(trie.store.node_count(), 1);
        assert_eq!(trie.store.read_node(ROOT).unwrap(), TrieNode::root());
    }

    #[test]
    fn test_insert_count_overflow_is_an_error() {
        let (_dir, mut trie) = trie(64);
        trie.insert(b"A").unwrap();
        let (offset, mut node) = node_at(&trie, b"A").unwrap();
        node.terminal_count = MAX_COUNT;
        trie.store.update_node(offset, &node).unwrap();

        assert!(matches!(
            trie.insert(b"A"),
            Err(StoreError::Corrupt(CodecError::OutOfRange { .. }))
        ));
        assert_eq!(node_at(&trie, b"A").unwrap().1.terminal_count, MAX_COUNT);
    }

    #[test]
    fn test_exact_match_comes_first() {
        let (_dir, mut trie) = trie(64);
        for name in [b"Solati".as_slice(), b"Sol"] {
            trie.insert(name).unwrap();
        }
        assert_eq!(
            trie.search_prefix(b"Sol", 10, false).unwrap(),
            vec!["Sol", "Solati"]
        );
        assert_eq!(trie.search_prefix(b"Solati", 10, false).unwrap(), vec!["Solati"]);
    }

    #[test]
    fn test_case_insensitive_keeps_stored_case() {
        let (_dir, mut trie) = trie(64);
        trie.insert(b"Sol").unwrap();

        assert_eq!(trie.search_prefix(b"sol", 10, true).unwrap(), vec!["Sol"]);
        assert_eq!(trie.search_prefix(b"SO", 10, true).unwrap(), vec!["Sol"]);
        assert!(trie.search_prefix(b"sol", 10, false).unwrap().is_empty());
    }

    #[test]
    fn test_unmatched_or_empty_input() {
        let (_dir, mut trie) = trie(64);
        trie.insert(b"Sol").unwrap();

        assert!(trie.search_prefix(b"Sox", 10, true).unwrap().is_empty());
        assert!(trie.search_prefix(b"Solx", 10, true).unwrap().is_empty());
        assert!(trie.search_prefix(b"", 10, true).unwrap().is_empty());
        assert!(trie.search("   ").unwrap().is_empty());
        assert!(trie.search_prefix(b"Sol", 0, true).unwrap().is_empty());
    }

    #[test]
    fn test_limit_caps_results() {
        let (_dir, mut trie) = trie(64);
        for i in 0..40 {
            trie.insert(format!("Col {i}").as_bytes()).unwrap();
        }
        trie.insert(b"Col").unwrap();

        let results = trie.search_prefix(b"Col", 7, false).unwrap();
        assert_eq!(results.len(), 7);
        assert_eq!(results[0], "Col");
        assert_eq!(trie.search_prefix(b"Col ", 100, false).unwrap().len(), 40);
        assert_eq!(trie.search_prefix(b"Col", 1, false).unwrap(), vec!["Col"]);
    }

    #[test]
    fn test_search_uses_options_and_trims() {
        let (_dir, mut trie) = trie(64);
        for name in [b"Alpha".as_slice(), b"Alphard", b"Altair"] {
            trie.insert(name).unwrap();
        }
        let trie = trie.with_options(SearchOptions {
            limit: 2,
            case_insensitive: true,
        });
        assert_eq!(trie.search("  al \n").unwrap(), vec!["Alpha", "Alphard"]);
    }

    #[test]
    fn test_multibyte_names() {
        let (_dir, mut trie) = trie(64);
        trie.insert("Ærø".as_bytes()).unwrap();
        trie.insert("Æsir".as_bytes()).unwrap();
        assert_eq!(
            trie.search_prefix("Æ".as_bytes(), 10, true).unwrap(),
            vec!["Ærø", "Æsir"]
        );
    }

    #[test]
    fn test_offsets_stay_put() {
        let (_dir, mut trie) = trie(3);
        trie.insert(b"Sol").unwrap();
        let before: Vec<_> = (0..trie.store.node_count())
            .map(|i| trie.store.read_node(i * RECORD_SIZE as i64).unwrap())
            .collect();

        for name in [b"Sothis".as_slice(), b"Sol", b"Procyon", b"S"] {
            trie.insert(name).unwrap();
        }

        for (i, old) in before.iter().enumerate() {
            let new = trie.store.read_node(i as i64 * RECORD_SIZE as i64).unwrap();
            assert_eq!(new.character, old.character);
            for (was, now) in [
                (old.child_offset, new.child_offset),
                (old.next_sibling_offset, new.next_sibling_offset),
            ] {
                assert!(was == NO_NODE || was == now);
            }
            assert!(new.terminal_count >= old.terminal_count);
        }
    }

    #[test]
    fn test_search_reports_truncated_store() {
        let (dir, mut trie) = trie(64);
        // root, S, o, l at 0, 21, 42, 63
        trie.insert(b"Sol").unwrap();
        std::fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("index.0.dat"))
            .unwrap()
            .set_len(50)
            .unwrap();

        assert!(matches!(
            trie.search_prefix(b"So", 10, true),
            Err(StoreError::ShortRead {
                file: 0,
                offset: 42,
                got: 8
            })
        ));
    }

    #[test]
    fn test_case_insensitive_follows_first_spelling() {
        let (_dir, mut trie) = trie(64);
        for name in [b"Alioth".as_slice(), b"alioth", b"ALIAS"] {
            trie.insert(name).unwrap();
        }

        // The walk commits to the first sibling matching ignoring case.
        assert_eq!(
            trie.search_prefix(b"ali", 10, true).unwrap(),
            vec!["Alioth"]
        );
        assert_eq!(
            trie.search_prefix(b"alioth", 10, false).unwrap(),
            vec!["alioth"]
        );
        assert_eq!(trie.search_prefix(b"AL", 10, false).unwrap(), vec!["ALIAS"]);
    }
}
