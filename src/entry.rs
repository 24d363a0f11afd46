//! Archive members and the in-memory directory tree.
//!
//! An [`Entry`] is a plain value describing one archive member. Entries are
//! arranged into an [`EntryTree`], an arena where every node is addressed by
//! an [`EntryId`]. Directories own the ids of their children; the parent link
//! is only used for lookups and never for ownership.
//!
//! # Example
//!
//! ```rust
//! use archivist::{Entry, EntryTree};
//!
//! let mut tree = EntryTree::new();
//! tree.insert(Entry::new("docs/readme.txt"));
//! tree.insert(Entry::new("docs/"));
//!
//! let docs = tree.find(tree.root(), "docs").unwrap();
//! assert!(tree[docs].is_dir());
//! assert_eq!(tree.children(docs).len(), 1);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::ops::Index;

use chrono::NaiveDateTime;

/// One archive member: a file, a directory or a symbolic link.
///
/// Equality and hashing only consider [`full_path`](Self::full_path); two
/// records of the same member with different metadata compare equal.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    full_path: String,
    name: String,
    is_dir: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Compressed size in bytes, when the backend reports it.
    pub compressed_size: Option<u64>,
    /// Modification time as stored in the archive.
    pub timestamp: Option<NaiveDateTime>,
    /// Whether the member's data is encrypted.
    pub is_password_protected: bool,
    /// Symbolic link target.
    pub link: Option<String>,
    /// Folder the entry is staged relative to. A preserve-path extraction
    /// strips this prefix from the output path.
    pub root_node: Option<String>,
    /// Backend-specific extras (permissions, CRC, method, ratio...).
    pub properties: BTreeMap<String, String>,
}

impl Entry {
    /// Creates an entry from a slash-separated full path.
    ///
    /// A trailing `/` marks a directory.
    pub fn new(full_path: impl Into<String>) -> Self {
        let mut entry = Entry::default();
        entry.set_full_path(full_path);
        entry
    }

    /// Creates a directory entry, appending the trailing `/` if missing.
    pub fn directory(full_path: impl Into<String>) -> Self {
        let mut entry = Entry::new(full_path);
        entry.set_is_directory(true);
        entry
    }

    /// Returns the full path, with a trailing `/` for directories.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Returns the full path without its trailing `/`.
    pub fn full_path_without_trailing_slash(&self) -> &str {
        self.full_path.strip_suffix('/').unwrap_or(&self.full_path)
    }

    /// Replaces the full path and recomputes the display name.
    pub fn set_full_path(&mut self, full_path: impl Into<String>) {
        self.full_path = full_path.into();
        self.is_dir = self.full_path.ends_with('/');
        self.name = last_component(&self.full_path).to_string();
    }

    /// Returns the display name (last non-empty path component).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Explicitly changes directory-ness, keeping the trailing-slash rule.
    pub fn set_is_directory(&mut self, is_dir: bool) {
        self.is_dir = is_dir;
        if self.full_path.is_empty() {
            return;
        }
        if is_dir && !self.full_path.ends_with('/') {
            self.full_path.push('/');
        } else if !is_dir {
            while self.full_path.ends_with('/') {
                self.full_path.pop();
            }
        }
    }

    /// Returns the number of path components.
    pub fn depth(&self) -> usize {
        path_segments(&self.full_path).count()
    }

    /// Sets a backend-specific property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Returns a backend-specific property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.full_path == other.full_path
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_path.hash(state);
    }
}

/// Iterates the non-empty `/`-separated components of a path.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn last_component(path: &str) -> &str {
    path_segments(path).last().unwrap_or("")
}

/// Index of a node inside an [`EntryTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

#[derive(Debug, Clone)]
struct Node {
    entry: Entry,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
    synthesized: bool,
}

/// Arena-backed directory tree of archive members.
///
/// The root node is an unnamed directory. Children keep discovery order.
/// Mutating a non-directory node through the child-collection methods is a
/// programming error and panics.
#[derive(Debug, Clone)]
pub struct EntryTree {
    nodes: Vec<Option<Node>>,
    by_path: HashMap<String, EntryId>,
    free: Vec<usize>,
}

impl Default for EntryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryTree {
    /// Creates an empty tree containing only the root directory.
    pub fn new() -> Self {
        let root = Node {
            entry: Entry {
                is_dir: true,
                ..Entry::default()
            },
            parent: None,
            children: Vec::new(),
            synthesized: false,
        };
        Self {
            nodes: vec![Some(root)],
            by_path: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// Returns the id of the root directory.
    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    /// Returns the number of entries, excluding the root.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Returns `true` if the tree holds no entries besides the root.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Removes every entry, keeping the root.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Returns the entry for `id`, if it is still alive.
    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.node(id).map(|n| &n.entry)
    }

    /// Returns the entry for `id` mutably.
    ///
    /// The full path must not be changed through this reference.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|n| &mut n.entry)
    }

    /// Returns the parent directory of `id`.
    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Returns the children of a directory in discovery order.
    ///
    /// # Panics
    ///
    /// Panics if `dir` is not a directory.
    pub fn children(&self, dir: EntryId) -> &[EntryId] {
        let node = self.dir_node(dir);
        &node.children
    }

    /// Returns the child entries of a directory in discovery order.
    pub fn entries(&self, dir: EntryId) -> impl Iterator<Item = &Entry> {
        self.children(dir).iter().filter_map(|id| self.get(*id))
    }

    /// Returns the position of `id` among its siblings.
    pub fn row(&self, id: EntryId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// Appends `entry` as the last child of `dir`.
    ///
    /// # Panics
    ///
    /// Panics if `dir` is not a directory.
    pub fn append_entry(&mut self, dir: EntryId, entry: Entry) -> EntryId {
        self.dir_node(dir);
        debug_assert!(
            !self.by_path.contains_key(entry.full_path()),
            "duplicate full path {}",
            entry.full_path()
        );
        let id = self.alloc(entry, Some(dir));
        self.dir_node_mut(dir).children.push(id);
        id
    }

    /// Removes the child at `index` of `dir` together with all descendants.
    ///
    /// Returns the removed entry, or `None` if `index` is out of range.
    ///
    /// # Panics
    ///
    /// Panics if `dir` is not a directory.
    pub fn remove_entry_at(&mut self, dir: EntryId, index: usize) -> Option<Entry> {
        let children = &mut self.dir_node_mut(dir).children;
        if index >= children.len() {
            return None;
        }
        let id = children.remove(index);
        self.release(id)
    }

    /// Replaces the child at `index` of `dir`, destroying the old subtree.
    ///
    /// # Panics
    ///
    /// Panics if `dir` is not a directory or `index` is out of range.
    pub fn set_entry_at(&mut self, dir: EntryId, index: usize, entry: Entry) -> EntryId {
        let old = self.dir_node(dir).children[index];
        self.release(old);
        let id = self.alloc(entry, Some(dir));
        self.dir_node_mut(dir).children[index] = id;
        id
    }

    /// Removes the entry with `full_path` and its descendants.
    pub fn remove_by_path(&mut self, full_path: &str) -> Option<Entry> {
        let id = self.find_by_full_path(full_path)?;
        let parent = self.parent(id)?;
        let index = self.children(parent).iter().position(|c| *c == id)?;
        self.remove_entry_at(parent, index)
    }

    /// Finds a direct child of `dir` by display name.
    ///
    /// # Panics
    ///
    /// Panics if `dir` is not a directory.
    pub fn find(&self, dir: EntryId, name: &str) -> Option<EntryId> {
        self.dir_node(dir)
            .children
            .iter()
            .copied()
            .find(|id| self.get(*id).is_some_and(|e| e.name() == name))
    }

    /// Walks `pieces` component by component starting at `dir`.
    ///
    /// Returns `None` if a component is missing or an intermediate component
    /// is not a directory.
    pub fn find_by_path<S: AsRef<str>>(&self, dir: EntryId, pieces: &[S]) -> Option<EntryId> {
        let (first, rest) = pieces.split_first()?;
        let next = self.find(dir, first.as_ref())?;
        if rest.is_empty() {
            return Some(next);
        }
        if !self.get(next)?.is_dir() {
            return None;
        }
        self.find_by_path(next, rest)
    }

    /// Looks an entry up by its full path, with or without trailing slash.
    pub fn find_by_full_path(&self, full_path: &str) -> Option<EntryId> {
        self.by_path
            .get(full_path)
            .or_else(|| self.by_path.get(&format!("{full_path}/")))
            .or_else(|| self.by_path.get(full_path.trim_end_matches('/')))
            .copied()
    }

    /// Collects every directory below `dir`.
    ///
    /// Each directory is placed in front of the ones collected before it, so
    /// the most recently visited (deepest, last) directories come first.
    pub fn dir_entries(&self, dir: EntryId) -> Vec<EntryId> {
        let mut store = VecDeque::new();
        self.collect_dirs(dir, &mut store);
        store.into()
    }

    fn collect_dirs(&self, dir: EntryId, store: &mut VecDeque<EntryId>) {
        for &child in self.children(dir) {
            if self.get(child).is_some_and(Entry::is_dir) {
                store.push_front(child);
                self.collect_dirs(child, store);
            }
        }
    }

    /// Merges a listed entry into the tree.
    ///
    /// Missing parent directories are synthesized. If an entry with the same
    /// full path already exists, its metadata is replaced and its children
    /// are kept.
    pub fn insert(&mut self, entry: Entry) -> EntryId {
        let segments: Vec<String> = path_segments(entry.full_path())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return self.root();
        }

        let mut parent = self.root();
        let mut prefix = String::new();
        for segment in &segments[..segments.len() - 1] {
            prefix.push_str(segment);
            prefix.push('/');
            parent = match self.by_path.get(&prefix).copied() {
                Some(id) => id,
                None => {
                    let id = self.append_entry(parent, Entry::directory(prefix.clone()));
                    if let Some(node) = self.node_mut(id) {
                        node.synthesized = true;
                    }
                    id
                }
            };
        }

        let existing = self
            .by_path
            .get(entry.full_path())
            .or_else(|| self.by_path.get(entry.full_path_without_trailing_slash()))
            .or_else(|| self.by_path.get(&format!("{}/", entry.full_path())))
            .copied();
        match existing {
            Some(id) => self.replace_entry(id, entry),
            None => self.append_entry(parent, entry),
        }
    }

    /// Returns `true` if the node was created as a missing parent directory
    /// rather than reported by the backend.
    pub fn is_synthesized(&self, id: EntryId) -> bool {
        self.node(id).is_some_and(|n| n.synthesized)
    }

    /// Iterates every entry in depth-first pre-order, excluding the root.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack: Vec<EntryId> = self.children(self.root()).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                order.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
            .into_iter()
            .filter_map(move |id| self.get(id).map(|e| (id, e)))
    }

    /// Returns the top-level entries.
    pub fn top_level(&self) -> impl Iterator<Item = &Entry> {
        self.entries(self.root())
    }

    fn replace_entry(&mut self, id: EntryId, entry: Entry) -> EntryId {
        let Some(node) = self.node_mut(id) else {
            return id;
        };
        let old_path = std::mem::replace(&mut node.entry, entry);
        node.synthesized = false;
        let new_path = node.entry.full_path().to_string();
        self.by_path.remove(old_path.full_path());
        self.by_path.insert(new_path, id);
        id
    }

    fn alloc(&mut self, entry: Entry, parent: Option<EntryId>) -> EntryId {
        let path = entry.full_path().to_string();
        let node = Node {
            entry,
            parent,
            children: Vec::new(),
            synthesized: false,
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                EntryId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                EntryId(self.nodes.len() - 1)
            }
        };
        self.by_path.insert(path, id);
        id
    }

    fn release(&mut self, id: EntryId) -> Option<Entry> {
        let node = self.nodes.get_mut(id.0)?.take()?;
        self.by_path.remove(node.entry.full_path());
        self.free.push(id.0);
        for child in node.children {
            self.release(child);
        }
        Some(node.entry)
    }

    fn node(&self, id: EntryId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: EntryId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn dir_node(&self, id: EntryId) -> &Node {
        match self.node(id) {
            Some(node) if node.entry.is_dir() => node,
            Some(node) => panic!("{} is not a directory", node.entry.full_path()),
            None => panic!("stale entry id {id:?}"),
        }
    }

    fn dir_node_mut(&mut self, id: EntryId) -> &mut Node {
        self.dir_node(id);
        match self.node_mut(id) {
            Some(node) => node,
            None => unreachable!(),
        }
    }
}

impl Index<EntryId> for EntryTree {
    type Output = Entry;

    fn index(&self, id: EntryId) -> &Entry {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("stale entry id {id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> EntryTree {
        let mut tree = EntryTree::new();
        for path in [
            "a.txt",
            "aDir/",
            "aDir/b.txt",
            "aDir/sub/",
            "aDir/sub/c.txt",
            "empty_dir/",
        ] {
            tree.insert(Entry::new(path));
        }
        tree
    }

    #[test]
    fn test_entry_name_and_dir_flag() {
        let e = Entry::new("aDir/sub/");
        assert!(e.is_dir());
        assert_eq!(e.name(), "sub");
        assert_eq!(e.full_path_without_trailing_slash(), "aDir/sub");
        assert_eq!(e.depth(), 2);

        let f = Entry::new("aDir/b.txt");
        assert!(!f.is_dir());
        assert_eq!(f.name(), "b.txt");
    }

    #[test]
    fn test_set_is_directory_keeps_slash_rule() {
        let mut e = Entry::new("folder");
        e.set_is_directory(true);
        assert_eq!(e.full_path(), "folder/");
        e.set_is_directory(false);
        assert_eq!(e.full_path(), "folder");
    }

    #[test]
    fn test_equality_by_full_path_only() {
        let mut a = Entry::new("x.txt");
        a.size = 10;
        let mut b = Entry::new("x.txt");
        b.size = 20;
        b.is_password_protected = true;
        assert_eq!(a, b);
        assert_ne!(a, Entry::new("y.txt"));
    }

    #[test]
    fn test_append_and_find() {
        let mut tree = EntryTree::new();
        let root = tree.root();
        let dir = tree.append_entry(root, Entry::new("dir/"));
        let file = tree.append_entry(dir, Entry::new("dir/file"));
        assert_eq!(tree.find(root, "dir"), Some(dir));
        assert_eq!(tree.find(dir, "file"), Some(file));
        assert_eq!(tree.find(dir, "missing"), None);
        assert_eq!(tree.parent(file), Some(dir));
        assert_eq!(tree.row(file), Some(0));
    }

    #[test]
    #[should_panic(expected = "not a directory")]
    fn test_append_to_file_panics() {
        let mut tree = EntryTree::new();
        let root = tree.root();
        let file = tree.append_entry(root, Entry::new("file"));
        tree.append_entry(file, Entry::new("file/x"));
    }

    #[test]
    #[should_panic(expected = "not a directory")]
    fn test_find_on_file_panics() {
        let tree = sample_tree();
        let file = tree.find_by_full_path("a.txt").unwrap();
        tree.find(file, "x");
    }

    #[test]
    fn test_find_by_path() {
        let tree = sample_tree();
        let root = tree.root();
        let c = tree.find_by_path(root, &["aDir", "sub", "c.txt"]).unwrap();
        assert_eq!(tree[c].full_path(), "aDir/sub/c.txt");
        assert!(tree.find_by_path(root, &["aDir", "nope", "c.txt"]).is_none());
        // An intermediate file stops the walk.
        assert!(tree.find_by_path(root, &["a.txt", "x"]).is_none());
        assert!(tree.find_by_path::<&str>(root, &[]).is_none());
    }

    #[test]
    fn test_insert_synthesizes_parents() {
        let mut tree = EntryTree::new();
        tree.insert(Entry::new("x/y/z.txt"));
        let x = tree.find_by_full_path("x/").unwrap();
        assert!(tree.is_synthesized(x));
        assert_eq!(tree.len(), 3);

        let mut real = Entry::new("x/");
        real.size = 0;
        real.set_property("permissions", "drwxr-xr-x");
        let id = tree.insert(real);
        assert_eq!(id, x);
        assert!(!tree.is_synthesized(x));
        assert_eq!(tree[x].property("permissions"), Some("drwxr-xr-x"));
        assert_eq!(tree.children(x).len(), 1);
    }

    #[test]
    fn test_insert_duplicate_collapses() {
        let mut tree = sample_tree();
        let before = tree.len();
        tree.insert(Entry::new("aDir/b.txt"));
        assert_eq!(tree.len(), before);
    }

    #[test]
    fn test_remove_entry_at_is_recursive() {
        let mut tree = sample_tree();
        let root = tree.root();
        let dir = tree.find(root, "aDir").unwrap();
        let index = tree.row(dir).unwrap();
        let removed = tree.remove_entry_at(root, index).unwrap();
        assert_eq!(removed.full_path(), "aDir/");
        assert!(tree.find_by_full_path("aDir/sub/c.txt").is_none());
        assert!(tree.find_by_full_path("aDir/b.txt").is_none());
        assert_eq!(tree.len(), 2);
        assert!(tree.remove_entry_at(root, 99).is_none());
    }

    #[test]
    fn test_set_entry_at_replaces_subtree() {
        let mut tree = sample_tree();
        let root = tree.root();
        let index = tree.row(tree.find(root, "aDir").unwrap()).unwrap();
        let id = tree.set_entry_at(root, index, Entry::new("renamed.txt"));
        assert_eq!(tree.row(id), Some(index));
        assert!(tree.find_by_full_path("aDir/b.txt").is_none());
        assert!(tree.find_by_full_path("renamed.txt").is_some());
    }

    #[test]
    fn test_dir_entries_order() {
        let tree = sample_tree();
        let dirs: Vec<_> = tree
            .dir_entries(tree.root())
            .into_iter()
            .map(|id| tree[id].full_path().to_string())
            .collect();
        assert_eq!(dirs, vec!["empty_dir/", "aDir/sub/", "aDir/"]);
    }

    #[test]
    fn test_iter_preorder() {
        let tree = sample_tree();
        let paths: Vec<_> = tree.iter().map(|(_, e)| e.full_path().to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "a.txt",
                "aDir/",
                "aDir/b.txt",
                "aDir/sub/",
                "aDir/sub/c.txt",
                "empty_dir/"
            ]
        );
    }

    #[test]
    fn test_clear() {
        let mut tree = sample_tree();
        tree.clear();
        assert!(tree.is_empty());
        assert!(tree.children(tree.root()).is_empty());
    }
}
