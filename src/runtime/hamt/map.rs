//! Persistent string-keyed map (hash array mapped trie)
//!
//! Keys are hashed once; the trie consumes the hash five bits at a time,
//! lowest bits first. Single entries live directly in branch slots; keys
//! whose full 64-bit hashes collide end up in a bucket. All updates copy
//! the touched path and share the rest.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use super::{BITS, MASK, WIDTH};
use crate::runtime::pod::PodValue;

/// Deepest level at which hash bits remain; below this, collide into a
/// bucket.
const MAX_LEVEL: u32 = 60;

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
enum Node {
    Branch(Box<[Option<Arc<Node>>; WIDTH]>),
    Entry(String, PodValue),
    Bucket(Vec<(String, PodValue)>),
}

fn empty_branch() -> Box<[Option<Arc<Node>>; WIDTH]> {
    Box::new(std::array::from_fn(|_| None))
}

/// Persistent map from string keys to runtime words.
#[derive(Debug, Clone, Default)]
pub struct HamtMap {
    len: usize,
    root: Option<Arc<Node>>,
}

impl HamtMap {
    pub fn new() -> Self {
        HamtMap { len: 0, root: None }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<PodValue> {
        let mut node = self.root.as_ref()?;
        let hash = hash_key(key);
        let mut level = 0;
        loop {
            match &**node {
                Node::Entry(entry_key, value) => {
                    return (entry_key == key).then_some(*value);
                }
                Node::Bucket(entries) => {
                    return entries
                        .iter()
                        .find(|(entry_key, _)| entry_key == key)
                        .map(|(_, value)| *value);
                }
                Node::Branch(children) => {
                    let slot = ((hash >> level) as usize) & MASK;
                    node = children[slot].as_ref()?;
                    level += BITS;
                }
            }
        }
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.get(key).is_some()
    }

    /// A new map with `key` bound to `value`.
    pub fn insert(
        &self,
        key: &str,
        value: PodValue,
    ) -> Self {
        let hash = hash_key(key);
        let (root, replaced) = insert_node(self.root.as_deref(), 0, hash, key, value);
        HamtMap {
            len: if replaced { self.len } else { self.len + 1 },
            root: Some(Arc::new(root)),
        }
    }

    /// A new map without `key`, or `None` if the key is absent.
    pub fn remove(
        &self,
        key: &str,
    ) -> Option<Self> {
        let root = self.root.as_deref()?;
        let hash = hash_key(key);
        let next_root = remove_node(root, 0, hash, key)?;
        Some(HamtMap {
            len: self.len - 1,
            root: next_root.map(Arc::new),
        })
    }

    /// Visit every entry; iteration order is hash order, not key order.
    pub fn for_each<F>(
        &self,
        mut visit: F,
    ) where
        F: FnMut(&str, PodValue),
    {
        if let Some(root) = &self.root {
            walk(root, &mut visit);
        }
    }

    /// All entries sorted by key, for ordered comparison and display.
    pub fn to_sorted_vec(&self) -> Vec<(String, PodValue)> {
        let mut entries = Vec::with_capacity(self.len);
        self.for_each(|key, value| entries.push((key.to_string(), value)));
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

fn walk<F>(
    node: &Node,
    visit: &mut F,
) where
    F: FnMut(&str, PodValue),
{
    match node {
        Node::Entry(key, value) => visit(key, *value),
        Node::Bucket(entries) => {
            for (key, value) in entries {
                visit(key, *value);
            }
        }
        Node::Branch(children) => {
            for child in children.iter().flatten() {
                walk(child, visit);
            }
        }
    }
}

/// Returns the replacement node and whether an existing key was replaced.
fn insert_node(
    node: Option<&Node>,
    level: u32,
    hash: u64,
    key: &str,
    value: PodValue,
) -> (Node, bool) {
    match node {
        None => (Node::Entry(key.to_string(), value), false),
        Some(Node::Entry(entry_key, entry_value)) => {
            if entry_key == key {
                (Node::Entry(key.to_string(), value), true)
            } else {
                let split = split_entries(
                    entry_key.clone(),
                    *entry_value,
                    hash_key(entry_key),
                    key.to_string(),
                    value,
                    hash,
                    level,
                );
                (split, false)
            }
        }
        Some(Node::Bucket(entries)) => {
            let mut next = entries.clone();
            if let Some(existing) = next.iter_mut().find(|(entry_key, _)| entry_key == key) {
                existing.1 = value;
                (Node::Bucket(next), true)
            } else {
                next.push((key.to_string(), value));
                (Node::Bucket(next), false)
            }
        }
        Some(Node::Branch(children)) => {
            let slot = ((hash >> level) as usize) & MASK;
            let (child, replaced) = insert_node(
                children[slot].as_deref(),
                level + BITS,
                hash,
                key,
                value,
            );
            let mut next = children.clone();
            next[slot] = Some(Arc::new(child));
            (Node::Branch(next), replaced)
        }
    }
}

/// Build the subtree separating two entries whose hashes agree on all
/// levels above `level`.
fn split_entries(
    key_a: String,
    value_a: PodValue,
    hash_a: u64,
    key_b: String,
    value_b: PodValue,
    hash_b: u64,
    level: u32,
) -> Node {
    if level > MAX_LEVEL {
        return Node::Bucket(vec![(key_a, value_a), (key_b, value_b)]);
    }
    let slot_a = ((hash_a >> level) as usize) & MASK;
    let slot_b = ((hash_b >> level) as usize) & MASK;
    let mut children = empty_branch();
    if slot_a == slot_b {
        children[slot_a] = Some(Arc::new(split_entries(
            key_a,
            value_a,
            hash_a,
            key_b,
            value_b,
            hash_b,
            level + BITS,
        )));
    } else {
        children[slot_a] = Some(Arc::new(Node::Entry(key_a, value_a)));
        children[slot_b] = Some(Arc::new(Node::Entry(key_b, value_b)));
    }
    Node::Branch(children)
}

/// Outer `None` means the key was absent; inner `None` means the subtree
/// became empty.
fn remove_node(
    node: &Node,
    level: u32,
    hash: u64,
    key: &str,
) -> Option<Option<Node>> {
    match node {
        Node::Entry(entry_key, _) => (entry_key == key).then_some(None),
        Node::Bucket(entries) => {
            let position = entries.iter().position(|(entry_key, _)| entry_key == key)?;
            let mut next = entries.clone();
            next.remove(position);
            Some(match next.len() {
                0 => None,
                1 => {
                    let (remaining_key, remaining_value) = next.pop().expect("length checked");
                    Some(Node::Entry(remaining_key, remaining_value))
                }
                _ => Some(Node::Bucket(next)),
            })
        }
        Node::Branch(children) => {
            let slot = ((hash >> level) as usize) & MASK;
            let child = children[slot].as_deref()?;
            let replacement = remove_node(child, level + BITS, hash, key)?;
            let mut next = children.clone();
            next[slot] = replacement.map(Arc::new);
            if next.iter().all(|child| child.is_none()) {
                Some(None)
            } else {
                Some(Some(Node::Branch(next)))
            }
        }
    }
}
