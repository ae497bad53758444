//! Persistent ordered map.
//!
//! A treap with path copying. Every update returns a new map that shares
//! all untouched nodes with the old one, so an update allocates
//! `O(log n)` nodes and old maps stay valid for as long as someone holds
//! them. Node priorities come from hashing the key, which keeps the shape
//! deterministic for a given set of keys.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct Node<K, V> {
    key: K,
    value: V,
    priority: u64,
    left: Link<K, V>,
    right: Link<K, V>,
}

type Link<K, V> = Option<Arc<Node<K, V>>>;

/// An immutable ordered map with cheap clones and cheap updates.
pub(crate) struct PersistentMap<K, V> {
    root: Link<K, V>,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: Ord + Clone + Hash,
    V: Clone,
{
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The map with `key` bound to `value`, replacing any previous binding.
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let (left, rest) = split(&self.root, &key, false);
        let (_, right) = split(&rest, &key, true);
        let single = Some(Arc::new(Node {
            priority: priority(&key),
            key,
            value,
            left: None,
            right: None,
        }));
        Self {
            root: merge(merge(left, single), right),
        }
    }

    /// Splits into the entries below `key` and the entries at or above it.
    #[must_use]
    pub fn split(&self, key: &K) -> (Self, Self) {
        let (left, right) = split(&self.root, key, false);
        (Self { root: left }, Self { root: right })
    }

    /// The entries at or below `key`.
    #[must_use]
    pub fn through(&self, key: &K) -> Self {
        let (left, _) = split(&self.root, key, true);
        Self { root: left }
    }

    /// Joins two maps. Every key of `self` must be below every key of
    /// `upper`.
    #[must_use]
    pub fn concat(&self, upper: &Self) -> Self {
        debug_assert!(match (self.last(), upper.first()) {
            (Some((a, _)), Some((b, _))) => a < b,
            _ => true,
        });
        Self {
            root: merge(self.root.clone(), upper.root.clone()),
        }
    }

    /// The entry with the greatest key at or below `key`.
    pub fn floor(&self, key: &K) -> Option<(&K, &V)> {
        let mut link = self.root.as_ref();
        let mut best = None;
        while let Some(node) = link {
            if node.key <= *key {
                best = Some((&node.key, &node.value));
                link = node.right.as_ref();
            } else {
                link = node.left.as_ref();
            }
        }
        best
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(left) = node.left.as_ref() {
            node = left;
        }
        Some((&node.key, &node.value))
    }

    pub fn last(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(right) = node.right.as_ref() {
            node = right;
        }
        Some((&node.key, &node.value))
    }

    /// Entries in key order, starting at the first key at or above `from`.
    pub fn walk_from(&self, from: Option<&K>) -> Walk<K, V> {
        let mut walk = Walk {
            stack: Vec::new(),
            reverse: false,
        };
        walk.descend(self.root.as_ref(), from);
        walk
    }

    /// Entries in reverse key order, starting at the last key at or below
    /// `to`.
    pub fn walk_back_from(&self, to: Option<&K>) -> Walk<K, V> {
        let mut walk = Walk {
            stack: Vec::new(),
            reverse: true,
        };
        walk.descend(self.root.as_ref(), to);
        walk
    }

    pub fn iter(&self) -> Walk<K, V> {
        self.walk_from(None)
    }
}

impl<K, V> fmt::Debug for PersistentMap<K, V>
where
    K: Ord + Clone + Hash + fmt::Debug,
    V: Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// An owning in-order walk over a [`PersistentMap`].
///
/// Holds the nodes it still has to visit, so it outlives the map it came
/// from.
pub(crate) struct Walk<K, V> {
    stack: Vec<Arc<Node<K, V>>>,
    reverse: bool,
}

impl<K: Ord, V> Walk<K, V> {
    fn descend(&mut self, mut link: Option<&Arc<Node<K, V>>>, bound: Option<&K>) {
        while let Some(node) = link {
            let outside = bound.is_some_and(|b| {
                if self.reverse {
                    node.key > *b
                } else {
                    node.key < *b
                }
            });
            let (near, far) = if self.reverse {
                (&node.right, &node.left)
            } else {
                (&node.left, &node.right)
            };
            if outside {
                link = far.as_ref();
            } else {
                self.stack.push(Arc::clone(node));
                link = near.as_ref();
            }
        }
    }
}

impl<K: Ord + Clone, V: Clone> Iterator for Walk<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let next = if self.reverse {
            node.left.as_ref()
        } else {
            node.right.as_ref()
        };
        self.descend(next, None);
        Some((node.key.clone(), node.value.clone()))
    }
}

fn priority<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn rebuild<K: Clone, V: Clone>(node: &Node<K, V>, left: Link<K, V>, right: Link<K, V>) -> Arc<Node<K, V>> {
    Arc::new(Node {
        key: node.key.clone(),
        value: node.value.clone(),
        priority: node.priority,
        left,
        right,
    })
}

/// Splits into keys below `key` (or at or below it when `inclusive`) and
/// the rest.
fn split<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: &K, inclusive: bool) -> (Link<K, V>, Link<K, V>) {
    let Some(node) = link else {
        return (None, None);
    };
    let goes_left = if inclusive {
        node.key <= *key
    } else {
        node.key < *key
    };
    if goes_left {
        let (mid, right) = split(&node.right, key, inclusive);
        (Some(rebuild(node, node.left.clone(), mid)), right)
    } else {
        let (left, mid) = split(&node.left, key, inclusive);
        (left, Some(rebuild(node, mid, node.right.clone())))
    }
}

fn merge<K: Clone, V: Clone>(left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(left), Some(right)) => {
            if left.priority >= right.priority {
                let merged = merge(left.right.clone(), Some(right));
                Some(rebuild(&left, left.left.clone(), merged))
            } else {
                let merged = merge(Some(left), right.left.clone());
                Some(rebuild(&right, merged, right.right.clone()))
            }
        }
    }
}
