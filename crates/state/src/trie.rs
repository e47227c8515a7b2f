use parking_lot::Mutex;
use retrace_primitives::{keccak256, Bytes, B256};
use std::{collections::HashMap, sync::Arc};
use tracing::{trace, warn};

/// A process-wide, content-addressed trie-node store with a reference-counted
/// in-memory cache in front of a persistent layer.
///
/// Nodes enter the cache through [`TrieDb::insert`] when a snapshot commits.
/// [`TrieDb::reference`] pins a subtree; [`TrieDb::dereference`] unpins it and
/// evicts nodes whose count reaches zero, cascading into children that no
/// surviving parent holds. Nodes in the persistent layer are never evicted;
/// pin and unpin are no-ops for them.
#[derive(Debug, Default)]
pub struct TrieDb {
    inner: Mutex<TrieDbInner>,
}

#[derive(Debug, Default)]
struct TrieDbInner {
    /// In-memory nodes subject to refcounted eviction.
    dirty: HashMap<B256, CachedNode>,
    /// Persisted nodes, standing in for the disk store collaborator.
    disk: HashMap<B256, Bytes>,
}

#[derive(Debug)]
struct CachedNode {
    data: Bytes,
    children: Vec<B256>,
    /// External pins plus links from parent nodes in the cache.
    refs: u64,
}

impl TrieDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node data for the given hash, if resident or persisted.
    pub fn node(&self, hash: B256) -> Option<Bytes> {
        let inner = self.inner.lock();
        inner.dirty.get(&hash).map(|node| node.data.clone()).or_else(|| inner.disk.get(&hash).cloned())
    }

    /// Returns `true` if the node is resolvable.
    pub fn contains(&self, hash: B256) -> bool {
        let inner = self.inner.lock();
        inner.dirty.contains_key(&hash) || inner.disk.contains_key(&hash)
    }

    /// Inserts a node into the cache, returning its content hash.
    ///
    /// Links from this node to each cached child are counted so that a child
    /// survives for as long as any parent does. Re-inserting an existing node
    /// is a no-op.
    pub fn insert(&self, data: Bytes, children: Vec<B256>) -> B256 {
        let hash = keccak256(&data);
        let mut inner = self.inner.lock();
        if inner.dirty.contains_key(&hash) || inner.disk.contains_key(&hash) {
            return hash
        }
        for child in &children {
            if let Some(node) = inner.dirty.get_mut(child) {
                node.refs += 1;
            }
        }
        inner.dirty.insert(hash, CachedNode { data, children, refs: 0 });
        hash
    }

    /// Pins the subtree under `root`.
    ///
    /// `parent` is zero for external pins; the signature mirrors the internal
    /// parent-link form so both share one counter. No-op for persisted or
    /// unknown roots.
    pub fn reference(&self, root: B256, _parent: B256) {
        if let Some(node) = self.inner.lock().dirty.get_mut(&root) {
            node.refs += 1;
            trace!(target: "state::trie", %root, refs = node.refs, "referenced trie root");
        }
    }

    /// Unpins the subtree under `root`, evicting nodes whose count reaches
    /// zero.
    pub fn dereference(&self, root: B256) {
        self.inner.lock().dereference_node(root);
    }

    /// Moves the subtree under `root` into the persistent layer.
    ///
    /// Persisted nodes survive any dereference; this is how the surrounding
    /// node retains the state of selected blocks while pruning the rest.
    pub fn commit(&self, root: B256) {
        let mut inner = self.inner.lock();
        inner.persist_node(root);
    }

    /// The number of nodes currently held in the refcounted cache.
    pub fn cached_nodes(&self) -> usize {
        self.inner.lock().dirty.len()
    }

    /// The number of persisted nodes.
    pub fn persisted_nodes(&self) -> usize {
        self.inner.lock().disk.len()
    }

    /// The current reference count of a cached node, `None` when the node is
    /// not in the cache.
    pub fn refs(&self, hash: B256) -> Option<u64> {
        self.inner.lock().dirty.get(&hash).map(|node| node.refs)
    }
}

impl TrieDbInner {
    fn dereference_node(&mut self, hash: B256) {
        let Some(node) = self.dirty.get_mut(&hash) else {
            // persisted or already evicted
            return
        };
        if node.refs == 0 {
            warn!(target: "state::trie", %hash, "dereferencing unreferenced trie node");
        } else {
            node.refs -= 1;
        }
        if node.refs == 0 {
            let node = self.dirty.remove(&hash).expect("node was just accessed");
            trace!(target: "state::trie", %hash, "evicted trie node");
            for child in node.children {
                self.dereference_node(child);
            }
        }
    }

    fn persist_node(&mut self, hash: B256) {
        let Some(node) = self.dirty.remove(&hash) else { return };
        for child in &node.children {
            self.persist_node(*child);
        }
        self.disk.insert(hash, node.data);
    }
}

/// An RAII pin on a trie root: references on construction, dereferences on
/// drop. Exactly one unpin per guard, on every exit path.
#[derive(Debug)]
pub struct TrieGuard {
    db: Arc<TrieDb>,
    root: B256,
}

impl TrieGuard {
    /// Pins `root` in the given store.
    pub fn new(db: Arc<TrieDb>, root: B256) -> Self {
        db.reference(root, B256::ZERO);
        Self { db, root }
    }

    /// The pinned root.
    pub const fn root(&self) -> B256 {
        self.root
    }
}

impl Drop for TrieGuard {
    fn drop(&mut self) {
        self.db.dereference(self.root);
    }
}
