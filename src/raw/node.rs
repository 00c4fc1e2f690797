use core::borrow::Borrow;

use smallvec::SmallVec;

use super::handle::Handle;

// Inline capacity for node storage. The order is a per-tree runtime value,
// so nodes of large-order trees spill to the heap; the common small orders
// stay inline. One extra slot covers the insert-then-split overflow window.
pub(crate) const INLINE_KEYS: usize = 8;
pub(crate) const INLINE_CHILDREN: usize = INLINE_KEYS + 1;

pub(crate) enum Node<K> {
    Inner(InnerNode<K>),
    Leaf(LeafNode<K>),
}

// B+Tree: inner nodes store separator keys and child handles.
// Invariant: keys[i] is the minimum key in the subtree at children[i + 1].
pub(crate) struct InnerNode<K> {
    keys: SmallVec<[K; INLINE_KEYS]>,
    children: SmallVec<[Handle; INLINE_CHILDREN]>,
}

// B+Tree: leaf nodes store keys and value handles, plus the sibling links
// forming the sequence set.
pub(crate) struct LeafNode<K> {
    prev: Option<Handle>,
    next: Option<Handle>,
    keys: SmallVec<[K; INLINE_KEYS]>,
    values: SmallVec<[Handle; INLINE_KEYS]>,
}

impl<K> Node<K> {
    /// Returns the leaf node, panicking if this is not a leaf.
    pub(crate) fn as_leaf(&self) -> &LeafNode<K> {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Inner(_) => panic!("expected leaf node"),
        }
    }

    /// Returns the leaf node mutably, panicking if this is not a leaf.
    pub(crate) fn as_leaf_mut(&mut self) -> &mut LeafNode<K> {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Inner(_) => panic!("expected leaf node"),
        }
    }

    /// Returns the inner node, panicking if this is a leaf.
    pub(crate) fn as_inner(&self) -> &InnerNode<K> {
        match self {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => panic!("expected inner node"),
        }
    }

    /// Returns the inner node mutably, panicking if this is a leaf.
    pub(crate) fn as_inner_mut(&mut self) -> &mut InnerNode<K> {
        match self {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => panic!("expected inner node"),
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        match self {
            Node::Inner(inner) => inner.key_count(),
            Node::Leaf(leaf) => leaf.key_count(),
        }
    }
}

impl<K> InnerNode<K> {
    pub(crate) fn new() -> Self {
        Self {
            keys: SmallVec::new(),
            children: SmallVec::new(),
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    pub(crate) fn keys(&self) -> &[K] {
        &self.keys
    }

    #[inline]
    pub(crate) fn child(&self, index: usize) -> Handle {
        self.children[index]
    }

    pub(crate) fn children(&self) -> &[Handle] {
        &self.children
    }

    /// Updates a separator key in place.
    pub(crate) fn set_key(&mut self, index: usize, key: K) {
        self.keys[index] = key;
    }

    /// Swaps a separator key out, returning the old one. Used by sibling
    /// rotations, which pass the displaced separator down into a child.
    pub(crate) fn replace_key(&mut self, index: usize, key: K) -> K {
        core::mem::replace(&mut self.keys[index], key)
    }

    /// Routes a search key to a child index. The first separator strictly
    /// greater than the key bounds the branch; equal keys route right, so
    /// this is the number of separators `<= key`.
    #[inline]
    pub(crate) fn route<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.keys.partition_point(|k| k.borrow() <= key)
    }

    /// Inserts a separator and the child to its right at the given position.
    pub(crate) fn insert_child(&mut self, index: usize, key: K, child: Handle) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, child);
    }

    /// Removes separator `index` and child `index + 1`, returning both.
    pub(crate) fn remove_child(&mut self, index: usize) -> (K, Handle) {
        let key = self.keys.remove(index);
        let child = self.children.remove(index + 1);
        (key, child)
    }

    /// Pushes a separator and child to the end.
    pub(crate) fn push_back(&mut self, key: K, child: Handle) {
        self.keys.push(key);
        self.children.push(child);
    }

    /// Pushes a separator and child to the front. `key` becomes the
    /// separator between `child` and the previous first child.
    pub(crate) fn push_front(&mut self, key: K, child: Handle) {
        self.keys.insert(0, key);
        self.children.insert(0, child);
    }

    /// Pops the last separator and child.
    pub(crate) fn pop_back(&mut self) -> Option<(K, Handle)> {
        let key = self.keys.pop()?;
        let child = self.children.pop().expect("child count is key count + 1");
        Some((key, child))
    }

    /// Pops the first separator and child.
    pub(crate) fn pop_front(&mut self) -> Option<(K, Handle)> {
        if self.keys.is_empty() {
            None
        } else {
            let key = self.keys.remove(0);
            let child = self.children.remove(0);
            Some((key, child))
        }
    }

    /// Sets the leftmost child (the one before any separator).
    pub(crate) fn set_first_child(&mut self, child: Handle) {
        if self.children.is_empty() {
            self.children.push(child);
        } else {
            self.children[0] = child;
        }
    }

    /// Splits this node at the midpoint. Returns (`median_key`, `new_node`).
    /// The median is consumed: it leaves this node and is promoted by the
    /// caller, unlike a leaf split where the separator stays in the leaf.
    pub(crate) fn split(&mut self) -> (K, InnerNode<K>) {
        let mid = self.keys.len() / 2;

        let mut right = InnerNode::new();
        right.keys = self.keys.drain(mid + 1..).collect();
        right.children = self.children.drain(mid + 1..).collect();

        let median_key = self.keys.pop().expect("split of a non-empty inner node");

        (median_key, right)
    }

    /// Absorbs a right sibling, pulling the shared parent separator down
    /// between the two key runs.
    pub(crate) fn merge_with_right(&mut self, separator: K, mut right: InnerNode<K>) {
        self.keys.push(separator);
        self.keys.append(&mut right.keys);
        self.children.append(&mut right.children);
    }
}

impl<K> LeafNode<K> {
    pub(crate) fn new() -> Self {
        Self {
            prev: None,
            next: None,
            keys: SmallVec::new(),
            values: SmallVec::new(),
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn prev(&self) -> Option<Handle> {
        self.prev
    }

    pub(crate) fn set_prev(&mut self, prev: Option<Handle>) {
        self.prev = prev;
    }

    pub(crate) fn next(&self) -> Option<Handle> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<Handle>) {
        self.next = next;
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    pub(crate) fn keys(&self) -> &[K] {
        &self.keys
    }

    #[inline]
    pub(crate) fn value(&self, index: usize) -> Handle {
        self.values[index]
    }

    pub(crate) fn last_key(&self) -> Option<&K> {
        self.keys.last()
    }

    /// Index of the first key equal to `key`, if any. Duplicates are stored
    /// adjacent, so this is the lower bound followed by an equality check.
    #[inline]
    pub(crate) fn search<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let index = self.keys.partition_point(|k| k.borrow() < key);
        (index < self.keys.len() && self.keys[index].borrow() == key).then_some(index)
    }

    /// Sorted insertion position for `key`: after any existing equal keys,
    /// matching the ties-right routing of the upper tree.
    #[inline]
    pub(crate) fn upper_bound<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.keys.partition_point(|k| k.borrow() <= key)
    }

    /// Inserts a key and value handle at the given position.
    pub(crate) fn insert(&mut self, index: usize, key: K, value: Handle) {
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    /// Removes the entry at the given position, returning it.
    pub(crate) fn remove(&mut self, index: usize) -> (K, Handle) {
        let key = self.keys.remove(index);
        let value = self.values.remove(index);
        (key, value)
    }

    pub(crate) fn push_back(&mut self, key: K, value: Handle) {
        self.keys.push(key);
        self.values.push(value);
    }

    pub(crate) fn push_front(&mut self, key: K, value: Handle) {
        self.keys.insert(0, key);
        self.values.insert(0, value);
    }

    pub(crate) fn pop_back(&mut self) -> Option<(K, Handle)> {
        let key = self.keys.pop()?;
        let value = self.values.pop().expect("values are aligned with keys");
        Some((key, value))
    }

    pub(crate) fn pop_front(&mut self) -> Option<(K, Handle)> {
        if self.keys.is_empty() {
            None
        } else {
            let key = self.keys.remove(0);
            let value = self.values.remove(0);
            Some((key, value))
        }
    }

    /// Splits this leaf, moving entries `[mid, ..)` into a new right leaf.
    /// The caller promotes a copy of the right leaf's first key as the
    /// separator and splices the new leaf into the chain.
    pub(crate) fn split(&mut self, mid: usize) -> LeafNode<K> {
        let mut right = LeafNode::new();
        right.keys = self.keys.drain(mid..).collect();
        right.values = self.values.drain(mid..).collect();
        right
    }

    /// Consumes the leaf, returning its keys and value handles.
    pub(crate) fn into_entries(self) -> (SmallVec<[K; INLINE_KEYS]>, SmallVec<[Handle; INLINE_KEYS]>) {
        (self.keys, self.values)
    }

    /// Absorbs a right sibling, inheriting its forward chain link.
    pub(crate) fn merge_with_right(&mut self, mut right: LeafNode<K>) {
        self.keys.append(&mut right.keys);
        self.values.append(&mut right.values);
        self.next = right.next;
    }
}
