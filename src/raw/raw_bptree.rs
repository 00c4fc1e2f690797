use core::borrow::Borrow;

use alloc::vec::Vec;
use smallvec::SmallVec;

use super::arena::Arena;
use super::handle::Handle;
use super::node::{InnerNode, LeafNode, Node};

/// The core B+ tree implementation backing `BPTreeMap`.
///
/// Duplicate keys are permitted: equal keys occupy distinct leaf slots in
/// insertion order, and lookups resolve to the first match along the
/// ties-route-right descent.
pub(crate) struct RawBPTree<K, V> {
    /// Arena storing all tree nodes.
    nodes: Arena<Node<K>>,
    /// Arena storing all values (separate from nodes for cache efficiency).
    values: Arena<V>,
    /// Handle to the root node, if the tree is non-empty.
    root: Option<Handle>,
    /// Branching factor: at most `order` children and `order - 1` keys per
    /// node. Fixed at construction, `>= 3`.
    order: usize,
    /// Total number of entries in the tree.
    len: usize,
    /// Handle to the first (leftmost) leaf, head of the leaf chain.
    first_leaf: Option<Handle>,
    /// Handle to the last (rightmost) leaf, tail of the leaf chain.
    last_leaf: Option<Handle>,
}

/// Path element recording one step of a root-to-leaf descent.
struct PathElement {
    /// Handle to the inner node at this level.
    node: Handle,
    /// Index of the child we descended into.
    child_index: usize,
}

/// A descent path (stack of path elements, leaf-most last).
type Path = SmallVec<[PathElement; 16]>;

impl<K, V> RawBPTree<K, V> {
    /// Creates a new, empty tree with the given order.
    pub(crate) const fn new(order: usize) -> Self {
        assert!(order >= 3, "`RawBPTree::new()` - `order` must be at least 3!");
        Self {
            nodes: Arena::new(),
            values: Arena::new(),
            root: None,
            order,
            len: 0,
            first_leaf: None,
            last_leaf: None,
        }
    }

    pub(crate) const fn order(&self) -> usize {
        self.order
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Upper capacity bound outside of a mutation in progress.
    const fn max_keys(&self) -> usize {
        self.order - 1
    }

    /// Minimum occupancy for every non-root node.
    const fn min_keys(&self) -> usize {
        self.order.div_ceil(2) - 1
    }

    /// Clears all entries from the tree.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.values.clear();
        self.root = None;
        self.len = 0;
        self.first_leaf = None;
        self.last_leaf = None;
    }

    /// Empties the tree, moving every entry into a `Vec` in ascending key
    /// order. Backs the owning iterator.
    pub(crate) fn drain_to_vec(&mut self) -> Vec<(K, V)> {
        let mut entries = Vec::with_capacity(self.len);
        let mut current = self.first_leaf;
        while let Some(handle) = current {
            let leaf = match self.nodes.take(handle) {
                Node::Leaf(leaf) => leaf,
                Node::Inner(_) => panic!("expected leaf node"),
            };
            current = leaf.next();
            let (keys, value_handles) = leaf.into_entries();
            for (key, value_handle) in keys.into_iter().zip(value_handles) {
                entries.push((key, self.values.take(value_handle)));
            }
        }
        self.clear();
        entries
    }

    pub(crate) fn first_leaf(&self) -> Option<Handle> {
        self.first_leaf
    }

    pub(crate) fn last_leaf(&self) -> Option<Handle> {
        self.last_leaf
    }

    pub(crate) fn root(&self) -> Option<Handle> {
        self.root
    }

    pub(crate) fn node(&self, handle: Handle) -> &Node<K> {
        self.nodes.get(handle)
    }

    pub(crate) fn value(&self, handle: Handle) -> &V {
        self.values.get(handle)
    }

    /// Returns the entry with the minimum key.
    pub(crate) fn first_key_value(&self) -> Option<(&K, &V)> {
        let leaf = self.nodes.get(self.first_leaf?).as_leaf();
        if leaf.key_count() == 0 {
            return None;
        }
        Some((leaf.key(0), self.values.get(leaf.value(0))))
    }

    /// Returns the entry with the maximum key (the last of its duplicates).
    pub(crate) fn last_key_value(&self) -> Option<(&K, &V)> {
        let leaf = self.nodes.get(self.last_leaf?).as_leaf();
        let key = leaf.last_key()?;
        Some((key, self.values.get(leaf.value(leaf.key_count() - 1))))
    }
}

impl<K: Clone + Ord, V> RawBPTree<K, V> {
    /// Descends to the leaf whose key range contains `key`, returning its
    /// handle. Ties route right: a key equal to a separator belongs to the
    /// subtree on the separator's right.
    fn leaf_for<Q>(&self, key: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let mut current = self.root?;
        loop {
            match self.nodes.get(current) {
                Node::Inner(inner) => current = inner.child(inner.route(key)),
                Node::Leaf(_) => return Some(current),
            }
        }
    }

    /// Descends to the target leaf while recording the path of
    /// `(inner node, child index)` steps taken, for bottom-up repair.
    fn leaf_for_with_path<Q>(&self, root: Handle, key: &Q) -> (Handle, Path)
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let mut path: Path = SmallVec::new();
        let mut current = root;
        loop {
            match self.nodes.get(current) {
                Node::Inner(inner) => {
                    let child_index = inner.route(key);
                    path.push(PathElement {
                        node: current,
                        child_index,
                    });
                    current = inner.child(child_index);
                }
                Node::Leaf(_) => return (current, path),
            }
        }
    }

    /// Searches for a key; returns the leaf handle and slot of the first
    /// matching entry.
    pub(crate) fn search<Q>(&self, key: &Q) -> Option<(Handle, usize)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let leaf_handle = self.leaf_for(key)?;
        let index = self.nodes.get(leaf_handle).as_leaf().search(key)?;
        Some((leaf_handle, index))
    }

    /// Returns a reference to the value of the first entry matching the key.
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf_handle, index) = self.search(key)?;
        let value_handle = self.nodes.get(leaf_handle).as_leaf().value(index);
        Some(self.values.get(value_handle))
    }

    /// Returns a mutable reference to the value of the first matching entry.
    pub(crate) fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf_handle, index) = self.search(key)?;
        let value_handle = self.nodes.get(leaf_handle).as_leaf().value(index);
        Some(self.values.get_mut(value_handle))
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.search(key).is_some()
    }

    /// Inserts an entry. Duplicates are accepted and stored after any
    /// existing equal keys; nothing is ever replaced.
    pub(crate) fn insert(&mut self, key: K, value: V) {
        let Some(root) = self.root else {
            let value_handle = self.values.alloc(value);
            let mut leaf = LeafNode::new();
            leaf.push_back(key, value_handle);
            let leaf_handle = self.nodes.alloc(Node::Leaf(leaf));
            self.root = Some(leaf_handle);
            self.first_leaf = Some(leaf_handle);
            self.last_leaf = Some(leaf_handle);
            self.len = 1;
            return;
        };

        let (leaf_handle, mut path) = self.leaf_for_with_path(root, &key);
        let max_keys = self.max_keys();

        let value_handle = self.values.alloc(value);
        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let index = leaf.upper_bound(&key);
        leaf.insert(index, key, value_handle);
        self.len += 1;

        // Insert-then-split: the leaf may briefly hold `order` keys.
        if self.nodes.get(leaf_handle).as_leaf().key_count() > max_keys {
            self.split_leaf_and_propagate(leaf_handle, &mut path);
        }
    }

    /// Splits an overflowing leaf and propagates splits up the tree.
    fn split_leaf_and_propagate(&mut self, leaf_handle: Handle, path: &mut Path) {
        let mid = self.order / 2;

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let mut right_leaf = leaf.split(mid);

        // The separator is a copy of the right leaf's first key; it lives in
        // both the leaf and the parent, unlike the median of an inner split.
        let separator = right_leaf.key(0).clone();

        // Splice the new leaf into the chain.
        let old_next = leaf.next();
        right_leaf.set_prev(Some(leaf_handle));
        right_leaf.set_next(old_next);

        let right_handle = self.nodes.alloc(Node::Leaf(right_leaf));
        self.nodes.get_mut(leaf_handle).as_leaf_mut().set_next(Some(right_handle));
        if let Some(next_handle) = old_next {
            self.nodes.get_mut(next_handle).as_leaf_mut().set_prev(Some(right_handle));
        }
        if self.last_leaf == Some(leaf_handle) {
            self.last_leaf = Some(right_handle);
        }

        self.propagate_split(path, separator, right_handle);
    }

    /// Walks the recorded path upward attaching each new sibling, splitting
    /// overflowing ancestors as it goes. Height grows by exactly one level
    /// only when the root itself splits.
    fn propagate_split(&mut self, path: &mut Path, mut separator: K, mut new_child: Handle) {
        let max_keys = self.max_keys();

        while let Some(elem) = path.pop() {
            let parent = self.nodes.get_mut(elem.node).as_inner_mut();
            parent.insert_child(elem.child_index, separator, new_child);

            if parent.key_count() <= max_keys {
                return;
            }

            // The median is consumed here and promoted one level up.
            let (median, right_inner) = parent.split();
            separator = median;
            new_child = self.nodes.alloc(Node::Inner(right_inner));
        }

        // The root split; wrap both halves in a new root.
        let old_root = self.root.expect("a split implies a non-empty tree");
        let mut new_root = InnerNode::new();
        new_root.set_first_child(old_root);
        new_root.push_back(separator, new_child);
        self.root = Some(self.nodes.alloc(Node::Inner(new_root)));
    }

    /// Removes the first entry matching the key, returning its value.
    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes the first entry matching the key, returning the pair.
    /// Absent keys are a no-op, not an error.
    pub(crate) fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let root = self.root?;
        let (leaf_handle, mut path) = self.leaf_for_with_path(root, key);
        let min_keys = self.min_keys();

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let index = leaf.search(key)?;
        let (removed_key, value_handle) = leaf.remove(index);
        let removed_value = self.values.take(value_handle);
        self.len -= 1;

        if self.len == 0 {
            self.nodes.clear();
            self.root = None;
            self.first_leaf = None;
            self.last_leaf = None;
            return Some((removed_key, removed_value));
        }

        // Deleting a leaf minimum leaves stale the one ancestor separator
        // that mirrors it; re-point it at the new minimum.
        if index == 0 && !path.is_empty() {
            let leaf = self.nodes.get(leaf_handle).as_leaf();
            if leaf.key_count() > 0 {
                let new_min = leaf.key(0).clone();
                self.repair_min_separator(&path, new_min);
            }
        }

        if !path.is_empty() && self.nodes.get(leaf_handle).as_leaf().key_count() < min_keys {
            self.rebalance_leaf(leaf_handle, &mut path);
        }

        Some((removed_key, removed_value))
    }

    /// Rewrites the separator mirroring this leaf's subtree minimum: the
    /// nearest ancestor where the descent did not take child 0. Deeper
    /// ancestors all have the leaf leftmost, so exactly one separator in the
    /// tree can equal its minimum.
    fn repair_min_separator(&mut self, path: &Path, new_min: K) {
        for elem in path.iter().rev() {
            if elem.child_index > 0 {
                self.nodes.get_mut(elem.node).as_inner_mut().set_key(elem.child_index - 1, new_min);
                return;
            }
        }
    }

    /// Rebalances an underflowing leaf. Preference order: a leftmost child
    /// partners with its right sibling, a rightmost child with its left
    /// sibling, and a middle child borrows left, then right, then merges
    /// into its left sibling.
    fn rebalance_leaf(&mut self, node_handle: Handle, path: &mut Path) {
        let min_keys = self.min_keys();
        let elem = path.last().expect("non-root nodes have a parent on the path");
        let parent_handle = elem.node;
        let child_index = elem.child_index;

        let parent = self.nodes.get(parent_handle).as_inner();
        let parent_key_count = parent.key_count();
        let left = (child_index > 0).then(|| parent.child(child_index - 1));
        let right = (child_index < parent_key_count).then(|| parent.child(child_index + 1));

        if child_index == 0 {
            let right_handle = right.expect("an inner node has at least two children");
            if self.nodes.get(right_handle).as_leaf().key_count() > min_keys {
                self.distribute_leaf_from_right(node_handle, right_handle, parent_handle, 0);
                // The leftmost child's minimum changed; fix the mirror above.
                let new_min = self.nodes.get(node_handle).as_leaf().key(0).clone();
                self.repair_min_separator(path, new_min);
            } else {
                self.merge_leaves(node_handle, right_handle, path, 0, true);
            }
        } else if child_index == parent_key_count {
            let left_handle = left.expect("rightmost child has a left sibling");
            if self.nodes.get(left_handle).as_leaf().key_count() > min_keys {
                self.distribute_leaf_from_left(left_handle, node_handle, parent_handle, child_index);
            } else {
                self.merge_leaves(left_handle, node_handle, path, child_index - 1, false);
            }
        } else {
            let left_handle = left.expect("middle child has a left sibling");
            let right_handle = right.expect("middle child has a right sibling");
            if self.nodes.get(left_handle).as_leaf().key_count() > min_keys {
                self.distribute_leaf_from_left(left_handle, node_handle, parent_handle, child_index);
            } else if self.nodes.get(right_handle).as_leaf().key_count() > min_keys {
                self.distribute_leaf_from_right(node_handle, right_handle, parent_handle, child_index);
                // An emptied node's minimum now comes from the right sibling;
                // its own mirror separator is one slot to the left.
                let new_min = self.nodes.get(node_handle).as_leaf().key(0).clone();
                self.nodes.get_mut(parent_handle).as_inner_mut().set_key(child_index - 1, new_min);
            } else {
                self.merge_leaves(left_handle, node_handle, path, child_index - 1, false);
            }
        }
    }

    /// Pools the two leaves' entries and splits them evenly, moving entries
    /// from the right sibling's front to the node's back. The parent
    /// separator becomes the right sibling's new first key.
    fn distribute_leaf_from_right(
        &mut self,
        node_handle: Handle,
        right_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let total =
            self.nodes.get(node_handle).as_leaf().key_count() + self.nodes.get(right_handle).as_leaf().key_count();
        let target = total / 2;

        while self.nodes.get(node_handle).as_leaf().key_count() < target {
            let (key, value) =
                self.nodes.get_mut(right_handle).as_leaf_mut().pop_front().expect("right sibling has surplus entries");
            self.nodes.get_mut(node_handle).as_leaf_mut().push_back(key, value);
        }

        let separator = self.nodes.get(right_handle).as_leaf().key(0).clone();
        self.nodes.get_mut(parent_handle).as_inner_mut().set_key(child_index, separator);
    }

    /// Pools the two leaves' entries and splits them evenly, moving entries
    /// from the left sibling's back to the node's front. The parent
    /// separator becomes the node's new first key.
    fn distribute_leaf_from_left(
        &mut self,
        left_handle: Handle,
        node_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let total =
            self.nodes.get(left_handle).as_leaf().key_count() + self.nodes.get(node_handle).as_leaf().key_count();
        let target_left = total / 2;

        while self.nodes.get(left_handle).as_leaf().key_count() > target_left {
            let (key, value) =
                self.nodes.get_mut(left_handle).as_leaf_mut().pop_back().expect("left sibling has surplus entries");
            self.nodes.get_mut(node_handle).as_leaf_mut().push_front(key, value);
        }

        let separator = self.nodes.get(node_handle).as_leaf().key(0).clone();
        self.nodes.get_mut(parent_handle).as_inner_mut().set_key(child_index - 1, separator);
    }

    /// Merges two adjacent leaves, unlinking the right one from the chain
    /// and removing its separator/child slot from the parent.
    fn merge_leaves(
        &mut self,
        left_handle: Handle,
        right_handle: Handle,
        path: &mut Path,
        separator_idx: usize,
        merged_is_leftmost: bool,
    ) {
        let right = match self.nodes.take(right_handle) {
            Node::Leaf(leaf) => leaf,
            Node::Inner(_) => panic!("expected leaf node"),
        };

        let left = self.nodes.get_mut(left_handle).as_leaf_mut();
        left.merge_with_right(right);

        // Stitch the chain bypass around the removed leaf.
        if let Some(next_handle) = self.nodes.get(left_handle).as_leaf().next() {
            self.nodes.get_mut(next_handle).as_leaf_mut().set_prev(Some(left_handle));
        }
        if self.last_leaf == Some(right_handle) {
            self.last_leaf = Some(left_handle);
        }

        // A leftmost child that absorbed its right sibling may have a new
        // subtree minimum (it was empty or lost its old one); repair before
        // the path is consumed by upward propagation.
        if merged_is_leftmost {
            let new_min = self.nodes.get(left_handle).as_leaf().key(0).clone();
            self.repair_min_separator(path, new_min);
        }

        self.remove_from_parent_and_propagate(path, separator_idx);
    }

    /// Removes a separator/child slot from the parent of a merge and
    /// continues rebalancing upward, possibly collapsing the root.
    fn remove_from_parent_and_propagate(&mut self, path: &mut Path, separator_idx: usize) {
        let elem = path.pop().expect("a merge has a parent");
        let parent_handle = elem.node;

        // The right child was already taken from the arena by the merge.
        let _ = self.nodes.get_mut(parent_handle).as_inner_mut().remove_child(separator_idx);

        if path.is_empty() {
            // The parent is the root; it collapses once it runs out of
            // separators, shrinking the height by one.
            let parent = self.nodes.get(parent_handle).as_inner();
            if parent.key_count() == 0 {
                let new_root = parent.child(0);
                self.nodes.free(parent_handle);
                self.root = Some(new_root);
            }
            return;
        }

        if self.nodes.get(parent_handle).as_inner().key_count() < self.min_keys() {
            self.rebalance_inner(parent_handle, path);
        }
    }

    /// Rebalances an underflowing inner node; same partner preference as
    /// `rebalance_leaf`.
    fn rebalance_inner(&mut self, node_handle: Handle, path: &mut Path) {
        let min_keys = self.min_keys();
        let elem = path.last().expect("non-root nodes have a parent on the path");
        let parent_handle = elem.node;
        let child_index = elem.child_index;

        let parent = self.nodes.get(parent_handle).as_inner();
        let parent_key_count = parent.key_count();
        let left = (child_index > 0).then(|| parent.child(child_index - 1));
        let right = (child_index < parent_key_count).then(|| parent.child(child_index + 1));

        if child_index == 0 {
            let right_handle = right.expect("an inner node has at least two children");
            if self.nodes.get(right_handle).as_inner().key_count() > min_keys {
                self.rotate_inner_from_right(node_handle, right_handle, parent_handle, 0);
            } else {
                self.merge_inner(node_handle, right_handle, path, 0);
            }
        } else if child_index == parent_key_count {
            let left_handle = left.expect("rightmost child has a left sibling");
            if self.nodes.get(left_handle).as_inner().key_count() > min_keys {
                self.rotate_inner_from_left(left_handle, node_handle, parent_handle, child_index);
            } else {
                self.merge_inner(left_handle, node_handle, path, child_index - 1);
            }
        } else {
            let left_handle = left.expect("middle child has a left sibling");
            let right_handle = right.expect("middle child has a right sibling");
            if self.nodes.get(left_handle).as_inner().key_count() > min_keys {
                self.rotate_inner_from_left(left_handle, node_handle, parent_handle, child_index);
            } else if self.nodes.get(right_handle).as_inner().key_count() > min_keys {
                self.rotate_inner_from_right(node_handle, right_handle, parent_handle, child_index);
            } else {
                self.merge_inner(left_handle, node_handle, path, child_index - 1);
            }
        }
    }

    /// Evens out two inner siblings by rotating keys and children through
    /// the parent separator, right to left. Each step pulls the separator
    /// down as the node's new last key and promotes the right sibling's
    /// first key, which is exactly the moved child's subtree minimum.
    fn rotate_inner_from_right(
        &mut self,
        node_handle: Handle,
        right_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let total =
            self.nodes.get(node_handle).as_inner().key_count() + self.nodes.get(right_handle).as_inner().key_count();
        let target = total / 2;

        while self.nodes.get(node_handle).as_inner().key_count() < target {
            let (key, child) =
                self.nodes.get_mut(right_handle).as_inner_mut().pop_front().expect("right sibling has surplus keys");
            let separator = self.nodes.get_mut(parent_handle).as_inner_mut().replace_key(child_index, key);
            self.nodes.get_mut(node_handle).as_inner_mut().push_back(separator, child);
        }
    }

    /// Mirror image of `rotate_inner_from_right`: rotates through the parent
    /// separator left to right until the siblings are even.
    fn rotate_inner_from_left(
        &mut self,
        left_handle: Handle,
        node_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let total =
            self.nodes.get(left_handle).as_inner().key_count() + self.nodes.get(node_handle).as_inner().key_count();
        let target_left = total / 2;

        while self.nodes.get(left_handle).as_inner().key_count() > target_left {
            let (key, child) =
                self.nodes.get_mut(left_handle).as_inner_mut().pop_back().expect("left sibling has surplus keys");
            let separator = self.nodes.get_mut(parent_handle).as_inner_mut().replace_key(child_index - 1, key);
            self.nodes.get_mut(node_handle).as_inner_mut().push_front(separator, child);
        }
    }

    /// Merges two adjacent inner nodes, pulling the parent separator down
    /// between their key runs, then removes the slot from the parent.
    fn merge_inner(&mut self, left_handle: Handle, right_handle: Handle, path: &mut Path, separator_idx: usize) {
        let elem = path.last().expect("a merge has a parent");
        let separator = self.nodes.get(elem.node).as_inner().key(separator_idx).clone();

        let right = match self.nodes.take(right_handle) {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => panic!("expected inner node"),
        };

        self.nodes.get_mut(left_handle).as_inner_mut().merge_with_right(separator, right);
        self.remove_from_parent_and_propagate(path, separator_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::String;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    impl<K: Ord + Clone, V> RawBPTree<K, V> {
        /// Validates every structural invariant, panicking with a report if
        /// any is violated. Test-only; callers never observe a broken tree.
        pub(crate) fn validate_invariants(&self) {
            let Some(root) = self.root else {
                assert_eq!(self.len, 0, "empty tree should have len 0");
                assert!(self.first_leaf.is_none(), "empty tree should have no first_leaf");
                assert!(self.last_leaf.is_none(), "empty tree should have no last_leaf");
                return;
            };

            let mut errors: Vec<String> = Vec::new();
            let mut all_leaves: Vec<Handle> = Vec::new();
            let mut leaf_depth: Option<usize> = None;
            self.validate_node(root, 0, true, &mut leaf_depth, &mut all_leaves, &mut errors);

            self.validate_leaf_chain(&all_leaves, &mut errors);

            let actual: usize = all_leaves.iter().map(|&h| self.nodes.get(h).as_leaf().key_count()).sum();
            if self.len != actual {
                errors.push(format!("len mismatch: self.len={}, actual count={}", self.len, actual));
            }

            assert!(errors.is_empty(), "tree invariant violations:\n{}", errors.join("\n"));
        }

        /// Returns the subtree's (min, max) keys.
        fn validate_node(
            &self,
            handle: Handle,
            depth: usize,
            is_root: bool,
            leaf_depth: &mut Option<usize>,
            all_leaves: &mut Vec<Handle>,
            errors: &mut Vec<String>,
        ) -> Option<(&K, &K)> {
            let node = self.nodes.get(handle);

            if !is_root {
                let count = node.key_count();
                if count < self.min_keys() || count > self.max_keys() {
                    errors.push(format!(
                        "occupancy out of bounds at {handle:?}: {} not in [{}, {}]",
                        count,
                        self.min_keys(),
                        self.max_keys()
                    ));
                }
            }

            match node {
                Node::Leaf(leaf) => {
                    match *leaf_depth {
                        None => *leaf_depth = Some(depth),
                        Some(expected) => {
                            if depth != expected {
                                errors.push(format!("leaf depth mismatch at {handle:?}: expected {expected}, got {depth}"));
                            }
                        }
                    }

                    // Sorted ascending; duplicates are adjacent and legal.
                    for i in 1..leaf.key_count() {
                        if leaf.key(i - 1) > leaf.key(i) {
                            errors.push(format!("leaf keys not sorted at {handle:?}, indices {} and {i}", i - 1));
                        }
                    }

                    all_leaves.push(handle);

                    (leaf.key_count() > 0).then(|| (leaf.key(0), leaf.key(leaf.key_count() - 1)))
                }
                Node::Inner(inner) => {
                    if is_root && inner.key_count() == 0 {
                        errors.push(format!("inner root at {handle:?} has no separator"));
                    }
                    if inner.child_count() != inner.key_count() + 1 {
                        errors.push(format!(
                            "child count mismatch at {handle:?}: {} children for {} keys",
                            inner.child_count(),
                            inner.key_count()
                        ));
                    }
                    for i in 1..inner.key_count() {
                        if inner.key(i - 1) > inner.key(i) {
                            errors.push(format!("inner keys not sorted at {handle:?}, indices {} and {i}", i - 1));
                        }
                    }

                    let mut subtree_min: Option<&K> = None;
                    let mut subtree_max: Option<&K> = None;
                    for i in 0..inner.child_count() {
                        let bounds = self.validate_node(inner.child(i), depth + 1, false, leaf_depth, all_leaves, errors);
                        let Some((child_min, child_max)) = bounds else {
                            errors.push(format!("empty non-root subtree under {handle:?} child {i}"));
                            continue;
                        };

                        // keys[i] is the minimum of children[i + 1]; the left
                        // neighbour's keys never exceed the separator.
                        if i > 0 && inner.key(i - 1) != child_min {
                            errors.push(format!("separator {} at {handle:?} is not its right subtree's minimum", i - 1));
                        }
                        if i < inner.key_count() && child_max > inner.key(i) {
                            errors.push(format!("subtree {i} at {handle:?} exceeds separator {i}"));
                        }

                        if subtree_min.is_none() {
                            subtree_min = Some(child_min);
                        }
                        subtree_max = Some(child_max);
                    }

                    subtree_min.zip(subtree_max)
                }
            }
        }

        fn validate_leaf_chain(&self, all_leaves: &[Handle], errors: &mut Vec<String>) {
            if self.first_leaf != all_leaves.first().copied() {
                errors.push(format!(
                    "first_leaf mismatch: expected {:?}, got {:?}",
                    all_leaves.first().copied(),
                    self.first_leaf
                ));
            }
            if self.last_leaf != all_leaves.last().copied() {
                errors.push(format!(
                    "last_leaf mismatch: expected {:?}, got {:?}",
                    all_leaves.last().copied(),
                    self.last_leaf
                ));
            }

            for i in 0..all_leaves.len() {
                let leaf = self.nodes.get(all_leaves[i]).as_leaf();

                let expected_next = all_leaves.get(i + 1).copied();
                if leaf.next() != expected_next {
                    errors.push(format!("leaf chain next mismatch at index {i}: expected {expected_next:?}, got {:?}", leaf.next()));
                }

                let expected_prev = (i > 0).then(|| all_leaves[i - 1]);
                if leaf.prev() != expected_prev {
                    errors.push(format!("leaf chain prev mismatch at index {i}: expected {expected_prev:?}, got {:?}", leaf.prev()));
                }

                // Chain is globally sorted: no leaf starts below its
                // predecessor's last key.
                if i > 0 {
                    let prev_leaf = self.nodes.get(all_leaves[i - 1]).as_leaf();
                    if let (Some(prev_last), true) = (prev_leaf.last_key(), leaf.key_count() > 0)
                        && prev_last > leaf.key(0)
                    {
                        errors.push(format!("leaf chain out of order between indices {} and {i}", i - 1));
                    }
                }
            }
        }

        /// All entries in chain order, for comparison against a model.
        fn entries_in_order(&self) -> Vec<(K, &V)> {
            let mut entries = Vec::with_capacity(self.len);
            let mut current = self.first_leaf;
            while let Some(handle) = current {
                let leaf = self.nodes.get(handle).as_leaf();
                for i in 0..leaf.key_count() {
                    entries.push((leaf.key(i).clone(), self.values.get(leaf.value(i))));
                }
                current = leaf.next();
            }
            entries
        }
    }

    /// Sorted-vec multimap model: inserts go after existing equal keys.
    /// Removal is value-matched because the tree removes whichever duplicate
    /// its descent reaches, not necessarily the oldest one.
    fn model_insert(model: &mut Vec<(i32, i32)>, key: i32, value: i32) {
        let index = model.partition_point(|&(k, _)| k <= key);
        model.insert(index, (key, value));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(i32, i32),
        Remove(i32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0i32..200, any::<i32>()).prop_map(|(k, v)| Op::Insert(k, v)),
            2 => (0i32..200).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn invariants_hold_for_all_orders(
            order in 3usize..=16,
            ops in prop::collection::vec(op_strategy(), 0..400),
        ) {
            let mut tree: RawBPTree<i32, i32> = RawBPTree::new(order);
            let mut model: Vec<(i32, i32)> = Vec::new();

            for op in ops {
                match op {
                    Op::Insert(key, value) => {
                        tree.insert(key, value);
                        model_insert(&mut model, key, value);
                    }
                    Op::Remove(key) => {
                        match tree.remove_entry(&key) {
                            Some((k, v)) => {
                                prop_assert_eq!(k, key);
                                let position = model.iter().position(|&entry| entry == (k, v));
                                prop_assert!(position.is_some(), "tree removed an entry absent from the model");
                                model.remove(position.unwrap());
                            }
                            None => prop_assert!(model.iter().all(|&(k, _)| k != key)),
                        }
                    }
                }

                tree.validate_invariants();
                prop_assert_eq!(tree.len(), model.len());

                let entries: Vec<(i32, i32)> = tree.entries_in_order().into_iter().map(|(k, v)| (k, *v)).collect();
                prop_assert_eq!(entries, model.clone());
            }
        }

        #[test]
        fn search_finds_all_present_keys(
            order in 3usize..=16,
            keys in prop::collection::btree_set(0i32..1000, 1..200),
        ) {
            let mut tree: RawBPTree<i32, i32> = RawBPTree::new(order);
            for &key in &keys {
                tree.insert(key, key * 2);
            }
            tree.validate_invariants();

            for &key in &keys {
                prop_assert_eq!(tree.get(&key), Some(&(key * 2)));
            }
            prop_assert!(tree.get(&-1).is_none());
            prop_assert!(tree.get(&1000).is_none());
        }
    }

    #[test]
    fn duplicate_keys_are_distinct_entries() {
        let mut tree: RawBPTree<i32, &str> = RawBPTree::new(4);
        tree.insert(7, "first");
        tree.insert(7, "second");
        tree.insert(7, "third");
        tree.validate_invariants();

        assert_eq!(tree.len(), 3);
        // The first match wins lookups.
        assert_eq!(tree.get(&7), Some(&"first"));

        // Each removal peels off one entry.
        assert_eq!(tree.remove(&7), Some("first"));
        tree.validate_invariants();
        assert_eq!(tree.remove(&7), Some("second"));
        assert_eq!(tree.remove(&7), Some("third"));
        assert_eq!(tree.remove(&7), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn duplicates_spanning_a_split_all_removable() {
        let mut tree: RawBPTree<i32, i32> = RawBPTree::new(3);
        for i in 0..8 {
            tree.insert(5, i);
            tree.validate_invariants();
        }

        // Copies of the key now sit on both sides of promoted separators;
        // repeated removal must reach every one of them.
        for _ in 0..8 {
            assert!(tree.remove(&5).is_some());
            tree.validate_invariants();
        }
        assert!(tree.is_empty());
    }

    // At order 3 an underflowing leaf holds zero keys, so these scenarios
    // drive every leaf rebalancing branch against an emptied node. `1..=6`
    // builds a two-level tree whose right inner node has three leaf
    // children: `[3]`, `[4]`, `[5, 6]`.
    fn emptied_leaf_fixture() -> RawBPTree<i32, i32> {
        let mut tree = RawBPTree::new(3);
        for i in 1..=6 {
            tree.insert(i, i * 10);
        }
        tree.validate_invariants();
        tree
    }

    fn keys_in_order(tree: &RawBPTree<i32, i32>) -> Vec<i32> {
        tree.entries_in_order().into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn emptied_middle_leaf_borrows_from_right_sibling() {
        let mut tree = emptied_leaf_fixture();

        // `[4]` empties; its left sibling is at minimum but `[5, 6]` can
        // donate. Both parent separators around the node must move.
        assert_eq!(tree.remove_entry(&4), Some((4, 40)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 3, 5, 6]);
        assert_eq!(tree.get(&5), Some(&50));
        assert_eq!(tree.get(&4), None);
    }

    #[test]
    fn emptied_middle_leaf_borrows_from_left_sibling() {
        let mut tree = emptied_leaf_fixture();
        tree.insert(3, 31); // left sibling becomes `[3, 3]`

        assert_eq!(tree.remove_entry(&4), Some((4, 40)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 3, 3, 5, 6]);
    }

    #[test]
    fn emptied_middle_leaf_merges_into_left_sibling() {
        let mut tree = emptied_leaf_fixture();
        assert_eq!(tree.remove_entry(&6), Some((6, 60)));
        tree.validate_invariants();

        // Both siblings of the emptied `[4]` are at minimum now.
        assert_eq!(tree.remove_entry(&4), Some((4, 40)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 3, 5]);
    }

    #[test]
    fn emptied_leftmost_leaf_borrows_from_right_sibling() {
        let mut tree = emptied_leaf_fixture();
        tree.insert(4, 41); // right sibling of `[3]` becomes `[4, 4]`

        // The emptied leaf's new minimum mirrors an ancestor separator,
        // not one in its immediate parent.
        assert_eq!(tree.remove_entry(&3), Some((3, 30)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 4, 4, 5, 6]);
    }

    #[test]
    fn emptied_leftmost_leaf_merges_with_right_sibling() {
        let mut tree = emptied_leaf_fixture();

        assert_eq!(tree.remove_entry(&3), Some((3, 30)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 4, 5, 6]);
        assert_eq!(tree.get(&4), Some(&40));
    }

    #[test]
    fn emptied_rightmost_leaf_borrows_from_left_sibling() {
        let mut tree = emptied_leaf_fixture();
        tree.insert(4, 41);
        assert_eq!(tree.remove_entry(&6), Some((6, 60)));
        tree.validate_invariants();

        assert_eq!(tree.remove_entry(&5), Some((5, 50)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 3, 4, 4]);
    }

    #[test]
    fn emptied_rightmost_leaf_merges_into_left_sibling() {
        let mut tree = emptied_leaf_fixture();
        assert_eq!(tree.remove_entry(&6), Some((6, 60)));
        tree.validate_invariants();

        assert_eq!(tree.remove_entry(&5), Some((5, 50)));
        tree.validate_invariants();
        assert_eq!(keys_in_order(&tree), [1, 2, 3, 4]);
        assert_eq!(tree.last_key_value(), Some((&4, &40)));
    }

    #[test]
    fn removing_an_absent_key_is_a_noop() {
        let mut tree: RawBPTree<i32, i32> = RawBPTree::new(4);
        for i in 0..20 {
            tree.insert(i, i);
        }

        let before: Vec<(i32, i32)> = tree.entries_in_order().into_iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(tree.remove(&99), None);
        tree.validate_invariants();
        let after: Vec<(i32, i32)> = tree.entries_in_order().into_iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(before, after);
        assert_eq!(tree.len(), 20);
    }

    #[test]
    fn height_shrinks_back_to_a_single_leaf() {
        let mut tree: RawBPTree<i32, i32> = RawBPTree::new(4);
        for i in 0..100 {
            tree.insert(i, i);
        }
        assert!(matches!(tree.node(tree.root().expect("non-empty")), Node::Inner(_)));

        for i in 0..99 {
            tree.remove(&i);
            tree.validate_invariants();
        }

        // One entry left: the root has collapsed to a single leaf.
        let root = tree.root().expect("one entry remains");
        assert!(matches!(tree.node(root), Node::Leaf(_)));
        assert_eq!(tree.get(&99), Some(&99));
        assert_eq!(tree.get(&0), None);
    }

    #[test]
    #[should_panic(expected = "`order` must be at least 3")]
    fn order_below_three_is_rejected() {
        let _ = RawBPTree::<i32, i32>::new(2);
    }
}
