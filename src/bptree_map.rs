use core::borrow::Borrow;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::iter::FusedIterator;
use core::ops::Index;

use alloc::vec;
use alloc::vec::Vec;

use crate::raw::{Handle, Node, RawBPTree};

/// Default branching factor for [`BPTreeMap::new`]. A full node plus the
/// transient overflow slot fits the nodes' inline storage exactly.
const DEFAULT_ORDER: usize = 8;

/// An ordered multimap based on a [B+ tree].
///
/// Given a key type with a [total order], an ordered map stores its entries
/// in key order. That means that keys must be of a type that implements the
/// [`Ord`] trait, such that two keys can always be compared to determine
/// their [`Ordering`].
///
/// `BPTreeMap` is a *multimap*: inserting a key that is already present adds
/// another entry rather than replacing the existing one. Equal keys keep
/// their insertion order; lookup and removal resolve to the matching entry
/// the tree's descent reaches first, one entry per removal call.
/// All entries live in the leaves, which form a sorted doubly linked
/// chain, so iterators obtained from functions such as [`BPTreeMap::iter`],
/// [`BPTreeMap::keys`], or [`BPTreeMap::values`] produce their items in key
/// order and take constant time per item returned after a logarithmic
/// descent to the first leaf.
///
/// The branching factor (*order*) is chosen at construction: a tree of order
/// `m` stores at most `m - 1` keys per node, and every non-root node stays
/// at least roughly half full. [`BPTreeMap::new`] picks a default;
/// [`BPTreeMap::with_order`] accepts any order of at least 3.
///
/// It is a logic error for a key to be modified in such a way that the key's
/// ordering relative to any other key, as determined by the [`Ord`] trait,
/// changes while it is in the map. This is normally only possible through
/// [`Cell`], [`RefCell`], global state, or I/O. The behavior resulting from
/// such a logic error is not specified but will not result in undefined
/// behavior: this crate contains no unsafe code.
///
/// # Examples
///
/// ```
/// use bptree::BPTreeMap;
///
/// // type inference lets us omit an explicit type signature (which
/// // would be `BPTreeMap<&str, u32>` in this example).
/// let mut word_counts = BPTreeMap::new();
///
/// word_counts.insert("the", 112);
/// word_counts.insert("tree", 14);
/// word_counts.insert("leaf", 9);
///
/// if !word_counts.contains_key("node") {
///     println!("{} distinct words, but no 'node'.", word_counts.len());
/// }
///
/// // look up the value for a key (panics if the key is not found).
/// println!("'the' appears {} times", word_counts["the"]);
///
/// // iterate over everything in key order.
/// for (word, count) in &word_counts {
///     println!("{word}: {count}");
/// }
/// ```
///
/// A `BPTreeMap` with a known list of items can be initialized from an
/// array:
///
/// ```
/// use bptree::BPTreeMap;
///
/// let solar_distance = BPTreeMap::from([
///     ("Mercury", 0.4),
///     ("Venus", 0.7),
///     ("Earth", 1.0),
///     ("Mars", 1.5),
/// ]);
/// assert_eq!(solar_distance.first_key_value(), Some((&"Earth", &1.0)));
/// ```
///
/// [B+ tree]: https://en.wikipedia.org/wiki/B%2B_tree
/// [total order]: https://en.wikipedia.org/wiki/Total_order
/// [`Cell`]: core::cell::Cell
/// [`RefCell`]: core::cell::RefCell
pub struct BPTreeMap<K, V> {
    raw: RawBPTree<K, V>,
}

/// An iterator over the entries of a `BPTreeMap`.
///
/// This `struct` is created by the [`iter`] method on [`BPTreeMap`]. See its
/// documentation for more.
///
/// # Examples
///
/// ```
/// use bptree::BPTreeMap;
///
/// let map = BPTreeMap::from([(1, "a"), (2, "b")]);
/// let mut iter = map.iter();
/// assert_eq!(iter.next(), Some((&1, &"a")));
/// assert_eq!(iter.next_back(), Some((&2, &"b")));
/// assert_eq!(iter.next(), None);
/// ```
///
/// [`iter`]: BPTreeMap::iter
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Iter<'a, K, V> {
    tree: &'a RawBPTree<K, V>,
    front_leaf: Option<Handle>,
    front_index: usize,
    back_leaf: Option<Handle>,
    back_index: usize,
    remaining: usize,
}

/// An owning iterator over the entries of a `BPTreeMap`, sorted by key.
///
/// This `struct` is created by the [`into_iter`] method on [`BPTreeMap`]
/// (provided by the [`IntoIterator`] trait). See its documentation for more.
///
/// [`into_iter`]: IntoIterator::into_iter
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct IntoIter<K, V> {
    inner: vec::IntoIter<(K, V)>,
}

/// An iterator over the keys of a `BPTreeMap`.
///
/// This `struct` is created by the [`keys`] method on [`BPTreeMap`]. See its
/// documentation for more.
///
/// [`keys`]: BPTreeMap::keys
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

/// An iterator over the values of a `BPTreeMap`.
///
/// This `struct` is created by the [`values`] method on [`BPTreeMap`]. See
/// its documentation for more.
///
/// [`values`]: BPTreeMap::values
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

/// Renders the node structure of a `BPTreeMap`, one line per level.
///
/// This `struct` is created by the [`structure`] method on [`BPTreeMap`].
/// See its documentation for more.
///
/// [`structure`]: BPTreeMap::structure
#[must_use = "this adaptor renders nothing unless displayed"]
pub struct Structure<'a, K, V> {
    raw: &'a RawBPTree<K, V>,
}

impl<K, V> BPTreeMap<K, V> {
    /// Makes a new, empty `BPTreeMap` with a default branching factor.
    ///
    /// Does not allocate anything on its own.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    ///
    /// // entries can now be inserted into the empty map
    /// map.insert(1, "a");
    /// ```
    #[must_use]
    pub const fn new() -> BPTreeMap<K, V> {
        BPTreeMap {
            raw: RawBPTree::new(DEFAULT_ORDER),
        }
    }

    /// Makes a new, empty `BPTreeMap` with the given branching factor: each
    /// node holds at most `order - 1` keys and non-root nodes stay at least
    /// `⌈order / 2⌉ - 1` keys full.
    ///
    /// Does not allocate anything on its own.
    ///
    /// # Panics
    ///
    /// Panics if `order < 3`; smaller orders cannot split.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::with_order(4);
    /// for i in 0..100 {
    ///     map.insert(i, i * 10);
    /// }
    /// assert_eq!(map.order(), 4);
    /// assert_eq!(map.len(), 100);
    /// ```
    #[must_use]
    pub const fn with_order(order: usize) -> BPTreeMap<K, V> {
        BPTreeMap {
            raw: RawBPTree::new(order),
        }
    }

    /// Returns the branching factor the map was constructed with.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.raw.order()
    }

    /// Returns the number of entries in the map. Duplicate keys each count.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut a = BPTreeMap::new();
    /// assert_eq!(a.len(), 0);
    /// a.insert(1, "a");
    /// a.insert(1, "also a");
    /// assert_eq!(a.len(), 2);
    /// ```
    #[must_use]
    pub const fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut a = BPTreeMap::new();
    /// assert!(a.is_empty());
    /// a.insert(1, "a");
    /// assert!(!a.is_empty());
    /// ```
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Clears the map, removing all entries. The order is kept.
    ///
    /// # Complexity
    ///
    /// O(n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut a = BPTreeMap::new();
    /// a.insert(1, "a");
    /// a.clear();
    /// assert!(a.is_empty());
    /// ```
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// Gets an iterator over the entries of the map, sorted by key.
    /// Duplicate keys appear in insertion order.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(3, "c");
    /// map.insert(2, "b");
    /// map.insert(1, "a");
    ///
    /// for (key, value) in map.iter() {
    ///     println!("{key}: {value}");
    /// }
    ///
    /// let (first_key, first_value) = map.iter().next().unwrap();
    /// assert_eq!((*first_key, *first_value), (1, "a"));
    /// ```
    ///
    /// # Complexity
    ///
    /// O(1) to create the iterator; O(1) per iteration step via linked
    /// leaves.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let back_leaf = self.raw.last_leaf();
        let back_index = back_leaf.map_or(0, |handle| {
            self.raw.node(handle).as_leaf().key_count().saturating_sub(1)
        });
        Iter {
            tree: &self.raw,
            front_leaf: self.raw.first_leaf(),
            front_index: 0,
            back_leaf,
            back_index,
            remaining: self.raw.len(),
        }
    }

    /// Gets an iterator over the keys of the map, in sorted order.
    /// Duplicate keys are yielded once per entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut a = BPTreeMap::new();
    /// a.insert(2, "b");
    /// a.insert(1, "a");
    ///
    /// let keys: Vec<_> = a.keys().cloned().collect();
    /// assert_eq!(keys, [1, 2]);
    /// ```
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Gets an iterator over the values of the map, in ascending key order.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut a = BPTreeMap::new();
    /// a.insert(1, "hello");
    /// a.insert(2, "goodbye");
    ///
    /// let values: Vec<&str> = a.values().cloned().collect();
    /// assert_eq!(values, ["hello", "goodbye"]);
    /// ```
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Collects all values into a `Vec` in ascending key order by walking
    /// the leaf chain once.
    ///
    /// # Complexity
    ///
    /// O(n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut a = BPTreeMap::new();
    /// a.insert(2, "b");
    /// a.insert(1, "a");
    /// a.insert(2, "b again");
    ///
    /// assert_eq!(a.values_vec(), ["a", "b", "b again"]);
    /// ```
    #[must_use]
    pub fn values_vec(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.values().cloned().collect()
    }

    /// Returns an adaptor that [`Display`]s the node structure of the tree,
    /// one line per level with each node's keys in brackets. Intended for
    /// debugging and for eyeballing split and merge behavior.
    ///
    /// [`Display`]: core::fmt::Display
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::with_order(3);
    /// for i in 1..=5 {
    ///     map.insert(i, ());
    /// }
    /// println!("{}", map.structure());
    /// ```
    pub fn structure(&self) -> Structure<'_, K, V> {
        Structure { raw: &self.raw }
    }

    /// Returns the first entry in the map, that is, the entry with the
    /// minimum key.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// assert_eq!(map.first_key_value(), None);
    /// map.insert(1, "b");
    /// map.insert(2, "a");
    /// assert_eq!(map.first_key_value(), Some((&1, &"b")));
    /// ```
    #[must_use]
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.raw.first_key_value()
    }

    /// Returns the last entry in the map, that is, the entry with the
    /// maximum key. Under duplicates this is the most recently inserted of
    /// the maximal entries.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "b");
    /// map.insert(2, "a");
    /// assert_eq!(map.last_key_value(), Some((&2, &"a")));
    /// ```
    #[must_use]
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        self.raw.last_key_value()
    }
}

impl<K: Clone + Ord, V> BPTreeMap<K, V> {
    /// Returns a reference to the value of an entry matching the key, or
    /// `None` if the key is absent. Under duplicates, the entry is the one
    /// the tree's descent reaches first.
    ///
    /// The key may be any borrowed form of the map's key type, but the
    /// ordering on the borrowed form *must* match the ordering on the key
    /// type.
    ///
    /// # Complexity
    ///
    /// O(log n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.get(key)
    }

    /// Returns the key-value pair of an entry matching the supplied key.
    /// This is potentially useful:
    /// - for key types where non-identical keys can be considered equal;
    /// - for getting the `&K` stored key value from a borrowed `&Q` lookup
    ///   key; or
    /// - for getting a reference to a key with the same lifetime as the
    ///   collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.get_key_value(&1), Some((&1, &"a")));
    /// assert_eq!(map.get_key_value(&2), None);
    /// ```
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf_handle, index) = self.raw.search(key)?;
        let leaf = self.raw.node(leaf_handle).as_leaf();
        Some((leaf.key(index), self.raw.value(leaf.value(index))))
    }

    /// Returns a mutable reference to the value of an entry matching the
    /// key.
    ///
    /// # Complexity
    ///
    /// O(log n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "a");
    /// if let Some(x) = map.get_mut(&1) {
    ///     *x = "b";
    /// }
    /// assert_eq!(map.get(&1), Some(&"b"));
    /// ```
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.get_mut(key)
    }

    /// Returns `true` if the map contains at least one entry for the key.
    ///
    /// # Complexity
    ///
    /// O(log n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "a");
    /// assert!(map.contains_key(&1));
    /// assert!(!map.contains_key(&2));
    /// ```
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.contains_key(key)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already has entries for this key, the new entry is added
    /// *after* them; nothing is replaced and no error is raised. Use
    /// [`remove`] first for replace semantics.
    ///
    /// [`remove`]: BPTreeMap::remove
    ///
    /// # Complexity
    ///
    /// O(log n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(37, "a");
    /// map.insert(37, "b");
    ///
    /// // both entries are present
    /// assert_eq!(map.len(), 2);
    /// assert_eq!(map.get(&37), Some(&"a"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) {
        self.raw.insert(key, value);
    }

    /// Removes one entry matching the key, returning its value. An absent
    /// key is a no-op returning `None`.
    ///
    /// Under duplicates, entries are removed one per call; repeated calls
    /// drain every copy.
    ///
    /// # Complexity
    ///
    /// O(log n)
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.remove(key)
    }

    /// Removes one entry matching the key, returning the stored key-value
    /// pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let mut map = BPTreeMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove_entry(&1), Some((1, "a")));
    /// assert_eq!(map.remove_entry(&1), None);
    /// ```
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.remove_entry(key)
    }
}

impl<K: Hash, V: Hash> Hash for BPTreeMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for (k, v) in self {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for BPTreeMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<K: Eq, V: Eq> Eq for BPTreeMap<K, V> {}

impl<K: PartialOrd, V: PartialOrd> PartialOrd for BPTreeMap<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<K: Ord, V: Ord> Ord for BPTreeMap<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for BPTreeMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> Default for BPTreeMap<K, V> {
    fn default() -> Self {
        BPTreeMap::new()
    }
}

impl<K: Ord + Clone, V> FromIterator<(K, V)> for BPTreeMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = BPTreeMap::new();
        map.extend(iter);
        map
    }
}

impl<K: Ord + Clone, V> Extend<(K, V)> for BPTreeMap<K, V> {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a, K: Ord + Copy, V: Copy> Extend<(&'a K, &'a V)> for BPTreeMap<K, V> {
    fn extend<T: IntoIterator<Item = (&'a K, &'a V)>>(&mut self, iter: T) {
        for (&k, &v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a, K, V> IntoIterator for &'a BPTreeMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<K, V> IntoIterator for BPTreeMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    /// Gets an owning iterator over the entries of the map, sorted by key.
    ///
    /// # Examples
    ///
    /// ```
    /// use bptree::BPTreeMap;
    ///
    /// let map = BPTreeMap::from([(2, "b"), (1, "a")]);
    /// let mut iter = map.into_iter();
    /// assert_eq!(iter.next(), Some((1, "a")));
    /// assert_eq!(iter.next_back(), Some((2, "b")));
    /// ```
    fn into_iter(mut self) -> IntoIter<K, V> {
        IntoIter {
            inner: self.raw.drain_to_vec().into_iter(),
        }
    }
}

impl<K, Q, V> Index<&Q> for BPTreeMap<K, V>
where
    K: Borrow<Q> + Ord + Clone,
    Q: ?Sized + Ord,
{
    type Output = V;

    /// Returns a reference to the value of an entry matching the supplied
    /// key.
    ///
    /// # Panics
    ///
    /// Panics if the key is not present in the `BPTreeMap`.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K: Ord + Clone, V, const N: usize> From<[(K, V); N]> for BPTreeMap<K, V> {
    fn from(arr: [(K, V); N]) -> Self {
        arr.into_iter().collect()
    }
}

impl<'a, K: 'a, V: 'a> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let leaf_handle = self.front_leaf?;
        let leaf = self.tree.node(leaf_handle).as_leaf();

        let key = leaf.key(self.front_index);
        let value = self.tree.value(leaf.value(self.front_index));

        self.remaining -= 1;
        self.front_index += 1;

        // Step to the next leaf when this one is exhausted.
        if self.front_index >= leaf.key_count() {
            self.front_leaf = leaf.next();
            self.front_index = 0;
        }

        Some((key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K: 'a, V: 'a> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let leaf_handle = self.back_leaf?;
        let leaf = self.tree.node(leaf_handle).as_leaf();

        let key = leaf.key(self.back_index);
        let value = self.tree.value(leaf.value(self.back_index));

        self.remaining -= 1;

        if self.back_index == 0 {
            self.back_leaf = leaf.prev();
            if let Some(prev_handle) = self.back_leaf {
                let prev_leaf = self.tree.node(prev_handle).as_leaf();
                self.back_index = prev_leaf.key_count().saturating_sub(1);
            }
        } else {
            self.back_index -= 1;
        }

        Some((key, value))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Iter<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").field("remaining", &self.remaining).finish()
    }
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            tree: self.tree,
            front_leaf: self.front_leaf,
            front_index: self.front_index,
            back_leaf: self.back_leaf,
            back_index: self.back_index,
            remaining: self.remaining,
        }
    }
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IntoIter<K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<K, V> FusedIterator for IntoIter<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for IntoIter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.as_slice()).finish()
    }
}

impl<'a, K: 'a, V: 'a> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K: 'a, V: 'a> DoubleEndedIterator for Keys<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, _)| k)
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<K, V> FusedIterator for Keys<'_, K, V> {}

impl<K, V> Clone for Keys<'_, K, V> {
    fn clone(&self) -> Self {
        Keys {
            inner: self.inner.clone(),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Keys<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

impl<'a, K: 'a, V: 'a> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K: 'a, V: 'a> DoubleEndedIterator for Values<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<K, V> FusedIterator for Values<'_, K, V> {}

impl<K, V> Clone for Values<'_, K, V> {
    fn clone(&self) -> Self {
        Values {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V: fmt::Debug> fmt::Debug for Values<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

impl<K: fmt::Debug, V> fmt::Display for Structure<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(root) = self.raw.root() else {
            return writeln!(f, "(empty)");
        };

        // Breadth-first: one line per level, nodes in left-to-right order.
        let mut level: Vec<Handle> = vec![root];
        while !level.is_empty() {
            let mut next_level: Vec<Handle> = Vec::new();
            for (i, &handle) in level.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                match self.raw.node(handle) {
                    Node::Inner(inner) => {
                        write!(f, "{:?}", inner.keys())?;
                        next_level.extend_from_slice(inner.children());
                    }
                    Node::Leaf(leaf) => write!(f, "{:?}", leaf.keys())?,
                }
            }
            writeln!(f)?;
            level = next_level;
        }
        Ok(())
    }
}
