//! An in-memory B+ tree multimap for Rust.
//!
//! This crate provides [`BPTreeMap`], an ordered map keyed by any totally
//! ordered key type. Unlike `std::collections::BTreeMap` it is a *multimap*:
//! inserting an already-present key adds a second entry instead of replacing
//! the first, and every entry survives until individually removed.
//!
//! All data lives in the leaves, which form a sorted doubly linked chain (the
//! sequence set). Ordered full scans walk the chain directly and never
//! re-traverse the upper tree.
//!
//! # Example
//!
//! ```
//! use bptree::BPTreeMap;
//!
//! let mut index = BPTreeMap::new();
//! index.insert(10, "ten");
//! index.insert(5, "five");
//! index.insert(10, "ten again"); // duplicate keys are kept
//!
//! assert_eq!(index.get(&5), Some(&"five"));
//! assert_eq!(index.get(&10), Some(&"ten"));
//! assert_eq!(index.len(), 3);
//!
//! // values in ascending key order
//! assert_eq!(index.values_vec(), ["five", "ten", "ten again"]);
//! ```
//!
//! # Implementation
//!
//! The tree is an arena of tagged nodes addressed by compact handles; parent
//! and sibling relationships are index lookups, never owning references, so
//! ownership runs strictly root to children. Each node holds up to `m - 1`
//! keys for a per-tree order `m` chosen at construction; inserts split
//! overflowing nodes bottom-up and deletes redistribute or merge underflowing
//! ones, keeping every leaf at the same depth.

#![no_std]
#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]

extern crate alloc;

mod raw;

pub mod bptree_map;

pub use bptree_map::BPTreeMap;
