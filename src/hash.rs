//! Hashing for the runtime's internal collections.
//!
//! Arena ids and list keys never come from untrusted input in a way that
//! matters for HashDoS, so every internal map uses foldhash with a fixed seed.
//! The builder is zero-sized, which keeps per-node subscriber sets small.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::IndexSet;

/// Zero-sized, deterministic `BuildHasher` backed by foldhash.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x517cc1b727220a95).build_hasher()
    }
}

pub(crate) type FastHashMap<K, V> = HashMap<K, V, FastHashBuilder>;
pub(crate) type FastHashSet<K> = HashSet<K, FastHashBuilder>;

/// Insertion-ordered set. Subscriber and source lists use it so that
/// notification order follows subscription order.
pub(crate) type OrderedSet<K> = IndexSet<K, FastHashBuilder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_is_zero_sized() {
        assert_eq!(std::mem::size_of::<FastHashBuilder>(), 0);
    }

    #[test]
    fn hashes_agree_across_builders() {
        assert_eq!(
            FastHashBuilder.hash_one("todo-1"),
            FastHashBuilder.hash_one("todo-1")
        );
    }

    #[test]
    fn ordered_set_keeps_insertion_order() {
        let mut set = OrderedSet::default();
        set.insert(3u32);
        set.insert(1);
        set.insert(3);
        set.insert(2);
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
    }
}
