//! Property-based tests for the Merkle trie.
//!
//! These verify the properties reconciliation depends on:
//!  - Order independence: the same set of timestamps gives the same root hash
//!  - Prune and compact never change the root hash
//!  - `diff` is symmetric and never points past the earliest missing message
//!  - Serialization preserves every retained hash

use proptest::prelude::*;
use std::collections::BTreeSet;
use tally_hlc::{NodeId, Timestamp};
use tally_merkle::{BucketKey, MerkleTrie, BUCKET_MILLIS};

const BASE: u64 = 1_700_000_000_000;

fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (
        0u64..5_000,
        0u64..BUCKET_MILLIS,
        0u16..4,
        prop::sample::select(vec!["A", "B", "C"]),
    )
        .prop_map(|(minute, offset, counter, node)| {
            Timestamp::new(
                BASE + minute * BUCKET_MILLIS + offset,
                counter,
                NodeId::new(node).unwrap(),
            )
        })
}

fn timestamp_set() -> impl Strategy<Value = BTreeSet<Timestamp>> {
    prop::collection::btree_set(timestamp_strategy(), 0..40)
}

fn build<'a>(stamps: impl IntoIterator<Item = &'a Timestamp>) -> MerkleTrie {
    stamps
        .into_iter()
        .fold(MerkleTrie::new(), |trie, ts| trie.insert(ts))
}

proptest! {
    #[test]
    fn root_hash_is_order_independent(stamps in timestamp_set(), seed in any::<u64>()) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let ordered: Vec<_> = stamps.iter().cloned().collect();
        let mut shuffled = ordered.clone();
        shuffled.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));

        let a = build(&ordered);
        let b = build(&shuffled);
        prop_assert_eq!(a.hash(), b.hash());
        prop_assert_eq!(a.diff(&b), None);
    }

    #[test]
    fn prune_and_compact_preserve_root(stamps in timestamp_set(), keep in 1usize..4) {
        let trie = build(&stamps);
        let hash = trie.hash();
        prop_assert_eq!(trie.clone().prune(keep).hash(), hash);
        prop_assert_eq!(trie.clone().compact().hash(), hash);
        prop_assert_eq!(MerkleTrie::rebuild(&stamps).hash(), hash);
    }

    #[test]
    fn diff_is_symmetric(shared in timestamp_set(), left in timestamp_set(), right in timestamp_set()) {
        let a = build(shared.union(&left));
        let b = build(shared.union(&right));
        prop_assert_eq!(a.diff(&b), b.diff(&a));
        prop_assert_eq!(a.diff(&b).is_none(), a.hash() == b.hash());
    }

    #[test]
    fn diff_never_skips_missing_messages(shared in timestamp_set(), extra in timestamp_set()) {
        let local: BTreeSet<_> = shared.union(&extra).cloned().collect();
        let a = build(&local);
        let b = build(&shared);

        let missing: Vec<_> = local.difference(&shared).collect();
        match a.diff(&b) {
            None => prop_assert!(missing.is_empty()),
            Some(key) => {
                let earliest = missing.iter().map(|ts| ts.millis()).min();
                prop_assert!(earliest.is_some());
                prop_assert!(key.to_millis() <= earliest.unwrap_or(0));
            }
        }
    }

    #[test]
    fn pruned_diff_never_skips_missing_messages(
        shared in timestamp_set(),
        extra in timestamp_set(),
        keep in 1usize..3
    ) {
        let local: BTreeSet<_> = shared.union(&extra).cloned().collect();
        let a = build(&local).prune(keep);
        let b = build(&shared).prune(keep);

        if let Some(earliest) = local.difference(&shared).map(|ts| ts.millis()).min() {
            let key = a.diff(&b);
            prop_assert!(key.is_some());
            prop_assert!(key.unwrap_or_else(BucketKey::root).to_millis() <= earliest);
        }
    }

    #[test]
    fn incrementally_pruned_diff_never_skips_missing_messages(
        shared in timestamp_set(),
        extra in timestamp_set(),
        keep in 1usize..3
    ) {
        let grow = |stamps: Vec<&Timestamp>| {
            stamps
                .into_iter()
                .fold(MerkleTrie::new(), |trie, ts| trie.insert(ts).prune(keep))
        };
        let local: BTreeSet<_> = shared.union(&extra).cloned().collect();
        // arrivals out of time order land in already-pruned branches
        let a = grow(local.iter().rev().collect());
        let b = grow(shared.iter().collect());
        prop_assert_eq!(a.hash(), build(&local).hash());

        match local.difference(&shared).map(|ts| ts.millis()).min() {
            None => prop_assert_eq!(a.diff(&b), None),
            Some(earliest) => {
                let key = a.diff(&b);
                prop_assert!(key.is_some());
                prop_assert!(key.unwrap_or_else(BucketKey::root).to_millis() <= earliest);
            }
        }
    }

    #[test]
    fn serde_preserves_hashes(stamps in timestamp_set()) {
        let trie = build(&stamps).prune(2);
        let json = serde_json::to_string(&trie).unwrap();
        let back: MerkleTrie = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.hash(), trie.hash());
        for key in trie.bucket_keys() {
            prop_assert_eq!(back.hash_at(&key), trie.hash_at(&key));
        }
    }
}
