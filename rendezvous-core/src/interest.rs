//! Interest-set arithmetic.
//!
//! An interest set is the set of keys a peer currently holds. Sets are
//! ordered so intersections come out in a stable order, which keeps
//! Connect messages deterministic.

use std::collections::BTreeSet;
use rendezvous_types::Key;

/// The keys one peer is interested in.
pub type InterestSet = BTreeSet<Key>;

/// Combine an existing interest set with joined and left keys.
///
/// Keys in `leave` are removed even when they also appear in `join`:
/// within a single update, leave wins.
pub fn merge_keys(existing: &InterestSet, join: &[Key], leave: &[Key]) -> InterestSet {
    let mut merged = existing.clone();
    merged.extend(join.iter().cloned());
    for key in leave {
        merged.remove(key);
    }
    merged
}

/// Keys held by both peers, in key order.
pub fn intersection(a: &InterestSet, b: &InterestSet) -> Vec<Key> {
    a.intersection(b).cloned().collect()
}
