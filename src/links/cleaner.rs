//! Link cleaning: prune low-coverage link subtrees.
//!
//! Every trie subtree whose root coverage falls strictly below the
//! threshold is dropped. The surviving nodes keep their cumulative
//! counts (reads that went on through pruned deeper junctions still
//! passed the kept prefix), so pruning is expressed as a rebuild: copy
//! each kept subtree into a fresh store.

use serde::Serialize;
use tracing::info;

use crate::links::store::{LinkDir, LinkStore};

/// Counters reported by a link cleaning pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct LinkCleanStats {
    pub threshold: u32,
    pub subtrees_pruned: u64,
    pub kmers_before: u64,
    pub kmers_after: u64,
}

/// Prune every subtree with coverage below `threshold`; returns the
/// cleaned store and counters.
pub fn clean_links(store: &LinkStore, threshold: u32) -> (LinkStore, LinkCleanStats) {
    let mut stats = LinkCleanStats {
        threshold,
        kmers_before: store.num_kmers_with_links(),
        ..LinkCleanStats::default()
    };
    let mut cleaned = LinkStore::new(store.num_colors());
    for handle in store.handles() {
        for dir in [LinkDir::Fwd, LinkDir::Rev] {
            let Some(root) = store.root(handle, dir) else {
                continue;
            };
            let new_root = cleaned.ensure_root(handle, dir);
            copy_kept(store, root, &mut cleaned, new_root, threshold, &mut stats);
        }
    }
    stats.kmers_after = cleaned.num_kmers_with_links();
    info!(
        threshold,
        before = stats.kmers_before,
        after = stats.kmers_after,
        pruned = stats.subtrees_pruned,
        "link cleaning done"
    );
    (cleaned, stats)
}

fn copy_kept(
    store: &LinkStore,
    node: u32,
    cleaned: &mut LinkStore,
    new_node: u32,
    threshold: u32,
    stats: &mut LinkCleanStats,
) {
    for base in store.child_bases(node).collect::<Vec<_>>() {
        let child = store.child(node, base).unwrap();
        if store.count_total(child) < threshold {
            stats.subtrees_pruned += 1;
            continue;
        }
        let new_child = cleaned.extend(new_node, base);
        for (color, &n) in store.counts_of(child).iter().enumerate() {
            if n > 0 {
                cleaned.add_count(new_child, color, n);
            }
        }
        copy_kept(store, child, cleaned, new_child, threshold, stats);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prunes_below_threshold() {
        let mut store = LinkStore::new(1);
        for _ in 0..5 {
            store.add_read_path(1, LinkDir::Fwd, &[0, 1], 0);
        }
        store.add_read_path(1, LinkDir::Fwd, &[0, 2], 0);
        let (cleaned, stats) = clean_links(&store, 3);
        assert_eq!(stats.subtrees_pruned, 1);
        let root = cleaned.root(1, LinkDir::Fwd).unwrap();
        let a = cleaned.child(root, 0).unwrap();
        // The popular branch survives with its counts.
        assert_eq!(cleaned.count_total(a), 6);
        assert!(cleaned.child(a, 1).is_some());
        assert!(cleaned.child(a, 2).is_none());
    }

    #[test]
    fn test_whole_trie_can_vanish() {
        let mut store = LinkStore::new(1);
        store.add_read_path(4, LinkDir::Rev, &[3], 0);
        let (cleaned, stats) = clean_links(&store, 2);
        assert_eq!(stats.kmers_before, 1);
        assert_eq!(stats.kmers_after, 0);
        assert!(cleaned.root(4, LinkDir::Rev).is_none());
    }

    #[test]
    fn test_threshold_one_keeps_everything() {
        let mut store = LinkStore::new(2);
        store.add_read_path(9, LinkDir::Fwd, &[0], 0);
        store.add_read_path(9, LinkDir::Fwd, &[0, 3], 1);
        let (cleaned, stats) = clean_links(&store, 1);
        assert_eq!(stats.subtrees_pruned, 0);
        let mut before = store.paths_for(9);
        let mut after = cleaned.paths_for(9);
        let key = |p: &crate::links::store::LinkPath| (p.dir.index(), p.juncs.clone());
        before.sort_by_key(key);
        after.sort_by_key(key);
        assert_eq!(before, after);
    }
}
