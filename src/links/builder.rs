//! Link construction: thread reads through a built graph and record the
//! junction choices they make.
//!
//! Walking is read-only on the graph, so workers thread read batches in
//! parallel and collect [`LinkObservation`]s; the shared store is
//! updated under a mutex once per batch. Each read is threaded in both
//! its own orientation and its reverse complement, so traversal in
//! either direction can use the evidence.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use smallvec::SmallVec;

use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::kmer::{complement_code, encode_base, BinaryKmer, Orientation};
use crate::graph::node_store::ColorMask;
use crate::links::store::{LinkDir, LinkStore};

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// One origin's junction choices, ready to merge into a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkObservation {
    pub handle: u64,
    pub dir: LinkDir,
    pub juncs: SmallVec<[u8; 16]>,
}

/// Thread-safe link-building statistics.
#[derive(Debug, Default)]
pub struct ThreadStats {
    pub reads_threaded: AtomicU64,
    pub kmers_missing: AtomicU64,
    pub graph_disagreements: AtomicU64,
    pub links_emitted: AtomicU64,
}

/// A point-in-time copy of [`ThreadStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThreadStatsSnapshot {
    pub reads_threaded: u64,
    pub kmers_missing: u64,
    pub graph_disagreements: u64,
    pub links_emitted: u64,
}

impl ThreadStats {
    pub fn snapshot(&self) -> ThreadStatsSnapshot {
        ThreadStatsSnapshot {
            reads_threaded: self.reads_threaded.load(Ordering::Relaxed),
            kmers_missing: self.kmers_missing.load(Ordering::Relaxed),
            graph_disagreements: self.graph_disagreements.load(Ordering::Relaxed),
            links_emitted: self.links_emitted.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Read threading
// ---------------------------------------------------------------------------

/// An origin still expecting junctions: the branching node the link is
/// anchored at, and the choices recorded so far.
struct Origin {
    node: OrientedNode,
    juncs: SmallVec<[u8; 16]>,
}

/// Thread one read (both strands) through the graph, appending the
/// resulting link observations to `out`.
pub fn observe_read<const W: usize>(
    graph: &Graph<W>,
    seq: &[u8],
    mask: ColorMask,
    stats: &ThreadStats,
    out: &mut Vec<LinkObservation>,
) {
    stats.reads_threaded.fetch_add(1, Ordering::Relaxed);
    observe_one_strand(graph, seq.iter().copied(), mask, stats, out);
    let rc = seq
        .iter()
        .rev()
        .map(|&b| match encode_base(b) {
            Some(code) => crate::graph::kmer::decode_base(complement_code(code)),
            None => b'N',
        })
        .collect::<Vec<u8>>();
    observe_one_strand(graph, rc.iter().copied(), mask, stats, out);
}

fn observe_one_strand<const W: usize>(
    graph: &Graph<W>,
    seq: impl Iterator<Item = u8>,
    mask: ColorMask,
    stats: &ThreadStats,
    out: &mut Vec<LinkObservation>,
) {
    let k = graph.k();
    let mut fwd = BinaryKmer::<W>::zero();
    let mut rev = BinaryKmer::<W>::zero();
    let mut filled = 0usize;
    let mut cur: Option<OrientedNode> = None;
    let mut origins: Vec<Origin> = Vec::new();

    for b in seq {
        let code = match encode_base(b) {
            Some(code) => code,
            None => {
                retire_origins(&mut origins, stats, out);
                cur = None;
                filled = 0;
                continue;
            }
        };
        fwd = fwd.shift_left_append(code, k);
        rev = rev.shift_right_prepend(complement_code(code), k);
        filled += 1;
        if filled < k {
            continue;
        }

        let (key, orient) = if fwd.words() <= rev.words() {
            (fwd, Orientation::Forward)
        } else {
            (rev, Orientation::Reverse)
        };
        let Some(handle) = graph.table().find(&key) else {
            // The read left the graph; everything active retires.
            stats.kmers_missing.fetch_add(1, Ordering::Relaxed);
            retire_origins(&mut origins, stats, out);
            cur = None;
            continue;
        };
        let node = OrientedNode::new(handle, orient);

        if let Some(prev) = cur {
            let succ_bits = graph.successor_bits(prev, mask);
            if succ_bits & (1 << code) == 0 {
                // The read disagrees with the graph's edges.
                stats.graph_disagreements.fetch_add(1, Ordering::Relaxed);
                retire_origins(&mut origins, stats, out);
            } else if succ_bits.count_ones() > 1 {
                // A branch: the node taking the choice becomes an
                // origin, then every active origin (itself included)
                // records the base taken.
                origins.push(Origin {
                    node: prev,
                    juncs: SmallVec::new(),
                });
                for origin in origins.iter_mut() {
                    origin.juncs.push(code);
                }
            }
        }
        cur = Some(node);
    }

    retire_origins(&mut origins, stats, out);
}

fn retire_origins(
    origins: &mut Vec<Origin>,
    stats: &ThreadStats,
    out: &mut Vec<LinkObservation>,
) {
    for origin in origins.drain(..) {
        if origin.juncs.is_empty() {
            continue;
        }
        stats.links_emitted.fetch_add(1, Ordering::Relaxed);
        out.push(LinkObservation {
            handle: origin.node.handle,
            dir: LinkDir::from_orientation(origin.node.orient),
            juncs: origin.juncs,
        });
    }
}

/// Merge a batch of observations into the store, one read per
/// observation along each recorded path.
pub fn apply_observations(store: &mut LinkStore, color: usize, obs: &[LinkObservation]) {
    for o in obs {
        store.add_read_path(o.handle, o.dir, &o.juncs, color);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};

    const K: usize = 5;

    fn graph_from(seqs: &[&[u8]]) -> Graph<1> {
        let graph = Graph::new(K, 1, 1024).unwrap();
        let stats = LoadStats::default();
        for seq in seqs {
            load_read(&graph, seq, 0, false, &stats).unwrap();
        }
        graph
    }

    fn thread_one(graph: &Graph<1>, seq: &[u8]) -> Vec<LinkObservation> {
        let stats = ThreadStats::default();
        let mut out = Vec::new();
        observe_read(graph, seq, ColorMask::ALL, &stats, &mut out);
        out
    }

    #[test]
    fn test_linear_read_emits_no_links() {
        let graph = graph_from(&[b"ACGTAGCCATT"]);
        let obs = thread_one(&graph, b"ACGTAGCCATT");
        assert!(obs.is_empty());
    }

    #[test]
    fn test_y_junction_emits_one_link() {
        // Fork after ACGTAG: one arm to CCA, one to TTA.
        let graph = graph_from(&[b"ACGTAGCCA", b"ACGTAGTTA"]);
        let obs = thread_one(&graph, b"ACGTAGCCA");
        // Forward strand: one choice at the fork. Reverse strand of this
        // read meets a join, not a fork, so it emits nothing.
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].juncs.len(), 1);
        assert_eq!(obs[0].juncs[0], 1); // chose C
        // Anchored at the branching kmer CGTAG.
        let branch = graph
            .resolve(&BinaryKmer::from_seq(b"CGTAG", K).unwrap())
            .unwrap();
        assert_eq!(obs[0].handle, branch.handle);
    }

    #[test]
    fn test_join_emits_reverse_link() {
        // Two arms joining into a shared suffix: the reverse strand of a
        // read sees the join as a fork.
        let graph = graph_from(&[b"CCATAGCGT", b"TTATAGCGT"]);
        let obs = thread_one(&graph, b"CCATAGCGT");
        assert_eq!(obs.len(), 1);
    }

    #[test]
    fn test_read_leaving_graph_retires_origins() {
        let graph = graph_from(&[b"ACGTAGCCA", b"ACGTAGTTA"]);
        // Diverges from the graph after the fork choice: the origin has
        // already recorded its junction, so the link still comes out.
        let obs = thread_one(&graph, b"ACGTAGCCGGGGG");
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].juncs.as_slice(), &[1]);
    }

    #[test]
    fn test_apply_observations_builds_trie() {
        let graph = graph_from(&[b"ACGTAGCCA", b"ACGTAGTTA"]);
        let obs = thread_one(&graph, b"ACGTAGCCA");
        let mut store = LinkStore::new(1);
        apply_observations(&mut store, 0, &obs);
        assert_eq!(store.num_kmers_with_links(), 1);
        let paths = store.paths_for(obs[0].handle);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].counts, vec![1]);
    }
}
