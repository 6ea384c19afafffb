//! The colored de Bruijn graph: hash table + node store + header info.

use smallvec::SmallVec;

use crate::error::CtxError;
use crate::graph::hash_table::KmerHashTable;
use crate::graph::kmer::{validate_kmer_size, BinaryKmer, Orientation, BASES};
use crate::graph::node_store::{
    edges_in_orientation, in_edge_mask, out_edge_mask, ColorMask, NodeStore,
};

// ---------------------------------------------------------------------------
// Header bookkeeping
// ---------------------------------------------------------------------------

/// Per-color sample metadata carried in the graph header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorInfo {
    pub sample_name: String,
    /// Sequencing error rate scaled by 1e16.
    pub error_rate: u32,
    pub cleaned_tips: bool,
    pub cleaned_unitigs: bool,
    /// Mean-coverage cutoff applied by unitig pruning (0 if none).
    pub unitig_cutoff: u32,
    /// Tip length threshold in kmers applied by tip clipping (0 if none).
    pub unitig_kmer_cutoff: u32,
}

/// Graph-wide header metadata.
#[derive(Debug, Clone, Default)]
pub struct GraphInfo {
    pub colors: Vec<ColorInfo>,
    pub mean_read_length: u32,
    pub total_sequence: u64,
}

impl GraphInfo {
    /// Fold another graph's totals into this one. Read lengths are
    /// weighted by the amount of sequence behind them.
    pub fn merge_totals(&mut self, mean_read_length: u32, total_sequence: u64) {
        let total = self.total_sequence + total_sequence;
        if total > 0 {
            let weighted = self.mean_read_length as u64 * self.total_sequence
                + mean_read_length as u64 * total_sequence;
            self.mean_read_length = (weighted / total) as u32;
        }
        self.total_sequence = total;
    }
}

// ---------------------------------------------------------------------------
// OrientedNode
// ---------------------------------------------------------------------------

/// A graph node read in a particular orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrientedNode {
    pub handle: u64,
    pub orient: Orientation,
}

impl OrientedNode {
    #[inline]
    pub fn new(handle: u64, orient: Orientation) -> Self {
        Self { handle, orient }
    }

    #[inline]
    pub fn flipped(self) -> Self {
        Self {
            handle: self.handle,
            orient: self.orient.opposite(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A colored de Bruijn graph over canonical kmers of `W` words.
///
/// Allocated once from a bucket capacity; populated by build/load
/// passes; optionally transformed by cleaning; then read-only for
/// queries. Handles are bucket indices and never move.
pub struct Graph<const W: usize> {
    k: usize,
    table: KmerHashTable<W>,
    store: NodeStore,
    pub info: GraphInfo,
}

impl<const W: usize> Graph<W> {
    /// Allocate a graph for `capacity` buckets and `num_colors` colors.
    pub fn new(k: usize, num_colors: usize, capacity: u64) -> Result<Self, CtxError> {
        validate_kmer_size(k)?;
        if crate::graph::kmer::words_for_k(k) != W {
            return Err(CtxError::InvalidInput(format!(
                "kmer size {} needs {} words, graph compiled for {}",
                k,
                crate::graph::kmer::words_for_k(k),
                W
            )));
        }
        Ok(Self {
            k,
            table: KmerHashTable::new(capacity)?,
            store: NodeStore::new(capacity, num_colors)?,
            info: GraphInfo {
                colors: vec![ColorInfo::default(); num_colors],
                ..GraphInfo::default()
            },
        })
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn num_colors(&self) -> usize {
        self.store.num_colors()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.table.capacity()
    }

    #[inline]
    pub fn num_kmers(&self) -> u64 {
        self.table.num_kmers()
    }

    /// Every color of this graph as a mask.
    #[inline]
    pub fn all_colors(&self) -> ColorMask {
        ColorMask::first_n(self.num_colors())
    }

    #[inline]
    pub fn table(&self) -> &KmerHashTable<W> {
        &self.table
    }

    #[inline]
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Look up a kmer in any orientation; canonicalizes internally.
    #[inline]
    pub fn find(&self, kmer: &BinaryKmer<W>) -> Option<u64> {
        self.table.find(&kmer.canonical(self.k))
    }

    /// Look up or insert a kmer; canonicalizes internally.
    #[inline]
    pub fn find_or_insert(&self, kmer: &BinaryKmer<W>) -> Result<(u64, bool), CtxError> {
        self.table.find_or_insert(&kmer.canonical(self.k))
    }

    /// Resolve a raw (not necessarily canonical) kmer to an oriented node.
    #[inline]
    pub fn resolve(&self, kmer: &BinaryKmer<W>) -> Option<OrientedNode> {
        let (canon, orient) = kmer.canonical_with_orientation(self.k);
        self.table
            .find(&canon)
            .map(|handle| OrientedNode::new(handle, orient))
    }

    /// The stored (canonical) kmer of a node.
    #[inline]
    pub fn node_kmer(&self, handle: u64) -> BinaryKmer<W> {
        self.table.kmer_at(handle)
    }

    /// The kmer of a node as read in the node's orientation.
    #[inline]
    pub fn oriented_kmer(&self, node: OrientedNode) -> BinaryKmer<W> {
        let kmer = self.node_kmer(node.handle);
        match node.orient {
            Orientation::Forward => kmer,
            Orientation::Reverse => kmer.reverse_complement(self.k),
        }
    }

    /// Edge bits readable as successors of `node`, restricted to `mask`.
    #[inline]
    pub fn successor_bits(&self, node: OrientedNode, mask: ColorMask) -> u8 {
        edges_in_orientation(self.store.union_edges(node.handle, mask), node.orient)
    }

    /// Out-degree of `node` under `mask`.
    #[inline]
    pub fn out_degree(&self, node: OrientedNode, mask: ColorMask) -> u32 {
        self.successor_bits(node, mask).count_ones()
    }

    /// In-degree of `node` under `mask` (out-degree of the flipped node).
    #[inline]
    pub fn in_degree(&self, node: OrientedNode, mask: ColorMask) -> u32 {
        self.out_degree(node.flipped(), mask)
    }

    /// Follow the successor edge labeled `base` from `node`.
    ///
    /// Returns `None` when the shifted kmer is not in the table — with
    /// edge/hash consistency intact that only happens for unset edges.
    #[inline]
    pub fn step(&self, node: OrientedNode, base: u8) -> Option<OrientedNode> {
        let next = self.oriented_kmer(node).shift_left_append(base, self.k);
        self.resolve(&next)
    }

    /// Enumerate `(base, node)` successors of `node` under `mask`.
    pub fn successors(
        &self,
        node: OrientedNode,
        mask: ColorMask,
    ) -> SmallVec<[(u8, OrientedNode); 4]> {
        let bits = self.successor_bits(node, mask);
        let mut out = SmallVec::new();
        for base in BASES {
            if bits & (1 << base) != 0 {
                if let Some(next) = self.step(node, base) {
                    out.push((base, next));
                }
            }
        }
        out
    }

    /// Record the edge pair for the step `from --base--> to` in `color`.
    ///
    /// `base` is the appended base in `from`'s orientation. Sets the
    /// successor bit on `from` and the matching predecessor bit on `to`.
    pub fn set_step_edges(&self, from: OrientedNode, to: OrientedNode, base: u8, color: usize) {
        let dropped = self.oriented_kmer(from).first_base(self.k);
        self.store
            .edges_or(from.handle, color, out_edge_mask(from.orient, base));
        self.store
            .edges_or(to.handle, color, in_edge_mask(to.orient, dropped));
    }

    /// Tombstone a node and zero its colored state. Cleaning-phase only.
    pub fn remove_node(&self, handle: u64) {
        self.store.clear_node(handle);
        self.table.remove(handle);
    }

    /// Reconstruct the sequence spelled by an oriented node path.
    pub fn path_sequence(&self, path: &[OrientedNode]) -> Vec<u8> {
        let mut seq = Vec::new();
        if let Some(first) = path.first() {
            self.oriented_kmer(*first).append_dna(self.k, &mut seq);
            for node in &path[1..] {
                let kmer = self.oriented_kmer(*node);
                seq.push(crate::graph::kmer::decode_base(kmer.last_base()));
            }
        }
        seq
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};

    fn graph_from(seqs: &[&[u8]], k: usize, colors: usize) -> Graph<1> {
        let graph = Graph::new(k, colors, 1024).unwrap();
        let stats = LoadStats::default();
        for seq in seqs {
            load_read(&graph, seq, 0, false, &stats).unwrap();
        }
        graph
    }

    #[test]
    fn test_step_follows_edges() {
        let k = 5;
        let graph = graph_from(&[b"ACGTAGCCA"], k, 1);
        let start = graph
            .resolve(&BinaryKmer::from_seq(b"ACGTA", k).unwrap())
            .unwrap();
        let succs = graph.successors(start, ColorMask::ALL);
        assert_eq!(succs.len(), 1);
        let (base, next) = succs[0];
        assert_eq!(base, 2); // G
        assert_eq!(graph.oriented_kmer(next).to_dna_string(k), "CGTAG");
    }

    #[test]
    fn test_edge_closure_both_directions() {
        let k = 5;
        let graph = graph_from(&[b"ACGTAGCCA"], k, 1);
        let node = graph
            .resolve(&BinaryKmer::from_seq(b"CGTAG", k).unwrap())
            .unwrap();
        // One predecessor (ACGTA) and one successor (GTAGC).
        assert_eq!(graph.in_degree(node, ColorMask::ALL), 1);
        assert_eq!(graph.out_degree(node, ColorMask::ALL), 1);
    }

    #[test]
    fn test_path_sequence_roundtrip() {
        let k = 5;
        let seq = b"ACGTAGCCATT";
        let graph = graph_from(&[seq], k, 1);
        let mut node = graph
            .resolve(&BinaryKmer::from_seq(&seq[..k], k).unwrap())
            .unwrap();
        let mut path = vec![node];
        while let Some((_, next)) = graph.successors(node, ColorMask::ALL).first().copied() {
            path.push(next);
            node = next;
            if path.len() > seq.len() {
                break;
            }
        }
        assert_eq!(graph.path_sequence(&path), seq.to_vec());
    }
}
