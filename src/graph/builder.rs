//! Graph construction from sequence reads.
//!
//! Splits each read into maximal runs of in-alphabet bases, rolls a
//! forward/reverse kmer pair across each run, and wires consecutive
//! windows together: insert, bump coverage, set the edge pair. All
//! updates are atomic, so any number of workers can load into the same
//! graph concurrently.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::CtxError;
use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::kmer::{complement_code, encode_base, BinaryKmer, Orientation};

// ---------------------------------------------------------------------------
// LoadStats
// ---------------------------------------------------------------------------

/// Thread-safe loading statistics, merged across workers.
#[derive(Debug, Default)]
pub struct LoadStats {
    pub reads_loaded: AtomicU64,
    pub bases_read: AtomicU64,
    pub bases_loaded: AtomicU64,
    pub contigs_loaded: AtomicU64,
    pub kmers_loaded: AtomicU64,
    pub kmers_novel: AtomicU64,
}

/// A point-in-time copy of [`LoadStats`], for summaries and log files.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LoadStatsSnapshot {
    pub reads_loaded: u64,
    pub bases_read: u64,
    pub bases_loaded: u64,
    pub contigs_loaded: u64,
    pub kmers_loaded: u64,
    pub kmers_novel: u64,
}

impl LoadStats {
    pub fn snapshot(&self) -> LoadStatsSnapshot {
        LoadStatsSnapshot {
            reads_loaded: self.reads_loaded.load(Ordering::Relaxed),
            bases_read: self.bases_read.load(Ordering::Relaxed),
            bases_loaded: self.bases_loaded.load(Ordering::Relaxed),
            contigs_loaded: self.contigs_loaded.load(Ordering::Relaxed),
            kmers_loaded: self.kmers_loaded.load(Ordering::Relaxed),
            kmers_novel: self.kmers_novel.load(Ordering::Relaxed),
        }
    }

    /// Mean read length implied by the counters (0 if no reads).
    pub fn mean_read_length(&self) -> u32 {
        let reads = self.reads_loaded.load(Ordering::Relaxed);
        if reads == 0 {
            0
        } else {
            (self.bases_read.load(Ordering::Relaxed) / reads) as u32
        }
    }
}

// ---------------------------------------------------------------------------
// load_read
// ---------------------------------------------------------------------------

/// Load one read into `color` of the graph.
///
/// Runs of non-ACGT bases end the current contig; contigs shorter than
/// `k` are discarded. With `strict` set, any out-of-alphabet base is an
/// `InvalidInput` error instead.
pub fn load_read<const W: usize>(
    graph: &Graph<W>,
    seq: &[u8],
    color: usize,
    strict: bool,
    stats: &LoadStats,
) -> Result<(), CtxError> {
    let k = graph.k();
    stats.reads_loaded.fetch_add(1, Ordering::Relaxed);
    stats.bases_read.fetch_add(seq.len() as u64, Ordering::Relaxed);

    let mut fwd = BinaryKmer::<W>::zero();
    let mut rev = BinaryKmer::<W>::zero();
    let mut filled = 0usize;
    let mut contig_bases = 0usize;
    let mut prev: Option<OrientedNode> = None;

    for &b in seq {
        let code = match encode_base(b) {
            Some(code) => code,
            None => {
                if strict {
                    return Err(CtxError::InvalidInput(format!(
                        "invalid base {:?} in strict mode",
                        b as char
                    )));
                }
                if contig_bases >= k {
                    finish_contig(stats, contig_bases);
                }
                filled = 0;
                contig_bases = 0;
                prev = None;
                continue;
            }
        };
        fwd = fwd.shift_left_append(code, k);
        rev = rev.shift_right_prepend(complement_code(code), k);
        filled += 1;
        contig_bases += 1;
        if filled < k {
            continue;
        }

        let (key, orient) = if fwd.words() <= rev.words() {
            (fwd, Orientation::Forward)
        } else {
            (rev, Orientation::Reverse)
        };
        let (handle, novel) = graph.table().find_or_insert(&key)?;
        graph.store().covg_add(handle, color, 1);
        stats.kmers_loaded.fetch_add(1, Ordering::Relaxed);
        if novel {
            stats.kmers_novel.fetch_add(1, Ordering::Relaxed);
        }

        let node = OrientedNode::new(handle, orient);
        if let Some(prev_node) = prev {
            // `code` is the base this window appended in read direction.
            graph.set_step_edges(prev_node, node, code, color);
        }
        prev = Some(node);
    }

    if contig_bases >= k {
        finish_contig(stats, contig_bases);
    }
    Ok(())
}

fn finish_contig(stats: &LoadStats, bases: usize) {
    stats.contigs_loaded.fetch_add(1, Ordering::Relaxed);
    stats.bases_loaded.fetch_add(bases as u64, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node_store::ColorMask;

    #[test]
    fn test_linear_read_counts() {
        let k = 5;
        let graph: Graph<1> = Graph::new(k, 1, 256).unwrap();
        let stats = LoadStats::default();
        load_read(&graph, b"ACGTAGCCA", 0, false, &stats).unwrap();
        // 9 bases, 5 windows, all distinct.
        assert_eq!(graph.num_kmers(), 5);
        let snap = stats.snapshot();
        assert_eq!(snap.kmers_loaded, 5);
        assert_eq!(snap.kmers_novel, 5);
        assert_eq!(snap.bases_read, 9);
        assert_eq!(snap.bases_loaded, 9);
        assert_eq!(snap.contigs_loaded, 1);
    }

    #[test]
    fn test_n_splits_contigs() {
        let k = 5;
        let graph: Graph<1> = Graph::new(k, 1, 256).unwrap();
        let stats = LoadStats::default();
        load_read(&graph, b"ACGTAGNCCATTG", 0, false, &stats).unwrap();
        // Two contigs: ACGTAG (2 windows) and CCATTG (2 windows).
        assert_eq!(stats.snapshot().contigs_loaded, 2);
        assert_eq!(stats.snapshot().kmers_loaded, 4);
        assert_eq!(stats.snapshot().bases_loaded, 12);
        // No edge crosses the N.
        let left = graph
            .resolve(&BinaryKmer::from_seq(b"CGTAG", k).unwrap())
            .unwrap();
        assert_eq!(graph.out_degree(left, ColorMask::ALL), 0);
    }

    #[test]
    fn test_strict_mode_rejects_n() {
        let k = 5;
        let graph: Graph<1> = Graph::new(k, 1, 256).unwrap();
        let stats = LoadStats::default();
        let err = load_read(&graph, b"ACGTNACGT", 0, true, &stats).unwrap_err();
        assert!(matches!(err, CtxError::InvalidInput(_)));
    }

    #[test]
    fn test_short_contig_discarded() {
        let k = 7;
        let graph: Graph<1> = Graph::new(k, 1, 256).unwrap();
        let stats = LoadStats::default();
        load_read(&graph, b"ACGT", 0, false, &stats).unwrap();
        assert_eq!(graph.num_kmers(), 0);
        assert_eq!(stats.snapshot().contigs_loaded, 0);
    }

    #[test]
    fn test_coverage_accumulates() {
        let k = 5;
        let graph: Graph<1> = Graph::new(k, 1, 256).unwrap();
        let stats = LoadStats::default();
        load_read(&graph, b"ACGTAGC", 0, false, &stats).unwrap();
        load_read(&graph, b"ACGTAGC", 0, false, &stats).unwrap();
        let h = graph
            .find(&BinaryKmer::from_seq(b"ACGTA", k).unwrap())
            .unwrap();
        assert_eq!(graph.store().covg(h, 0), 2);
    }
}
