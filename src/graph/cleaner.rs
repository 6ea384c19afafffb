//! Graph cleaning: tip clipping and unitig coverage pruning.
//!
//! Both phases are color-agnostic — they walk the union of edges across
//! all colors and sum coverage across colors. Removal tombstones nodes
//! in the hash table, zeroes their colored state, and then repairs any
//! surviving edges that pointed into the removed set.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::error::CtxError;
use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::kmer::{Orientation, BASES};
use crate::graph::node_store::ColorMask;

/// Default tip length threshold, in kmers, for kmer size `k`.
#[inline]
pub fn default_tip_threshold(k: usize) -> usize {
    2 * k
}

/// Counters reported by a cleaning pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CleanStats {
    pub tips_removed: u64,
    pub tip_kmers_removed: u64,
    pub unitigs_removed: u64,
    pub unitig_kmers_removed: u64,
    pub coverage_cutoff: u32,
}

// ---------------------------------------------------------------------------
// Unitig enumeration
// ---------------------------------------------------------------------------

/// A maximal non-branching walk.
#[derive(Debug, Clone)]
pub struct Unitig {
    pub nodes: Vec<OrientedNode>,
    /// No edges extend the walk at its 5' end.
    pub open_start: bool,
    /// No edges extend the walk at its 3' end.
    pub open_end: bool,
}

impl Unitig {
    /// Mean per-node coverage, summed across colors.
    pub fn mean_coverage<const W: usize>(&self, graph: &Graph<W>) -> f64 {
        let total: u64 = self
            .nodes
            .iter()
            .map(|n| graph.store().covg_total(n.handle) as u64)
            .sum();
        total as f64 / self.nodes.len() as f64
    }

    /// A dangling short branch: at least one free end.
    pub fn is_tip(&self, max_len: usize) -> bool {
        self.nodes.len() < max_len && (self.open_start || self.open_end)
    }
}

/// Whether the walk can be extended from `node` without crossing a
/// branch: exactly one successor whose own in-degree is one.
fn unique_extension<const W: usize>(
    graph: &Graph<W>,
    node: OrientedNode,
    mask: ColorMask,
) -> Option<OrientedNode> {
    let succs = graph.successors(node, mask);
    if succs.len() != 1 {
        return None;
    }
    let (_, next) = succs[0];
    if graph.in_degree(next, mask) != 1 {
        return None;
    }
    Some(next)
}

/// Visit every unitig exactly once.
pub fn for_each_unitig<const W: usize>(graph: &Graph<W>, mut f: impl FnMut(&Unitig)) {
    let mask = graph.all_colors();
    let capacity = graph.capacity() as usize;
    let mut visited = vec![false; capacity];

    for h in 0..graph.capacity() {
        if visited[h as usize] || !graph.table().is_occupied(h) {
            continue;
        }
        let seed = OrientedNode::new(h, Orientation::Forward);

        // Walk backward to the unitig start, guarding against cycles.
        let mut start = seed;
        let mut open_start = true;
        loop {
            match unique_extension(graph, start.flipped(), mask) {
                Some(prev) => {
                    if prev.handle == seed.handle {
                        // Cycle: treat the seed as the start.
                        start = seed;
                        open_start = false;
                        break;
                    }
                    start = prev.flipped();
                }
                None => {
                    open_start = graph.out_degree(start.flipped(), mask) == 0;
                    break;
                }
            }
        }

        // Walk forward collecting the unitig.
        let mut nodes = vec![start];
        visited[start.handle as usize] = true;
        let mut cur = start;
        let open_end;
        loop {
            match unique_extension(graph, cur, mask) {
                Some(next) => {
                    if visited[next.handle as usize] {
                        open_end = false;
                        break;
                    }
                    visited[next.handle as usize] = true;
                    nodes.push(next);
                    cur = next;
                }
                None => {
                    open_end = graph.out_degree(cur, mask) == 0;
                    break;
                }
            }
        }

        f(&Unitig {
            nodes,
            open_start,
            open_end,
        });
    }
}

// ---------------------------------------------------------------------------
// Removal + edge repair
// ---------------------------------------------------------------------------

/// Tombstone a set of nodes and drop surviving edges into them.
fn remove_nodes<const W: usize>(graph: &Graph<W>, doomed: &[u64]) {
    for &h in doomed {
        graph.remove_node(h);
    }
    repair_edges(graph);
}

/// Clear any edge bit whose neighbor no longer resolves.
///
/// One pass over all live buckets; independent per node, so it runs on
/// the rayon pool.
pub fn repair_edges<const W: usize>(graph: &Graph<W>) {
    (0..graph.capacity()).into_par_iter().for_each(|h| {
        if !graph.table().is_occupied(h) {
            return;
        }
        for color in 0..graph.num_colors() {
            let e = graph.store().edges(h, color);
            if e == 0 {
                continue;
            }
            let mut keep = 0u8;
            for orient in [Orientation::Forward, Orientation::Reverse] {
                let node = OrientedNode::new(h, orient);
                let bits = crate::graph::node_store::edges_in_orientation(e, orient);
                for base in BASES {
                    if bits & (1 << base) != 0 && graph.step(node, base).is_some() {
                        keep |= crate::graph::node_store::out_edge_mask(orient, base);
                    }
                }
            }
            if keep != e {
                graph.store().set_edges(h, color, keep);
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Tip removal
// ---------------------------------------------------------------------------

/// Remove every tip shorter than `max_len` kmers.
///
/// Tips are identified on the graph as it stands and removed in one
/// batch; a single pass, so clipping cannot cascade through the graph.
pub fn remove_tips<const W: usize>(graph: &Graph<W>, max_len: usize) -> CleanStats {
    let mut stats = CleanStats::default();
    let mut doomed: Vec<u64> = Vec::new();
    for_each_unitig(graph, |unitig| {
        if unitig.is_tip(max_len) {
            stats.tips_removed += 1;
            doomed.extend(unitig.nodes.iter().map(|n| n.handle));
        }
    });
    stats.tip_kmers_removed = doomed.len() as u64;
    if !doomed.is_empty() {
        remove_nodes(graph, &doomed);
    }
    info!(
        tips = stats.tips_removed,
        kmers = stats.tip_kmers_removed,
        "tip clipping done"
    );
    stats
}

// ---------------------------------------------------------------------------
// Coverage histogram + cutoff
// ---------------------------------------------------------------------------

/// Highest tracked mean-coverage bin.
pub const MAX_HIST_COVG: usize = 1000;

/// Histogram of unitig mean coverages (bin = floor of the mean, clamped).
pub fn unitig_coverage_histogram<const W: usize>(graph: &Graph<W>) -> Vec<u64> {
    let mut unitigs: Vec<Unitig> = Vec::new();
    for_each_unitig(graph, |u| unitigs.push(u.clone()));

    let bins: Vec<AtomicU64> = (0..=MAX_HIST_COVG).map(|_| AtomicU64::new(0)).collect();
    unitigs.par_iter().for_each(|u| {
        let mean = u.mean_coverage(graph);
        let bin = (mean.floor() as usize).min(MAX_HIST_COVG);
        bins[bin].fetch_add(1, Ordering::Relaxed);
    });
    bins.into_iter().map(|b| b.into_inner()).collect()
}

/// Write a coverage histogram as `covg,count` CSV rows.
pub fn write_histogram_csv(hist: &[u64], path: &Path) -> Result<(), CtxError> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "covg,unitigs")?;
    for (covg, &count) in hist.iter().enumerate() {
        if count > 0 {
            writeln!(out, "{covg},{count}")?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Derive a coverage cutoff from the unitig histogram.
///
/// Two estimates are taken and the lower wins:
///
/// 1. the first local minimum above the error tail (ties broken low);
/// 2. the coverage below which 99% of erroneous unitigs fall, modeling
///    the error tail as geometric decay fitted to the first two bins.
///
/// A histogram with no discernible peak yields 1 (drop singletons only).
pub fn pick_coverage_cutoff(hist: &[u64]) -> u32 {
    // Local-minimum estimate: first i >= 2 where the curve turns back up.
    let mut local_min: Option<u32> = None;
    for i in 2..hist.len().saturating_sub(1) {
        if hist[i] <= hist[i - 1] && hist[i] < hist[i + 1] {
            local_min = Some(i as u32);
            break;
        }
    }

    // Error-tail estimate: cumulative geometric mass reaching 99%.
    let tail_99 = if hist.len() > 2 && hist[1] > 0 && hist[2] > 0 && hist[2] < hist[1] {
        let ratio = hist[2] as f64 / hist[1] as f64;
        let total = hist[1] as f64 / (1.0 - ratio);
        let mut cum = 0.0;
        let mut expected = hist[1] as f64;
        let mut t = 1u32;
        while cum < 0.99 * total && t < hist.len() as u32 {
            cum += expected;
            expected *= ratio;
            t += 1;
        }
        Some(t)
    } else {
        None
    };

    match (local_min, tail_99) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 1,
    }
}

// ---------------------------------------------------------------------------
// Unitig pruning
// ---------------------------------------------------------------------------

/// Drop every unitig whose mean coverage is strictly below `cutoff`.
pub fn clean_unitigs<const W: usize>(graph: &Graph<W>, cutoff: u32) -> CleanStats {
    let mut stats = CleanStats {
        coverage_cutoff: cutoff,
        ..CleanStats::default()
    };
    let mut doomed: Vec<u64> = Vec::new();
    for_each_unitig(graph, |unitig| {
        if unitig.mean_coverage(graph) < cutoff as f64 {
            stats.unitigs_removed += 1;
            doomed.extend(unitig.nodes.iter().map(|n| n.handle));
        }
    });
    stats.unitig_kmers_removed = doomed.len() as u64;
    if !doomed.is_empty() {
        remove_nodes(graph, &doomed);
    }
    info!(
        unitigs = stats.unitigs_removed,
        kmers = stats.unitig_kmers_removed,
        cutoff, "unitig coverage pruning done"
    );
    stats
}

/// Record a cleaning pass in every color's header metadata.
pub fn record_cleaning<const W: usize>(
    graph: &mut Graph<W>,
    tip_threshold: Option<usize>,
    coverage_cutoff: Option<u32>,
) {
    for color in graph.info.colors.iter_mut() {
        if let Some(t) = tip_threshold {
            color.cleaned_tips = true;
            color.unitig_kmer_cutoff = t as u32;
        }
        if let Some(c) = coverage_cutoff {
            color.cleaned_unitigs = true;
            color.unitig_cutoff = c;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};
    use crate::graph::kmer::BinaryKmer;

    const K: usize = 5;

    fn build(seqs: &[(&[u8], usize)]) -> Graph<1> {
        let graph = Graph::new(K, 1, 1024).unwrap();
        let stats = LoadStats::default();
        for (seq, times) in seqs {
            for _ in 0..*times {
                load_read(&graph, seq, 0, false, &stats).unwrap();
            }
        }
        graph
    }

    #[test]
    fn test_unitig_enumeration_linear() {
        let graph = build(&[(b"ACGTAGCCATT", 1)]);
        let mut count = 0;
        for_each_unitig(&graph, |u| {
            count += 1;
            assert_eq!(u.nodes.len(), 7);
            assert!(u.open_start && u.open_end);
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unitig_split_at_branch() {
        // Fork: shared prefix then two arms.
        let graph = build(&[(b"ACGTAGCCA", 1), (b"ACGTAGTTA", 1)]);
        let mut sizes: Vec<usize> = Vec::new();
        for_each_unitig(&graph, |u| sizes.push(u.nodes.len()));
        sizes.sort_unstable();
        // Prefix ACGTAG (2 kmers) + two arms of 3 kmers each.
        assert_eq!(sizes, vec![2, 3, 3]);
    }

    #[test]
    fn test_tip_removal() {
        // Backbone covered twice, a one-kmer tip once.
        let graph = build(&[(b"ACGTAGCCATTGA", 2), (b"ACGTAGT", 1)]);
        let before = graph.num_kmers();
        let stats = remove_tips(&graph, 2);
        assert_eq!(stats.tips_removed, 1);
        assert!(graph.num_kmers() < before);
        // The tip kmer is gone, the backbone is intact.
        assert!(graph
            .find(&BinaryKmer::from_seq(b"GTAGT", K).unwrap())
            .is_none());
        assert!(graph
            .find(&BinaryKmer::from_seq(b"GTAGC", K).unwrap())
            .is_some());
        // No dangling edges survive.
        let branch = graph
            .resolve(&BinaryKmer::from_seq(b"CGTAG", K).unwrap())
            .unwrap();
        assert_eq!(graph.out_degree(branch, ColorMask::ALL), 1);
    }

    #[test]
    fn test_coverage_pruning() {
        let graph = build(&[(b"ACGTAGCCATTGA", 3), (b"GGATCGTTCAAGG", 1)]);
        let stats = clean_unitigs(&graph, 2);
        assert_eq!(stats.unitigs_removed, 1);
        assert!(graph
            .find(&BinaryKmer::from_seq(b"GGATC", K).unwrap())
            .is_none());
        assert!(graph
            .find(&BinaryKmer::from_seq(b"ACGTA", K).unwrap())
            .is_some());
    }

    #[test]
    fn test_cutoff_picker_bimodal() {
        // Error spike at 1-2, true peak near 10.
        let mut hist = vec![0u64; 16];
        hist[1] = 1000;
        hist[2] = 200;
        hist[3] = 40;
        hist[4] = 8;
        hist[5] = 3;
        hist[6] = 10;
        hist[7] = 60;
        hist[8] = 200;
        hist[9] = 400;
        hist[10] = 500;
        let cutoff = pick_coverage_cutoff(&hist);
        assert!(cutoff >= 4 && cutoff <= 6, "cutoff = {cutoff}");
    }

    #[test]
    fn test_cutoff_picker_no_peak() {
        let hist = vec![0u64, 5, 3, 2, 1, 0, 0];
        // Monotone decay: geometric tail estimate drives the answer.
        let cutoff = pick_coverage_cutoff(&hist);
        assert!(cutoff >= 1);
    }

    #[test]
    fn test_cutoff_picker_empty() {
        assert_eq!(pick_coverage_cutoff(&[0, 0, 0]), 1);
    }

    #[test]
    fn test_cleaning_monotonicity() {
        // clean(c) then clean(c') == clean(c') for c' > c.
        let seqs: &[(&[u8], usize)] = &[
            (b"ACGTAGCCATTGA", 4),
            (b"TTTGGGCACACAA", 2),
            (b"GGTTACCAGTAGG", 1),
        ];
        let g1 = build(seqs);
        clean_unitigs(&g1, 2);
        clean_unitigs(&g1, 3);
        let g2 = build(seqs);
        clean_unitigs(&g2, 3);
        let mut kmers1: Vec<String> = g1
            .table()
            .iter()
            .map(|(_, km)| km.to_dna_string(K))
            .collect();
        let mut kmers2: Vec<String> = g2
            .table()
            .iter()
            .map(|(_, km)| km.to_dna_string(K))
            .collect();
        kmers1.sort();
        kmers2.sort();
        assert_eq!(kmers1, kmers2);
    }
}
