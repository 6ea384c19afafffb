//! Bubble caller.
//!
//! Scans for branching nodes, walks each pair of outgoing arms with the
//! link-aware walker, and reports pairs that reconverge within a
//! bounded distance as candidate variants. Output is FASTA-style, one
//! record per flank and branch.

use std::io::Write;

use ahash::AHashMap;
use serde::Serialize;
use tracing::info;

use crate::error::CtxError;
use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::node_store::ColorMask;
use crate::links::store::LinkStore;
use crate::traverse::walker::Walker;

/// Default bound on branch walk length, in nodes.
pub const DEFAULT_MAX_ALLELE_LEN: usize = 300;

/// Counters reported by a bubble-calling pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BubbleStats {
    pub branch_nodes_seen: u64,
    pub bubbles_found: u64,
}

/// A called bubble: two arms from a shared flank kmer to a shared
/// reconvergence kmer.
#[derive(Debug, Clone)]
pub struct Bubble {
    pub flank5: OrientedNode,
    pub branch1: Vec<OrientedNode>,
    pub branch2: Vec<OrientedNode>,
    pub flank3: OrientedNode,
}

/// Walk one arm up to `max_len` nodes. Index the first arm's nodes,
/// then scan the second arm for the earliest shared node.
fn walk_arm<const W: usize>(
    graph: &Graph<W>,
    links: Option<&LinkStore>,
    mask: ColorMask,
    from: OrientedNode,
    base: u8,
    max_len: usize,
) -> Option<Vec<OrientedNode>> {
    let first = graph.step(from, base)?;
    let walker = Walker::new(graph, links, mask, first);
    let arm: Vec<OrientedNode> = walker.take(max_len).collect();
    (!arm.is_empty()).then_some(arm)
}

/// Find bubbles opening at `node` and hand them to `emit`.
fn call_from_node<const W: usize>(
    graph: &Graph<W>,
    links: Option<&LinkStore>,
    mask: ColorMask,
    node: OrientedNode,
    max_len: usize,
    emit: &mut impl FnMut(Bubble),
) {
    let bits = graph.successor_bits(node, mask);
    if bits.count_ones() < 2 {
        return;
    }
    let bases: Vec<u8> = (0..4u8).filter(|b| bits & (1 << b) != 0).collect();
    for (i, &b1) in bases.iter().enumerate() {
        let Some(arm1) = walk_arm(graph, links, mask, node, b1, max_len) else {
            continue;
        };
        let index: AHashMap<OrientedNode, usize> = arm1
            .iter()
            .enumerate()
            .map(|(pos, &n)| (n, pos))
            .collect();
        for &b2 in &bases[i + 1..] {
            let Some(arm2) = walk_arm(graph, links, mask, node, b2, max_len) else {
                continue;
            };
            let meet = arm2
                .iter()
                .enumerate()
                .find_map(|(pos2, n)| index.get(n).map(|&pos1| (pos1, pos2)));
            if let Some((pos1, pos2)) = meet {
                emit(Bubble {
                    flank5: node,
                    branch1: arm1[..=pos1].to_vec(),
                    branch2: arm2[..=pos2].to_vec(),
                    flank3: arm1[pos1],
                });
            }
        }
    }
}

/// Scan the whole graph for bubbles and write them to `out`.
pub fn call_bubbles<const W: usize, Out: Write>(
    graph: &Graph<W>,
    links: Option<&LinkStore>,
    mask: ColorMask,
    max_len: usize,
    out: &mut Out,
) -> Result<BubbleStats, CtxError> {
    let mut stats = BubbleStats::default();
    let mut num = 0u64;
    for (handle, _) in graph.table().iter() {
        for orient in [
            crate::graph::kmer::Orientation::Forward,
            crate::graph::kmer::Orientation::Reverse,
        ] {
            let node = OrientedNode::new(handle, orient);
            if graph.out_degree(node, mask) < 2 {
                continue;
            }
            stats.branch_nodes_seen += 1;
            let mut found: Vec<Bubble> = Vec::new();
            call_from_node(graph, links, mask, node, max_len, &mut |b| found.push(b));
            for bubble in found {
                write_bubble(graph, &bubble, num, out)?;
                num += 1;
            }
        }
    }
    stats.bubbles_found = num;
    info!(bubbles = num, "bubble calling done");
    Ok(stats)
}

fn write_bubble<const W: usize, Out: Write>(
    graph: &Graph<W>,
    bubble: &Bubble,
    num: u64,
    out: &mut Out,
) -> Result<(), CtxError> {
    let k = graph.k();
    let flank5 = graph.oriented_kmer(bubble.flank5).to_dna_string(k);
    let flank3 = graph.oriented_kmer(bubble.flank3).to_dna_string(k);
    writeln!(out, ">bubble.{num}.5pflank")?;
    writeln!(out, "{flank5}")?;
    for (i, branch) in [&bubble.branch1, &bubble.branch2].iter().enumerate() {
        let seq = graph.path_sequence(branch);
        writeln!(out, ">bubble.{num}.branch.{}", i + 1)?;
        out.write_all(&seq)?;
        writeln!(out)?;
    }
    writeln!(out, ">bubble.{num}.3pflank")?;
    writeln!(out, "{flank3}")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};

    const K: usize = 5;

    fn build_graph(seqs: &[&[u8]]) -> Graph<1> {
        let graph = Graph::new(K, 1, 1024).unwrap();
        let stats = LoadStats::default();
        for seq in seqs {
            load_read(&graph, seq, 0, false, &stats).unwrap();
        }
        graph
    }

    #[test]
    fn test_simple_snp_bubble() {
        // Two haplotypes differing by one base in the middle.
        let graph = build_graph(&[b"ACGTAGCCATTGACC", b"ACGTAGTCATTGACC"]);
        let mut out = Vec::new();
        let stats =
            call_bubbles(&graph, None, ColorMask::ALL, DEFAULT_MAX_ALLELE_LEN, &mut out).unwrap();
        assert!(stats.bubbles_found >= 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(">bubble.0.5pflank"));
        assert!(text.contains(">bubble.0.branch.1"));
        assert!(text.contains(">bubble.0.branch.2"));
        assert!(text.contains(">bubble.0.3pflank"));
    }

    #[test]
    fn test_linear_graph_has_no_bubbles() {
        let graph = build_graph(&[b"ACGTAGCCATTGACC"]);
        let mut out = Vec::new();
        let stats =
            call_bubbles(&graph, None, ColorMask::ALL, DEFAULT_MAX_ALLELE_LEN, &mut out).unwrap();
        assert_eq!(stats.bubbles_found, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_dead_end_fork_is_not_a_bubble() {
        let graph = build_graph(&[b"ACGTAGCCATT", b"ACGTAGT"]);
        let mut out = Vec::new();
        let stats =
            call_bubbles(&graph, None, ColorMask::ALL, DEFAULT_MAX_ALLELE_LEN, &mut out).unwrap();
        assert_eq!(stats.bubbles_found, 0);
    }
}
