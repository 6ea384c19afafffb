//! Breakpoint caller.
//!
//! Finds positions where sample sequence leaves the reference color and
//! rejoins it: for every node present in the reference, any sample-only
//! successor edge is a divergence anchor. The sample path is walked with
//! links until it touches reference-colored sequence again, and the
//! novel interval is reported with its reference anchors.

use std::io::Write;

use serde::Serialize;
use tracing::info;

use crate::error::CtxError;
use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::kmer::Orientation;
use crate::graph::node_store::ColorMask;
use crate::links::store::LinkStore;
use crate::traverse::walker::Walker;

/// Default bound on the novel walk length, in nodes.
pub const DEFAULT_MAX_WALK: usize = 1000;

/// Counters reported by a breakpoint-calling pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BreakpointStats {
    pub divergence_anchors: u64,
    pub breakpoints_found: u64,
}

/// A called breakpoint: novel sample path between two reference anchors.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub anchor5: OrientedNode,
    pub novel: Vec<OrientedNode>,
    pub anchor3: OrientedNode,
}

#[inline]
fn in_ref<const W: usize>(graph: &Graph<W>, handle: u64, ref_color: usize) -> bool {
    graph.store().covg(handle, ref_color) > 0
}

/// Scan for breakpoints of the sample colors against `ref_color`.
pub fn call_breakpoints<const W: usize, Out: Write>(
    graph: &Graph<W>,
    links: Option<&LinkStore>,
    ref_color: usize,
    sample_mask: ColorMask,
    max_walk: usize,
    out: &mut Out,
) -> Result<BreakpointStats, CtxError> {
    if ref_color >= graph.num_colors() {
        return Err(CtxError::InvalidInput(format!(
            "reference color {ref_color} out of range (graph has {} colors)",
            graph.num_colors()
        )));
    }
    let sample_mask = sample_mask.without(ref_color);
    let ref_mask = ColorMask::single(ref_color);
    let mut stats = BreakpointStats::default();
    let mut num = 0u64;

    for (handle, _) in graph.table().iter() {
        if !in_ref(graph, handle, ref_color) {
            continue;
        }
        for orient in [Orientation::Forward, Orientation::Reverse] {
            let node = OrientedNode::new(handle, orient);
            let ref_bits = graph.successor_bits(node, ref_mask);
            let sample_bits = graph.successor_bits(node, sample_mask);
            let novel_bits = sample_bits & !ref_bits;
            if novel_bits == 0 {
                continue;
            }
            for base in crate::graph::kmer::BASES {
                if novel_bits & (1 << base) == 0 {
                    continue;
                }
                stats.divergence_anchors += 1;
                if let Some(bp) =
                    follow_novel(graph, links, node, base, ref_color, sample_mask, max_walk)
                {
                    write_breakpoint(graph, &bp, num, out)?;
                    num += 1;
                }
            }
        }
    }
    stats.breakpoints_found = num;
    info!(breakpoints = num, "breakpoint calling done");
    Ok(stats)
}

/// Walk the sample-only path from a divergence anchor until it touches
/// the reference again.
fn follow_novel<const W: usize>(
    graph: &Graph<W>,
    links: Option<&LinkStore>,
    anchor: OrientedNode,
    base: u8,
    ref_color: usize,
    sample_mask: ColorMask,
    max_walk: usize,
) -> Option<Breakpoint> {
    let first = graph.step(anchor, base)?;
    if in_ref(graph, first.handle, ref_color) {
        // Immediate rejoin: an edge novel to the sample but both ends
        // on the reference. Still a breakpoint, with an empty interval.
        return Some(Breakpoint {
            anchor5: anchor,
            novel: Vec::new(),
            anchor3: first,
        });
    }
    let walker = Walker::new(graph, links, sample_mask, first);
    let mut novel = Vec::new();
    for node in walker.take(max_walk) {
        if in_ref(graph, node.handle, ref_color) {
            return Some(Breakpoint {
                anchor5: anchor,
                novel,
                anchor3: node,
            });
        }
        novel.push(node);
    }
    None
}

fn write_breakpoint<const W: usize, Out: Write>(
    graph: &Graph<W>,
    bp: &Breakpoint,
    num: u64,
    out: &mut Out,
) -> Result<(), CtxError> {
    let k = graph.k();
    writeln!(out, ">brkpnt.{num}.5pflank")?;
    writeln!(out, "{}", graph.oriented_kmer(bp.anchor5).to_dna_string(k))?;
    writeln!(out, ">brkpnt.{num}.path")?;
    if bp.novel.is_empty() {
        writeln!(out, ".")?;
    } else {
        out.write_all(&graph.path_sequence(&bp.novel))?;
        writeln!(out)?;
    }
    writeln!(out, ">brkpnt.{num}.3pflank")?;
    writeln!(out, "{}", graph.oriented_kmer(bp.anchor3).to_dna_string(k))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
