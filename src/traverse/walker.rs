//! The walker: a pull-style iterator over graph nodes.
//!
//! From a start node the walker follows edges, using link tries to
//! arbitrate at branches. It picks up a fresh link cursor at every node
//! that carries links in the travel direction; cursors advance one
//! junction base each time a branching node is crossed, and die when
//! the walk takes a base their trie does not record. At a branch the
//! candidate bases are restricted to those endorsed by at least one
//! live cursor — exactly one survivor means the walk continues.
//!
//! Termination is a typed, non-fatal [`StopReason`]; callers recover it
//! locally and keep scanning.

use std::collections::VecDeque;

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::kmer::BASES;
use crate::graph::node_store::ColorMask;
use crate::links::store::{LinkDir, LinkStore};

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No successor edges at all.
    DeadEnd,
    /// More than one candidate remained (no links, or links split).
    Ambiguous,
    /// The cycle guard saw this node again.
    Cycle,
    /// Cursors were live but none endorsed an available base.
    LinksExhausted,
}

/// Default cycle-guard window, in nodes.
pub const DEFAULT_MAX_CYCLE_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Cycle guard
// ---------------------------------------------------------------------------

/// Ring buffer of recently visited oriented nodes.
struct RingGuard {
    ring: VecDeque<OrientedNode>,
    seen: AHashSet<OrientedNode>,
    cap: usize,
}

impl RingGuard {
    fn new(cap: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(cap),
            seen: AHashSet::with_capacity(cap),
            cap,
        }
    }

    fn contains(&self, node: OrientedNode) -> bool {
        self.seen.contains(&node)
    }

    fn push(&mut self, node: OrientedNode) {
        if self.ring.len() == self.cap {
            if let Some(old) = self.ring.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.ring.push_back(node);
        self.seen.insert(node);
    }
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// A lazy walk through the graph. Yields the start node first, then one
/// node per successful step; after exhaustion, [`Walker::stop_reason`]
/// says why it ended.
pub struct Walker<'g, const W: usize> {
    graph: &'g Graph<W>,
    links: Option<&'g LinkStore>,
    mask: ColorMask,
    cur: OrientedNode,
    cursors: SmallVec<[u32; 8]>,
    guard: RingGuard,
    stop: Option<StopReason>,
    started: bool,
}

impl<'g, const W: usize> Walker<'g, W> {
    pub fn new(
        graph: &'g Graph<W>,
        links: Option<&'g LinkStore>,
        mask: ColorMask,
        start: OrientedNode,
    ) -> Self {
        Self::with_cycle_limit(graph, links, mask, start, DEFAULT_MAX_CYCLE_LEN)
    }

    pub fn with_cycle_limit(
        graph: &'g Graph<W>,
        links: Option<&'g LinkStore>,
        mask: ColorMask,
        start: OrientedNode,
        max_cycle_len: usize,
    ) -> Self {
        Self {
            graph,
            links,
            mask,
            cur: start,
            cursors: SmallVec::new(),
            guard: RingGuard::new(max_cycle_len),
            stop: None,
            started: false,
        }
    }

    /// Why the walk terminated (`None` while still running).
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Pick up a root cursor if the node carries links in our direction.
    fn pick_up_links(&mut self, node: OrientedNode) {
        if let Some(links) = self.links {
            let dir = LinkDir::from_orientation(node.orient);
            if let Some(root) = links.root(node.handle, dir) {
                self.cursors.push(root);
            }
        }
    }

    /// Choose the base to take from `node`, or the reason to stop.
    fn choose_base(&self, node: OrientedNode) -> Result<(u8, bool), StopReason> {
        let bits = self.graph.successor_bits(node, self.mask);
        match bits.count_ones() {
            0 => Err(StopReason::DeadEnd),
            1 => Ok((bits.trailing_zeros() as u8, false)),
            _ => {
                // With no link store there is nothing to restrict the
                // candidate set. An empty cursor list endorses nothing
                // and falls through to the zero-endorsement arm.
                let Some(links) = self.links else {
                    return Err(StopReason::Ambiguous);
                };
                let mut endorsed = 0u8;
                for &cursor in &self.cursors {
                    for base in BASES {
                        if bits & (1 << base) != 0 && links.child(cursor, base).is_some() {
                            endorsed |= 1 << base;
                        }
                    }
                }
                match endorsed.count_ones() {
                    0 => Err(StopReason::LinksExhausted),
                    1 => Ok((endorsed.trailing_zeros() as u8, true)),
                    _ => Err(StopReason::Ambiguous),
                }
            }
        }
    }

    /// Advance every cursor through a junction taken with `base`.
    fn advance_cursors(&mut self, base: u8) {
        if let Some(links) = self.links {
            let mut kept = SmallVec::new();
            for &cursor in &self.cursors {
                if let Some(child) = links.child(cursor, base) {
                    kept.push(child);
                }
            }
            self.cursors = kept;
        }
    }
}

impl<const W: usize> Iterator for Walker<'_, W> {
    type Item = OrientedNode;

    fn next(&mut self) -> Option<OrientedNode> {
        if self.stop.is_some() {
            return None;
        }
        if !self.started {
            self.started = true;
            self.guard.push(self.cur);
            self.pick_up_links(self.cur);
            return Some(self.cur);
        }

        let (base, at_branch) = match self.choose_base(self.cur) {
            Ok(choice) => choice,
            Err(reason) => {
                self.stop = Some(reason);
                return None;
            }
        };
        if at_branch {
            self.advance_cursors(base);
        }
        let next = match self.graph.step(self.cur, base) {
            Some(next) => next,
            None => {
                self.stop = Some(StopReason::DeadEnd);
                return None;
            }
        };
        if self.guard.contains(next) {
            self.stop = Some(StopReason::Cycle);
            return None;
        }
        self.guard.push(next);
        self.pick_up_links(next);
        self.cur = next;
        Some(next)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
