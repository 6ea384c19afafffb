//! In-memory link storage.
//!
//! Links attach to a graph node and a direction, and record the
//! sequence of junction choices reads made from that node onward. Per
//! (node, direction) the choices form a trie: arena-allocated nodes
//! with parent indices, children resolved through a hash map keyed on
//! `(parent index, junction base)`. Each trie node carries cumulative
//! per-color counts — the number of reads that reached at least that
//! junction choice.

use ahash::AHashMap;

use crate::graph::kmer::Orientation;

/// Absent trie-node index.
pub const LINK_NONE: u32 = u32::MAX;

/// Direction a link applies to, relative to the stored canonical kmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkDir {
    Fwd,
    Rev,
}

impl LinkDir {
    #[inline]
    pub fn from_orientation(o: Orientation) -> Self {
        match o {
            Orientation::Forward => LinkDir::Fwd,
            Orientation::Reverse => LinkDir::Rev,
        }
    }

    #[inline]
    pub fn to_orientation(self) -> Orientation {
        match self {
            LinkDir::Fwd => Orientation::Forward,
            LinkDir::Rev => Orientation::Reverse,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            LinkDir::Fwd => 0,
            LinkDir::Rev => 1,
        }
    }

    #[inline]
    pub fn as_char(self) -> char {
        match self {
            LinkDir::Fwd => 'F',
            LinkDir::Rev => 'R',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'F' => Some(LinkDir::Fwd),
            'R' => Some(LinkDir::Rev),
            _ => None,
        }
    }
}

/// One arena-allocated trie node.
#[derive(Debug, Clone, Copy)]
struct TrieNode {
    parent: u32,
    /// Junction base code; roots carry the sentinel `0xFF`.
    base: u8,
}

/// A path read back out of a trie: direction, junction choices, and the
/// cumulative per-color counts at its terminal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPath {
    pub dir: LinkDir,
    pub juncs: Vec<u8>,
    pub counts: Vec<u32>,
}

/// Per-kmer link tries for a whole graph.
pub struct LinkStore {
    num_colors: usize,
    nodes: Vec<TrieNode>,
    /// `nodes.len() * num_colors` cumulative counters.
    counts: Vec<u32>,
    children: AHashMap<(u32, u8), u32>,
    /// Handle -> `[fwd_root, rev_root]` (LINK_NONE when absent).
    roots: AHashMap<u64, [u32; 2]>,
}

impl LinkStore {
    pub fn new(num_colors: usize) -> Self {
        Self {
            num_colors,
            nodes: Vec::new(),
            counts: Vec::new(),
            children: AHashMap::new(),
            roots: AHashMap::new(),
        }
    }

    #[inline]
    pub fn num_colors(&self) -> usize {
        self.num_colors
    }

    /// Number of kmers with at least one link in either direction.
    pub fn num_kmers_with_links(&self) -> u64 {
        self.roots
            .values()
            .filter(|r| {
                r.iter()
                    .any(|&root| root != LINK_NONE && self.has_children(root))
            })
            .count() as u64
    }

    #[inline]
    fn has_children(&self, node: u32) -> bool {
        (0..4u8).any(|b| self.children.contains_key(&(node, b)))
    }

    fn alloc_node(&mut self, parent: u32, base: u8) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(TrieNode { parent, base });
        self.counts.extend(std::iter::repeat_n(0u32, self.num_colors));
        idx
    }

    /// Root index for `(handle, dir)`, if links were recorded there.
    pub fn root(&self, handle: u64, dir: LinkDir) -> Option<u32> {
        let roots = self.roots.get(&handle)?;
        let root = roots[dir.index()];
        if root == LINK_NONE || !self.has_children(root) {
            None
        } else {
            Some(root)
        }
    }

    /// Root index for `(handle, dir)`, creating it if needed.
    pub fn ensure_root(&mut self, handle: u64, dir: LinkDir) -> u32 {
        let existing = self
            .roots
            .get(&handle)
            .map(|r| r[dir.index()])
            .unwrap_or(LINK_NONE);
        if existing != LINK_NONE {
            return existing;
        }
        let idx = self.alloc_node(LINK_NONE, 0xFF);
        self.roots.entry(handle).or_insert([LINK_NONE; 2])[dir.index()] = idx;
        idx
    }

    /// Parent of a trie node (`None` for roots).
    #[inline]
    pub fn parent(&self, node: u32) -> Option<u32> {
        let p = self.nodes[node as usize].parent;
        (p != LINK_NONE).then_some(p)
    }

    /// Depth of a trie node below its root (roots are depth 0).
    pub fn depth(&self, node: u32) -> u32 {
        let mut depth = 0;
        let mut cur = node;
        while let Some(p) = self.parent(cur) {
            depth += 1;
            cur = p;
        }
        depth
    }

    /// Child of `node` along junction base `base`.
    #[inline]
    pub fn child(&self, node: u32, base: u8) -> Option<u32> {
        self.children.get(&(node, base)).copied()
    }

    /// Child of `node` along `base`, creating it if needed.
    pub fn extend(&mut self, node: u32, base: u8) -> u32 {
        if let Some(child) = self.child(node, base) {
            return child;
        }
        let child = self.alloc_node(node, base);
        self.children.insert((node, base), child);
        child
    }

    /// Junction bases available from `node`, in base order.
    pub fn child_bases(&self, node: u32) -> impl Iterator<Item = u8> + '_ {
        (0..4u8).filter(move |&b| self.children.contains_key(&(node, b)))
    }

    #[inline]
    pub fn add_count(&mut self, node: u32, color: usize, amount: u32) {
        let slot = node as usize * self.num_colors + color;
        self.counts[slot] = self.counts[slot].saturating_add(amount);
    }

    /// Cumulative per-color counts at `node`.
    #[inline]
    pub fn counts_of(&self, node: u32) -> &[u32] {
        let start = node as usize * self.num_colors;
        &self.counts[start..start + self.num_colors]
    }

    /// Cumulative count at `node`, summed over colors.
    #[inline]
    pub fn count_total(&self, node: u32) -> u32 {
        self.counts_of(node).iter().sum()
    }

    /// Reads entering a trie: total count across the root's children.
    pub fn trie_coverage(&self, root: u32) -> u32 {
        self.child_bases(root)
            .filter_map(|b| self.child(root, b))
            .map(|c| self.count_total(c))
            .sum()
    }

    /// Record one read's junction choices under `(handle, dir)`,
    /// bumping the cumulative count of every node along the path.
    pub fn add_read_path(&mut self, handle: u64, dir: LinkDir, juncs: &[u8], color: usize) {
        debug_assert!(!juncs.is_empty());
        let mut cur = self.ensure_root(handle, dir);
        for &b in juncs {
            cur = self.extend(cur, b);
            self.add_count(cur, color, 1);
        }
    }

    /// Merge a stored path whose terminal carried `counts` reads per
    /// color; every node along the path absorbs the counts, which is
    /// how residual-count path files reconstruct cumulative totals.
    pub fn add_path_counts(&mut self, handle: u64, dir: LinkDir, juncs: &[u8], counts: &[u32]) {
        debug_assert_eq!(counts.len(), self.num_colors);
        let mut cur = self.ensure_root(handle, dir);
        for &b in juncs {
            cur = self.extend(cur, b);
            for (color, &n) in counts.iter().enumerate() {
                if n > 0 {
                    self.add_count(cur, color, n);
                }
            }
        }
    }

    /// Handles that carry links, in ascending (bucket) order.
    pub fn handles(&self) -> Vec<u64> {
        let mut handles: Vec<u64> = self
            .roots
            .iter()
            .filter(|(_, r)| {
                r.iter()
                    .any(|&root| root != LINK_NONE && self.has_children(root))
            })
            .map(|(&h, _)| h)
            .collect();
        handles.sort_unstable();
        handles
    }

    /// Read back the paths of one kmer in trie preorder.
    ///
    /// A path is emitted for every node whose residual count — its
    /// cumulative count minus the sum over its children — is positive
    /// in any color, i.e. at least one read's junction sequence ended
    /// exactly there. The reported counts are the residuals, so writing
    /// and re-adding them round-trips the cumulative totals.
    pub fn paths_for(&self, handle: u64) -> Vec<LinkPath> {
        let mut out = Vec::new();
        for dir in [LinkDir::Fwd, LinkDir::Rev] {
            let Some(root) = self.root(handle, dir) else {
                continue;
            };
            let mut juncs: Vec<u8> = Vec::new();
            self.collect_paths(root, dir, &mut juncs, &mut out);
        }
        out
    }

    fn collect_paths(&self, node: u32, dir: LinkDir, juncs: &mut Vec<u8>, out: &mut Vec<LinkPath>) {
        if !juncs.is_empty() {
            let mut residual: Vec<u32> = self.counts_of(node).to_vec();
            for b in self.child_bases(node) {
                let child = self.child(node, b).unwrap();
                for (r, &c) in residual.iter_mut().zip(self.counts_of(child)) {
                    *r = r.saturating_sub(c);
                }
            }
            if residual.iter().any(|&r| r > 0) {
                out.push(LinkPath {
                    dir,
                    juncs: juncs.clone(),
                    counts: residual,
                });
            }
        }
        for b in self.child_bases(node) {
            let child = self.child(node, b).unwrap();
            juncs.push(self.nodes[child as usize].base);
            self.collect_paths(child, dir, juncs, out);
            juncs.pop();
        }
    }

    /// Total number of emitted paths and junction bytes, for headers.
    pub fn path_totals(&self) -> (u64, u64) {
        let mut num_paths = 0u64;
        let mut path_bytes = 0u64;
        for &handle in self.handles().iter() {
            for path in self.paths_for(handle) {
                num_paths += 1;
                path_bytes += path.juncs.len() as u64;
            }
        }
        (num_paths, path_bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = LinkStore::new(1);
        assert_eq!(store.num_kmers_with_links(), 0);
        assert_eq!(store.root(7, LinkDir::Fwd), None);
    }

    #[test]
    fn test_single_path() {
        let mut store = LinkStore::new(1);
        store.add_read_path(7, LinkDir::Fwd, &[2], 0);
        assert_eq!(store.num_kmers_with_links(), 1);
        let paths = store.paths_for(7);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].juncs, vec![2]);
        assert_eq!(paths[0].counts, vec![1]);
    }

    #[test]
    fn test_prefix_counts_are_cumulative() {
        let mut store = LinkStore::new(1);
        // Three reads: two stop after AC, one continues to ACG.
        store.add_read_path(3, LinkDir::Fwd, &[0, 1], 0);
        store.add_read_path(3, LinkDir::Fwd, &[0, 1], 0);
        store.add_read_path(3, LinkDir::Fwd, &[0, 1, 2], 0);
        let root = store.root(3, LinkDir::Fwd).unwrap();
        let a = store.child(root, 0).unwrap();
        let c = store.child(a, 1).unwrap();
        let g = store.child(c, 2).unwrap();
        assert_eq!(store.count_total(a), 3);
        assert_eq!(store.count_total(c), 3);
        assert_eq!(store.count_total(g), 1);
        assert_eq!(store.trie_coverage(root), 3);

        // Residual paths: AC x2 and ACG x1.
        let mut paths = store.paths_for(3);
        paths.sort_by_key(|p| p.juncs.len());
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].juncs, vec![0, 1]);
        assert_eq!(paths[0].counts, vec![2]);
        assert_eq!(paths[1].juncs, vec![0, 1, 2]);
        assert_eq!(paths[1].counts, vec![1]);
    }

    #[test]
    fn test_residual_roundtrip() {
        let mut store = LinkStore::new(2);
        store.add_read_path(1, LinkDir::Fwd, &[3, 0], 0);
        store.add_read_path(1, LinkDir::Fwd, &[3], 1);
        store.add_read_path(1, LinkDir::Rev, &[2], 0);

        let mut rebuilt = LinkStore::new(2);
        for path in store.paths_for(1) {
            rebuilt.add_path_counts(1, path.dir, &path.juncs, &path.counts);
        }
        let mut a = store.paths_for(1);
        let mut b = rebuilt.paths_for(1);
        let key = |p: &LinkPath| (p.dir.index(), p.juncs.clone());
        a.sort_by_key(key);
        b.sort_by_key(key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_depth_follows_parents() {
        let mut store = LinkStore::new(1);
        store.add_read_path(9, LinkDir::Fwd, &[0, 1, 2], 0);
        let root = store.root(9, LinkDir::Fwd).unwrap();
        let a = store.child(root, 0).unwrap();
        let c = store.child(a, 1).unwrap();
        let g = store.child(c, 2).unwrap();
        assert_eq!(store.depth(root), 0);
        assert_eq!(store.depth(g), 3);
        assert_eq!(store.parent(g), Some(c));
        assert_eq!(store.parent(root), None);
    }

    #[test]
    fn test_directions_are_independent() {
        let mut store = LinkStore::new(1);
        store.add_read_path(5, LinkDir::Fwd, &[1], 0);
        assert!(store.root(5, LinkDir::Fwd).is_some());
        assert!(store.root(5, LinkDir::Rev).is_none());
    }
}
