//! Link (junction-choice) storage, construction, cleaning, threshold
//! selection, and the text `.ctp.gz` format.

pub mod builder;
pub mod cleaner;
pub mod format;
pub mod store;
pub mod threshold;

pub use store::{LinkDir, LinkPath, LinkStore};

use crate::error::CtxError;
use crate::graph::graph::{Graph, OrientedNode};
use crate::graph::node_store::ColorMask;

/// Verify every stored link against the graph.
///
/// Each trie must be anchored at a branching kmer, and every path must
/// spell junction choices that walk real edges: from the anchor, each
/// recorded base must be an available successor at a branch, with
/// non-branching stretches following their unique successor.
pub fn check_links<const W: usize>(graph: &Graph<W>, store: &LinkStore) -> Result<(), CtxError> {
    let mask = graph.all_colors();
    for handle in store.handles() {
        for path in store.paths_for(handle) {
            let anchor = OrientedNode::new(handle, path.dir.to_orientation());
            if graph.out_degree(anchor, mask) < 2 {
                return Err(CtxError::Format(format!(
                    "link anchored at non-branching kmer {}",
                    graph.node_kmer(handle).to_dna_string(graph.k())
                )));
            }
            check_one_path(graph, anchor, &path.juncs, mask)?;
        }
    }
    Ok(())
}

fn check_one_path<const W: usize>(
    graph: &Graph<W>,
    anchor: OrientedNode,
    juncs: &[u8],
    mask: ColorMask,
) -> Result<(), CtxError> {
    // Generous bound on non-branching stretches between junctions.
    const MAX_STEPS: usize = 100_000;
    let mut node = anchor;
    let mut next_junc = 0usize;
    for _ in 0..MAX_STEPS {
        if next_junc == juncs.len() {
            return Ok(());
        }
        let bits = graph.successor_bits(node, mask);
        let step_base = match bits.count_ones() {
            0 => {
                return Err(CtxError::Format(
                    "link path runs past a dead end".to_string(),
                ))
            }
            1 => bits.trailing_zeros() as u8,
            _ => {
                let b = juncs[next_junc];
                if bits & (1 << b) == 0 {
                    return Err(CtxError::Format(
                        "link junction choice is not an edge".to_string(),
                    ));
                }
                next_junc += 1;
                b
            }
        };
        node = graph.step(node, step_base).ok_or_else(|| {
            CtxError::Format("link path steps to a missing kmer".to_string())
        })?;
    }
    Err(CtxError::Format(
        "link path exceeds the verification step bound".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};
    use crate::links::builder::{apply_observations, observe_read, ThreadStats};

    const K: usize = 5;

    #[test]
    fn test_built_links_pass_checks() {
        let graph: Graph<1> = Graph::new(K, 1, 1024).unwrap();
        let stats = LoadStats::default();
        for seq in [&b"ACGTAGCCATT"[..], &b"ACGTAGTTACG"[..], &b"TTGTAGCCATT"[..]] {
            load_read(&graph, seq, 0, false, &stats).unwrap();
        }
        let mut store = LinkStore::new(1);
        let tstats = ThreadStats::default();
        let mut obs = Vec::new();
        for seq in [&b"ACGTAGCCATT"[..], &b"ACGTAGTTACG"[..], &b"TTGTAGCCATT"[..]] {
            observe_read(&graph, seq, ColorMask::ALL, &tstats, &mut obs);
        }
        apply_observations(&mut store, 0, &obs);
        assert!(store.num_kmers_with_links() > 0);
        check_links(&graph, &store).unwrap();
    }

    #[test]
    fn test_bogus_link_fails_checks() {
        let graph: Graph<1> = Graph::new(K, 1, 1024).unwrap();
        let stats = LoadStats::default();
        load_read(&graph, b"ACGTAGCCATT", 0, false, &stats).unwrap();
        let handle = graph
            .find(&crate::graph::kmer::BinaryKmer::from_seq(b"CGTAG", K).unwrap())
            .unwrap();
        let mut store = LinkStore::new(1);
        store.add_read_path(handle, LinkDir::Fwd, &[0], 0);
        // CGTAG is not a branching kmer in this linear graph.
        assert!(check_links(&graph, &store).is_err());
    }
}
