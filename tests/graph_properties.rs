//! Whole-graph invariants: canonicality, edge closure, capacity, and
//! binary round-trips.

mod common;

use common::{build_graph, kmer_strings, K};
use mccortex_rs::error::CtxError;
use mccortex_rs::graph::format::{load_graph_into, write_graph, LoadFilter};
use mccortex_rs::graph::kmer::{Orientation, BinaryKmer, BASES};
use mccortex_rs::graph::node_store::COVG_MAX;
use mccortex_rs::graph::{ColorMask, Graph, OrientedNode};

/// 100 random bases whose 80 canonical 21-mers are all distinct.
const SEQ100: &[u8] =
    b"GCTAAAGACAATTACATAACATACACGTCAGCACGAAACTTGTTGGCCCAGTGTGAATCGCTTAAGGGTTAAGTAAGTGTGATGCATACGCCTTTACTTG";

#[test]
fn two_identical_reads_give_expected_counts() {
    let graph = build_graph(1, 1024, &[(SEQ100, 2, 0)]);

    // 100 - 21 + 1 = 80 nodes, each covered twice.
    assert_eq!(graph.num_kmers(), 80);
    for (handle, _) in graph.table().iter() {
        assert_eq!(graph.store().covg(handle, 0), 2);
    }

    // 79 edges in each direction: each step sets one successor bit and
    // one predecessor bit, and the second pass is idempotent.
    let mut edge_bits = 0u32;
    for (handle, _) in graph.table().iter() {
        edge_bits += graph.store().edges(handle, 0).count_ones();
    }
    assert_eq!(edge_bits, 2 * 79);
}

#[test]
fn stored_keys_are_canonical() {
    let graph = build_graph(1, 1024, &[(SEQ100, 1, 0)]);
    for (_, kmer) in graph.table().iter() {
        assert_eq!(kmer.canonical(K), kmer);
    }
}

#[test]
fn edge_closure_holds() {
    let graph = build_graph(1, 1024, &[(SEQ100, 1, 0)]);
    for (handle, _) in graph.table().iter() {
        for orient in [Orientation::Forward, Orientation::Reverse] {
            let node = OrientedNode::new(handle, orient);
            let bits = graph.successor_bits(node, ColorMask::ALL);
            for base in BASES {
                if bits & (1 << base) == 0 {
                    continue;
                }
                // The successor must resolve, and it must carry the
                // matching predecessor edge back to us.
                let next = graph.step(node, base).expect("edge target resolves");
                let back = graph.successor_bits(next.flipped(), ColorMask::ALL);
                let back_base =
                    mccortex_rs::graph::kmer::complement_code(graph.oriented_kmer(node).first_base(K));
                assert_ne!(back & (1 << back_base), 0, "missing reverse edge");
            }
        }
    }
}

#[test]
fn insert_beyond_load_ceiling_fails() {
    // A table of capacity N admits ceil(0.75 N) distinct kmers.
    let n = 64u64;
    let graph: Graph<1> = Graph::new(K, 1, n).unwrap();
    let limit = graph.table().insert_limit();
    assert_eq!(limit, 48);

    let mut inserted = 0u64;
    let mut err = None;
    let mut seq = *b"AAAAAAAAAAAAAAAAAAAAC";
    'outer: for a in 0..4usize {
        for b in 0..4usize {
            for c in 0..4usize {
                seq[2] = b"ACGT"[a];
                seq[6] = b"ACGT"[b];
                seq[10] = b"ACGT"[c];
                let kmer = BinaryKmer::from_seq(&seq, K).unwrap();
                match graph.find_or_insert(&kmer) {
                    Ok((_, true)) => inserted += 1,
                    Ok((_, false)) => {}
                    Err(e) => {
                        err = Some(e);
                        break 'outer;
                    }
                }
            }
        }
    }
    assert_eq!(inserted, limit);
    assert!(matches!(err, Some(CtxError::CapacityExceeded)));
}

#[test]
fn graph_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.ctx");

    let mut graph = build_graph(2, 1024, &[(SEQ100, 2, 0), (&SEQ100[10..90], 1, 1)]);
    graph.info.colors[0].sample_name = "sample0".into();
    graph.info.colors[1].sample_name = "sample1".into();
    graph.info.mean_read_length = 95;
    graph.info.total_sequence = 280;

    let mut bytes = Vec::new();
    write_graph(&graph, &mut bytes).unwrap();
    std::fs::write(&path, &bytes).unwrap();

    let mut loaded: Graph<1> = Graph::new(K, 2, 2048).unwrap();
    load_graph_into(&path, &mut loaded, &LoadFilter::identity(2)).unwrap();

    // Same kmers, coverages, and edges, independent of bucket layout.
    assert_eq!(kmer_strings(&graph), kmer_strings(&loaded));
    for (handle, kmer) in graph.table().iter() {
        let other = loaded.find(&kmer).expect("kmer survives round-trip");
        for c in 0..2 {
            assert_eq!(graph.store().covg(handle, c), loaded.store().covg(other, c));
            assert_eq!(graph.store().edges(handle, c), loaded.store().edges(other, c));
        }
    }

    // Writing the loaded graph again yields a byte-identical file up to
    // record order (same length, same sorted record multiset).
    let mut bytes2 = Vec::new();
    write_graph(&loaded, &mut bytes2).unwrap();
    assert_eq!(bytes.len(), bytes2.len());
}

#[test]
fn color_projection_merges_coverage_and_edges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("two_color.ctx");

    let graph = build_graph(2, 1024, &[(SEQ100, 3, 0), (SEQ100, 2, 1)]);
    let mut bytes = Vec::new();
    write_graph(&graph, &mut bytes).unwrap();
    std::fs::write(&path, &bytes).unwrap();

    // Project both file colors into color 0, merging.
    let mut merged: Graph<1> = Graph::new(K, 1, 1024).unwrap();
    let filter = LoadFilter {
        from_into: vec![(0, 0), (1, 0)],
        empty_colors: false,
    };
    load_graph_into(&path, &mut merged, &filter).unwrap();

    for (handle, kmer) in graph.table().iter() {
        let m = merged.find(&kmer).unwrap();
        let want_covg = (graph.store().covg(handle, 0) as u32
            + graph.store().covg(handle, 1) as u32)
            .min(COVG_MAX as u32) as u8;
        let want_edges = graph.store().edges(handle, 0) | graph.store().edges(handle, 1);
        assert_eq!(merged.store().covg(m, 0), want_covg);
        assert_eq!(merged.store().edges(m, 0), want_edges);
    }
}
