//! Shared helpers for the integration suites.
#![allow(dead_code)]

use mccortex_rs::graph::builder::{load_read, LoadStats};
use mccortex_rs::graph::Graph;

pub const K: usize = 21;

/// Build a k=21 single-word graph from `(sequence, copies, color)` inputs.
pub fn build_graph(num_colors: usize, capacity: u64, inputs: &[(&[u8], usize, usize)]) -> Graph<1> {
    let graph = Graph::new(K, num_colors, capacity).expect("allocate graph");
    let stats = LoadStats::default();
    for (seq, copies, color) in inputs {
        for _ in 0..*copies {
            load_read(&graph, seq, *color, false, &stats).expect("load read");
        }
    }
    graph
}

/// All stored kmer strings, sorted.
pub fn kmer_strings(graph: &Graph<1>) -> Vec<String> {
    let mut kmers: Vec<String> = graph
        .table()
        .iter()
        .map(|(_, km)| km.to_dna_string(K))
        .collect();
    kmers.sort();
    kmers
}
