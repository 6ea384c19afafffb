//! The colored de Bruijn graph engine: kmer codec, hash table, colored
//! node store, builder, cleaner, and the binary `.ctx` format.

pub mod builder;
pub mod cleaner;
pub mod format;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod hash_table;
pub mod kmer;
pub mod node_store;

pub use graph::{ColorInfo, Graph, GraphInfo, OrientedNode};
pub use kmer::{BinaryKmer, Orientation};
pub use node_store::ColorMask;

use crate::error::CtxError;

/// Bits of memory one bucket costs: key words plus per-color edge and
/// coverage bytes.
pub fn bits_per_kmer(words: usize, num_colors: usize) -> u64 {
    (words as u64) * 64 + (num_colors as u64) * 16
}

/// Derive a hash-table capacity from a memory budget or an explicit kmer
/// count. At least one of the two must be given; an explicit count wins.
pub fn kmers_in_hash(
    memory_bytes: Option<u64>,
    nkmers: Option<u64>,
    words: usize,
    num_colors: usize,
) -> Result<u64, CtxError> {
    if let Some(n) = nkmers {
        if n == 0 {
            return Err(CtxError::InvalidInput("-n must be non-zero".to_string()));
        }
        return Ok(n);
    }
    let mem = memory_bytes.ok_or_else(|| {
        CtxError::InvalidInput("give a memory budget (-m) or a kmer count (-n)".to_string())
    })?;
    let capacity = mem * 8 / bits_per_kmer(words, num_colors);
    if capacity == 0 {
        return Err(CtxError::CapacityExceeded);
    }
    Ok(capacity)
}
