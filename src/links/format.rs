//! Link file (`.ctp.gz`) reader and writer.
//!
//! A gzip-compressed text stream: a `key: value` header block, a blank
//! line, then one block per kmer —
//!
//! ```text
//! <canonical-kmer> <num_paths>
//! [F|R] <num_juncs> <counts_per_color> <junction_string>
//! ```
//!
//! Counts are comma-separated per color and carry the residual reads of
//! each path (reads whose junction sequence ended exactly there);
//! loading adds them back along the whole path, which reconstructs the
//! cumulative totals exactly. Kmer blocks appear in bucket order.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::error::CtxError;
use crate::graph::graph::Graph;
use crate::graph::kmer::{decode_base, encode_base, BinaryKmer};
use crate::links::store::{LinkDir, LinkStore};

/// Provenance recorded in a link file header.
#[derive(Debug, Clone)]
pub struct LinkHeader {
    pub kmer_size: usize,
    pub num_colors: usize,
    pub command: String,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write a link store as gzip-compressed text into `sink`.
pub fn write_links<const W: usize, Out: Write>(
    graph: &Graph<W>,
    store: &LinkStore,
    command: &str,
    sink: Out,
) -> Result<(), CtxError> {
    let mut out = GzEncoder::new(sink, Compression::default());

    let (num_paths, path_bytes) = store.path_totals();
    writeln!(out, "format: ctp")?;
    writeln!(out, "version: 1")?;
    writeln!(out, "generated_by: mccortex-rs {}", crate::VERSION)?;
    writeln!(out, "command: {command}")?;
    writeln!(out, "kmer_size: {}", graph.k())?;
    writeln!(out, "num_colors: {}", store.num_colors())?;
    writeln!(out, "num_kmers_with_paths: {}", store.num_kmers_with_links())?;
    writeln!(out, "num_paths: {num_paths}")?;
    writeln!(out, "path_bytes: {path_bytes}")?;
    writeln!(out)?;

    for handle in store.handles() {
        let paths = store.paths_for(handle);
        if paths.is_empty() {
            continue;
        }
        let kmer = graph.node_kmer(handle);
        writeln!(out, "{} {}", kmer.to_dna_string(graph.k()), paths.len())?;
        for p in &paths {
            let counts = p
                .counts
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let juncs: String = p.juncs.iter().map(|&b| decode_base(b) as char).collect();
            writeln!(out, "{} {} {} {}", p.dir.as_char(), p.juncs.len(), counts, juncs)?;
        }
    }
    out.finish()?.flush()?;
    info!(paths = num_paths, "links written");
    Ok(())
}

/// Write a link store to a `.ctp.gz` file path.
pub fn write_links_file<const W: usize>(
    graph: &Graph<W>,
    store: &LinkStore,
    command: &str,
    path: &Path,
) -> Result<(), CtxError> {
    let sink = BufWriter::new(File::create(path)?);
    write_links(graph, store, command, sink)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

fn format_err(path: &Path, line_no: usize, msg: &str) -> CtxError {
    CtxError::Format(format!("{}:{}: {}", path.display(), line_no, msg))
}

/// Load a `.ctp.gz` file into a store, resolving each kmer against the
/// graph. The file's kmer size must match; every kmer must already be
/// present in the graph.
pub fn load_links<const W: usize>(
    path: &Path,
    graph: &Graph<W>,
    store: &mut LinkStore,
) -> Result<LinkHeader, CtxError> {
    let (reader, _format) = niffler::send::from_path(path)
        .map_err(|e| CtxError::Format(format!("cannot open {}: {e}", path.display())))?;
    let reader = BufReader::new(reader);

    let mut header = LinkHeader {
        kmer_size: 0,
        num_colors: 0,
        command: String::new(),
    };
    let mut in_header = true;
    let mut pending_paths = 0usize;
    let mut cur_handle = 0u64;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            if in_header && !line.starts_with('#') {
                in_header = false;
            }
            continue;
        }

        if in_header {
            let Some((key, value)) = line.split_once(':') else {
                return Err(format_err(path, line_no, "malformed header line"));
            };
            let value = value.trim();
            match key.trim() {
                "kmer_size" => {
                    header.kmer_size = value
                        .parse()
                        .map_err(|_| format_err(path, line_no, "bad kmer_size"))?;
                }
                "num_colors" => {
                    header.num_colors = value
                        .parse()
                        .map_err(|_| format_err(path, line_no, "bad num_colors"))?;
                }
                "command" => header.command = value.to_string(),
                _ => {}
            }
            continue;
        }

        if pending_paths == 0 {
            // A kmer block line: "<kmer> <num_paths>".
            let mut parts = line.split_ascii_whitespace();
            let kmer_str = parts
                .next()
                .ok_or_else(|| format_err(path, line_no, "missing kmer"))?;
            let npaths: usize = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| format_err(path, line_no, "missing path count"))?;
            if kmer_str.len() != graph.k() {
                return Err(CtxError::InvalidInput(format!(
                    "{}: link kmer size {} does not match graph kmer size {}",
                    path.display(),
                    kmer_str.len(),
                    graph.k()
                )));
            }
            let kmer = BinaryKmer::<W>::from_seq(kmer_str.as_bytes(), graph.k())?;
            if kmer.canonical(graph.k()) != kmer {
                return Err(format_err(path, line_no, "link kmer is not canonical"));
            }
            cur_handle = graph.find(&kmer).ok_or_else(|| {
                format_err(path, line_no, "link kmer is not present in the graph")
            })?;
            pending_paths = npaths;
            continue;
        }

        // A path line: "[F|R] <num_juncs> <counts_per_color> <juncs>".
        pending_paths -= 1;
        let mut parts = line.split_ascii_whitespace();
        let dir = parts
            .next()
            .and_then(|s| s.chars().next())
            .and_then(LinkDir::from_char)
            .ok_or_else(|| format_err(path, line_no, "bad direction"))?;
        let num_juncs: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| format_err(path, line_no, "bad junction count"))?;
        let counts = parts
            .next()
            .ok_or_else(|| format_err(path, line_no, "missing counts"))?
            .split(',')
            .map(|c| c.parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| format_err(path, line_no, "bad counts"))?;
        if counts.len() != store.num_colors() {
            return Err(format_err(path, line_no, "counts do not match color count"));
        }
        let junc_str = parts
            .next()
            .ok_or_else(|| format_err(path, line_no, "missing junction string"))?;
        if junc_str.len() != num_juncs {
            return Err(format_err(path, line_no, "junction count mismatch"));
        }
        let juncs = junc_str
            .bytes()
            .map(|b| encode_base(b).ok_or_else(|| format_err(path, line_no, "bad junction base")))
            .collect::<Result<Vec<u8>, _>>()?;
        store.add_path_counts(cur_handle, dir, &juncs, &counts);
    }

    if pending_paths > 0 {
        return Err(CtxError::Format(format!(
            "{} ended inside a kmer block",
            path.display()
        )));
    }
    if header.kmer_size != graph.k() {
        return Err(CtxError::InvalidInput(format!(
            "{}: header kmer size {} does not match graph kmer size {}",
            path.display(),
            header.kmer_size,
            graph.k()
        )));
    }
    info!(path = %path.display(), "links loaded");
    Ok(header)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
