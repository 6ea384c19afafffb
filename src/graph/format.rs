//! Binary graph file (`.ctx`) reader and writer.
//!
//! Layout, all multi-byte fields little-endian:
//!
//! ```text
//! header:  magic "CORTEX", u32 version, u32 kmer_size,
//!          u32 words_per_kmer, u32 num_colors, u32 mean_read_length,
//!          u64 total_sequence,
//!          per color: NUL-terminated sample name, u32 error_rate(x1e16),
//!                     u8 cleaned_tips, u8 cleaned_unitigs,
//!                     u32 unitig_cutoff, u32 unitig_kmer_cutoff
//! body:    records { kmer_words: u64[words_per_kmer],
//!                    covg: u32[num_colors], edges: u8[num_colors] }
//! footer:  magic "CORTEX"
//! ```
//!
//! Records carry no hash positions: the writer emits live buckets in
//! bucket order, and a loader re-inserts every record into its own
//! table, optionally projecting file colors onto different in-memory
//! colors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::CtxError;
use crate::graph::graph::{ColorInfo, Graph};
use crate::graph::kmer::{validate_kmer_size, words_for_k, BinaryKmer};
use crate::graph::node_store::COVG_MAX;

const MAGIC: &[u8; 6] = b"CORTEX";
const FORMAT_VERSION: u32 = 6;

// ---------------------------------------------------------------------------
// Little-endian primitives
// ---------------------------------------------------------------------------

fn write_u32<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, CtxError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, CtxError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_cstring<R: Read>(r: &mut R) -> Result<String, CtxError> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        if bytes.len() > 4096 {
            return Err(CtxError::Format(
                "unterminated sample name in graph header".to_string(),
            ));
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes)
        .map_err(|_| CtxError::Format("sample name is not valid UTF-8".to_string()))
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Parsed `.ctx` header.
#[derive(Debug, Clone)]
pub struct GraphHeader {
    pub version: u32,
    pub kmer_size: u32,
    pub words_per_kmer: u32,
    pub mean_read_length: u32,
    pub total_sequence: u64,
    pub colors: Vec<ColorInfo>,
}

impl GraphHeader {
    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<(), CtxError> {
        w.write_all(MAGIC)?;
        write_u32(w, self.version)?;
        write_u32(w, self.kmer_size)?;
        write_u32(w, self.words_per_kmer)?;
        write_u32(w, self.colors.len() as u32)?;
        write_u32(w, self.mean_read_length)?;
        write_u64(w, self.total_sequence)?;
        for color in &self.colors {
            w.write_all(color.sample_name.as_bytes())?;
            w.write_all(&[0u8])?;
            write_u32(w, color.error_rate)?;
            w.write_all(&[color.cleaned_tips as u8, color.cleaned_unitigs as u8])?;
            write_u32(w, color.unitig_cutoff)?;
            write_u32(w, color.unitig_kmer_cutoff)?;
        }
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> Result<Self, CtxError> {
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CtxError::Format("bad graph file magic".to_string()));
        }
        let version = read_u32(r)?;
        if version != FORMAT_VERSION {
            return Err(CtxError::Format(format!(
                "unsupported graph format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let kmer_size = read_u32(r)?;
        validate_kmer_size(kmer_size as usize)?;
        let words_per_kmer = read_u32(r)?;
        if words_per_kmer as usize != words_for_k(kmer_size as usize) {
            return Err(CtxError::Format(format!(
                "words_per_kmer {} inconsistent with kmer size {}",
                words_per_kmer, kmer_size
            )));
        }
        let num_colors = read_u32(r)?;
        if num_colors == 0 || num_colors > 64 {
            return Err(CtxError::Format(format!(
                "color count {num_colors} out of range [1, 64]"
            )));
        }
        let mean_read_length = read_u32(r)?;
        let total_sequence = read_u64(r)?;
        let mut colors = Vec::with_capacity(num_colors as usize);
        for _ in 0..num_colors {
            let sample_name = read_cstring(r)?;
            let error_rate = read_u32(r)?;
            let mut flags = [0u8; 2];
            r.read_exact(&mut flags)?;
            let unitig_cutoff = read_u32(r)?;
            let unitig_kmer_cutoff = read_u32(r)?;
            colors.push(ColorInfo {
                sample_name,
                error_rate,
                cleaned_tips: flags[0] != 0,
                cleaned_unitigs: flags[1] != 0,
                unitig_cutoff,
                unitig_kmer_cutoff,
            });
        }
        Ok(Self {
            version,
            kmer_size,
            words_per_kmer,
            mean_read_length,
            total_sequence,
            colors,
        })
    }
}

/// Read just the header of a graph file (for sizing and validation).
pub fn peek_header(path: &Path) -> Result<GraphHeader, CtxError> {
    let mut reader = BufReader::new(File::open(path)?);
    GraphHeader::read(&mut reader)
}

/// Number of kmer records in a graph file, derived from its size.
pub fn estimate_kmers(path: &Path) -> Result<u64, CtxError> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = GraphHeader::read(&mut reader)?;
    let header_len = reader.stream_position()?;
    let file_len = std::fs::metadata(path)?.len();
    let rec_len = header.words_per_kmer as u64 * 8 + header.num_colors() as u64 * 5;
    let body = file_len
        .checked_sub(header_len + MAGIC.len() as u64)
        .ok_or_else(|| CtxError::Format(format!("graph file {} is truncated", path.display())))?;
    Ok(body / rec_len)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write a graph to `out`, all colors, live buckets in bucket order.
///
/// Returns the number of records written.
pub fn write_graph<const W: usize, Wr: Write>(
    graph: &Graph<W>,
    out: &mut Wr,
) -> Result<u64, CtxError> {
    let header = GraphHeader {
        version: FORMAT_VERSION,
        kmer_size: graph.k() as u32,
        words_per_kmer: W as u32,
        mean_read_length: graph.info.mean_read_length,
        total_sequence: graph.info.total_sequence,
        colors: graph.info.colors.clone(),
    };
    header.write(out)?;

    let ncols = graph.num_colors();
    let mut written = 0u64;
    for (handle, kmer) in graph.table().iter() {
        for &word in kmer.words() {
            write_u64(out, word)?;
        }
        for c in 0..ncols {
            write_u32(out, graph.store().covg(handle, c) as u32)?;
        }
        for c in 0..ncols {
            out.write_all(&[graph.store().edges(handle, c)])?;
        }
        written += 1;
    }
    out.write_all(MAGIC)?;
    out.flush()?;
    Ok(written)
}

/// Write a graph to a file path.
pub fn write_graph_file<const W: usize>(graph: &Graph<W>, path: &Path) -> Result<u64, CtxError> {
    let mut out = BufWriter::new(File::create(path)?);
    let n = write_graph(graph, &mut out)?;
    info!(kmers = n, path = %path.display(), "graph written");
    Ok(n)
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Color projection applied while loading.
#[derive(Debug, Clone)]
pub struct LoadFilter {
    /// `(file_color, target_color)` pairs; file colors not listed are
    /// skipped.
    pub from_into: Vec<(usize, usize)>,
    /// Zero the target colors before loading instead of merging.
    pub empty_colors: bool,
}

impl LoadFilter {
    /// Load every file color into the same-numbered target color.
    pub fn identity(num_colors: usize) -> Self {
        Self {
            from_into: (0..num_colors).map(|c| (c, c)).collect(),
            empty_colors: false,
        }
    }

    /// Load the listed file colors into targets starting at `base`.
    pub fn offset(file_colors: &[usize], base: usize) -> Self {
        Self {
            from_into: file_colors
                .iter()
                .enumerate()
                .map(|(i, &from)| (from, base + i))
                .collect(),
            empty_colors: false,
        }
    }
}

/// Totals reported by a graph load.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadSummary {
    pub kmers_loaded: u64,
    pub kmers_novel: u64,
}

/// Load a `.ctx` file into an allocated graph through a color filter.
///
/// Existing target colors are merged — OR on edges, saturating add on
/// coverage — unless the filter asks for them to be emptied first. The
/// file's kmer size must match the graph's exactly.
pub fn load_graph_into<const W: usize>(
    path: &Path,
    graph: &mut Graph<W>,
    filter: &LoadFilter,
) -> Result<LoadSummary, CtxError> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = GraphHeader::read(&mut reader)?;

    if header.kmer_size as usize != graph.k() {
        return Err(CtxError::InvalidInput(format!(
            "graph file {} has kmer size {}, expected {}",
            path.display(),
            header.kmer_size,
            graph.k()
        )));
    }
    for &(from, into) in &filter.from_into {
        if from >= header.num_colors() {
            return Err(CtxError::InvalidInput(format!(
                "file color {from} out of range (file has {} colors)",
                header.num_colors()
            )));
        }
        if into >= graph.num_colors() {
            return Err(CtxError::InvalidInput(format!(
                "target color {into} out of range (graph has {} colors)",
                graph.num_colors()
            )));
        }
    }

    if filter.empty_colors {
        for &(_, into) in &filter.from_into {
            graph.store().clear_color(graph.capacity(), into);
        }
    }

    // Merge header metadata into the targeted colors.
    for &(from, into) in &filter.from_into {
        let file_color = &header.colors[from];
        let target = &mut graph.info.colors[into];
        if target.sample_name.is_empty() {
            target.sample_name = file_color.sample_name.clone();
        }
        target.cleaned_tips |= file_color.cleaned_tips;
        target.cleaned_unitigs |= file_color.cleaned_unitigs;
        target.unitig_cutoff = target.unitig_cutoff.max(file_color.unitig_cutoff);
        target.unitig_kmer_cutoff = target.unitig_kmer_cutoff.max(file_color.unitig_kmer_cutoff);
        target.error_rate = target.error_rate.max(file_color.error_rate);
    }
    graph
        .info
        .merge_totals(header.mean_read_length, header.total_sequence);

    let file_cols = header.num_colors();
    let mut summary = LoadSummary::default();
    let mut covgs = vec![0u32; file_cols];
    let mut edges = vec![0u8; file_cols];
    let mut words = [0u64; W];

    // Records are fixed width, so the record count falls out of the file
    // size; the trailing magic is then verified explicitly.
    let rec_len = W * 8 + file_cols * 5;
    let header_len = reader.stream_position()?;
    let file_len = std::fs::metadata(path)?.len();
    let body_len = file_len
        .checked_sub(header_len + MAGIC.len() as u64)
        .ok_or_else(|| CtxError::Format(format!("graph file {} is truncated", path.display())))?;
    if body_len % rec_len as u64 != 0 {
        return Err(CtxError::Format(format!(
            "graph file {} body is not a whole number of records",
            path.display()
        )));
    }
    let num_records = body_len / rec_len as u64;

    let mut rec = vec![0u8; rec_len];
    for _ in 0..num_records {
        reader.read_exact(&mut rec).map_err(|_| {
            CtxError::Format(format!("graph file {} has a truncated record", path.display()))
        })?;

        let mut off = 0usize;
        for w in words.iter_mut() {
            *w = u64::from_le_bytes(rec[off..off + 8].try_into().unwrap());
            off += 8;
        }
        for c in covgs.iter_mut() {
            *c = u32::from_le_bytes(rec[off..off + 4].try_into().unwrap());
            off += 4;
        }
        for e in edges.iter_mut() {
            *e = rec[off];
            off += 1;
        }

        let kmer = BinaryKmer::<W>::from_words(words);
        if kmer.canonical(graph.k()) != kmer {
            return Err(CtxError::Format(format!(
                "graph file {} contains a non-canonical kmer",
                path.display()
            )));
        }
        let (handle, novel) = graph.table().find_or_insert(&kmer)?;
        summary.kmers_loaded += 1;
        if novel {
            summary.kmers_novel += 1;
        }
        for &(from, into) in &filter.from_into {
            let covg = covgs[from].min(COVG_MAX as u32) as u8;
            if covg > 0 {
                graph.store().covg_add(handle, into, covg);
            }
            if edges[from] != 0 {
                graph.store().edges_or(handle, into, edges[from]);
            }
        }
    }

    let mut footer = [0u8; 6];
    reader.read_exact(&mut footer)?;
    if &footer != MAGIC {
        return Err(CtxError::Format(format!(
            "graph file {} has a bad footer",
            path.display()
        )));
    }

    info!(
        kmers = summary.kmers_loaded,
        novel = summary.kmers_novel,
        path = %path.display(),
        "graph loaded"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Path specs ("graph.ctx:0,2")
// ---------------------------------------------------------------------------

/// Split an input spec into a path and an optional file-color list.
pub fn parse_graph_spec(spec: &str) -> Result<(PathBuf, Option<Vec<usize>>), CtxError> {
    match spec.rsplit_once(':') {
        Some((path, cols)) if !cols.is_empty() && cols.bytes().all(|b| b.is_ascii_digit() || b == b',') => {
            let colors = cols
                .split(',')
                .map(|c| {
                    c.parse::<usize>().map_err(|_| {
                        CtxError::InvalidInput(format!("bad color list in {spec:?}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((PathBuf::from(path), Some(colors)))
        }
        _ => Ok((PathBuf::from(spec), None)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};

    const K: usize = 5;

    fn sample_graph() -> Graph<1> {
        let mut graph = Graph::new(K, 2, 256).unwrap();
        graph.info.colors[0].sample_name = "alpha".to_string();
        graph.info.colors[1].sample_name = "beta".to_string();
        let stats = LoadStats::default();
        load_read(&graph, b"ACGTAGCCATT", 0, false, &stats).unwrap();
        load_read(&graph, b"ACGTAGTTCAA", 1, false, &stats).unwrap();
        graph.info.mean_read_length = 11;
        graph.info.total_sequence = 22;
        graph
    }

    fn record_set<const W: usize>(graph: &Graph<W>) -> Vec<(String, Vec<u8>, Vec<u8>)> {
        let mut records: Vec<(String, Vec<u8>, Vec<u8>)> = graph
            .table()
            .iter()
            .map(|(h, km)| {
                let covgs = (0..graph.num_colors())
                    .map(|c| graph.store().covg(h, c))
                    .collect();
                let edges = (0..graph.num_colors())
                    .map(|c| graph.store().edges(h, c))
                    .collect();
                (km.to_dna_string(graph.k()), covgs, edges)
            })
            .collect();
        records.sort();
        records
    }

    #[test]
    fn test_roundtrip_preserves_state() {
        let graph = sample_graph();
        let mut buf = Vec::new();
        let written = write_graph(&graph, &mut buf).unwrap();
        assert_eq!(written, graph.num_kmers());

        let mut loaded = Graph::<1>::new(K, 2, 256).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ctx");
        std::fs::write(&path, &buf).unwrap();
        let summary = load_graph_into(&path, &mut loaded, &LoadFilter::identity(2)).unwrap();
        assert_eq!(summary.kmers_loaded, graph.num_kmers());
        assert_eq!(summary.kmers_novel, graph.num_kmers());

        assert_eq!(record_set(&graph), record_set(&loaded));
        assert_eq!(loaded.info.colors[0].sample_name, "alpha");
        assert_eq!(loaded.info.mean_read_length, 11);
        assert_eq!(loaded.info.total_sequence, 22);

        // Write the loaded copy again: identical modulo record order.
        let mut buf2 = Vec::new();
        write_graph(&loaded, &mut buf2).unwrap();
        assert_eq!(buf.len(), buf2.len());
    }

    #[test]
    fn test_color_projection_merges() {
        let graph = sample_graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ctx");
        {
            let mut out = BufWriter::new(File::create(&path).unwrap());
            write_graph(&graph, &mut out).unwrap();
        }

        // Project both file colors into color 0 of a 1-color graph.
        let mut merged = Graph::<1>::new(K, 1, 256).unwrap();
        let filter = LoadFilter {
            from_into: vec![(0, 0), (1, 0)],
            empty_colors: false,
        };
        load_graph_into(&path, &mut merged, &filter).unwrap();

        for (h, km) in graph.table().iter() {
            let mh = merged.find(&km).unwrap();
            let expect_covg = (graph.store().covg(h, 0) as u32
                + graph.store().covg(h, 1) as u32)
                .min(COVG_MAX as u32) as u8;
            assert_eq!(merged.store().covg(mh, 0), expect_covg);
            let expect_edges = graph.store().edges(h, 0) | graph.store().edges(h, 1);
            assert_eq!(merged.store().edges(mh, 0), expect_edges);
        }
    }

    #[test]
    fn test_kmer_size_mismatch_rejected() {
        let graph = sample_graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ctx");
        {
            let mut out = BufWriter::new(File::create(&path).unwrap());
            write_graph(&graph, &mut out).unwrap();
        }
        let mut other = Graph::<1>::new(7, 2, 256).unwrap();
        let err = load_graph_into(&path, &mut other, &LoadFilter::identity(2)).unwrap_err();
        assert!(matches!(err, CtxError::InvalidInput(_)));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let graph = sample_graph();
        let mut buf = Vec::new();
        write_graph(&graph, &mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ctx");
        std::fs::write(&path, &buf).unwrap();
        let mut loaded = Graph::<1>::new(K, 2, 256).unwrap();
        let err = load_graph_into(&path, &mut loaded, &LoadFilter::identity(2)).unwrap_err();
        assert!(matches!(err, CtxError::Format(_)));
    }

    #[test]
    fn test_parse_graph_spec() {
        let (path, cols) = parse_graph_spec("a/b.ctx").unwrap();
        assert_eq!(path, PathBuf::from("a/b.ctx"));
        assert!(cols.is_none());
        let (path, cols) = parse_graph_spec("a/b.ctx:0,2").unwrap();
        assert_eq!(path, PathBuf::from("a/b.ctx"));
        assert_eq!(cols, Some(vec![0, 2]));
    }
}
