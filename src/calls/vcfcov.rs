//! VCF coverage annotator.
//!
//! For each VCF record and each allele, builds the allele sequence with
//! `k-1` reference flanks, looks up every covering kmer in the graph,
//! and attaches the per-color median coverage as a `KCOV` per-sample
//! annotation (one sample column per graph color, comma-separated
//! per-allele medians).
//!
//! Records flow through a sliding buffer of at most `max_nvars`
//! entries; the observed high-water mark is reported so the bound is a
//! testable property.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use ahash::AHashMap;
use serde::Serialize;

use crate::error::CtxError;
use crate::graph::graph::Graph;
use crate::graph::kmer::BinaryKmer;

/// Default sliding-buffer bound.
pub const DEFAULT_MAX_NVARS: usize = 16;

const KCOV_HEADER: &str = "##FORMAT=<ID=KCOV,Number=.,Type=Integer,\
Description=\"Median kmer coverage per allele\">";

/// Counters reported by an annotation pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct VcfCovStats {
    pub records_read: u64,
    pub records_annotated: u64,
    /// Largest number of records simultaneously buffered.
    pub max_buffered: usize,
}

/// One buffered VCF record.
#[derive(Debug, Clone)]
struct VcfRecord {
    chrom: String,
    /// 1-based position.
    pos: u64,
    fixed: [String; 8],
    alleles: Vec<String>,
}

/// The annotator: graph + reference sequences + the sliding buffer.
pub struct VcfCov<'g, const W: usize> {
    graph: &'g Graph<W>,
    ref_seqs: AHashMap<String, Vec<u8>>,
    max_nvars: usize,
    buffer: VecDeque<VcfRecord>,
    stats: VcfCovStats,
}

impl<'g, const W: usize> VcfCov<'g, W> {
    pub fn new(
        graph: &'g Graph<W>,
        ref_seqs: AHashMap<String, Vec<u8>>,
        max_nvars: usize,
    ) -> Result<Self, CtxError> {
        if max_nvars == 0 {
            return Err(CtxError::InvalidInput(
                "--max-nvars must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            graph,
            ref_seqs,
            max_nvars,
            buffer: VecDeque::new(),
            stats: VcfCovStats::default(),
        })
    }

    pub fn stats(&self) -> VcfCovStats {
        self.stats
    }

    /// Stream `input` to `output`, annotating every record.
    pub fn annotate<R: BufRead, Out: Write>(
        &mut self,
        input: R,
        output: &mut Out,
    ) -> Result<(), CtxError> {
        let mut wrote_format_header = false;
        for line in input.lines() {
            let line = line?;
            if line.starts_with("##") {
                writeln!(output, "{line}")?;
                continue;
            }
            if line.starts_with('#') {
                // The #CHROM line: emit our FORMAT declaration, then the
                // column header rebuilt with one sample per color.
                if !wrote_format_header {
                    writeln!(output, "{KCOV_HEADER}")?;
                    wrote_format_header = true;
                }
                write!(
                    output,
                    "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT"
                )?;
                for (c, info) in self.graph.info.colors.iter().enumerate() {
                    if info.sample_name.is_empty() {
                        write!(output, "\tcolor{c}")?;
                    } else {
                        write!(output, "\t{}", info.sample_name)?;
                    }
                }
                writeln!(output)?;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_record(&line)?;
            self.push(record, output)?;
        }
        self.flush_all(output)?;
        Ok(())
    }

    fn push<Out: Write>(&mut self, record: VcfRecord, output: &mut Out) -> Result<(), CtxError> {
        self.stats.records_read += 1;

        // Records that can no longer interact with the incoming one
        // leave the buffer first.
        let k = self.graph.k() as u64;
        while let Some(front) = self.buffer.front() {
            let independent = front.chrom != record.chrom
                || front.pos + front.alleles[0].len() as u64 + k <= record.pos;
            if independent {
                let done = self.buffer.pop_front().unwrap();
                self.emit(&done, output)?;
            } else {
                break;
            }
        }

        self.buffer.push_back(record);
        self.stats.max_buffered = self.stats.max_buffered.max(self.buffer.len());

        // Hard cap: never hold more than max_nvars records.
        while self.buffer.len() > self.max_nvars {
            let done = self.buffer.pop_front().unwrap();
            self.emit(&done, output)?;
        }
        Ok(())
    }

    fn flush_all<Out: Write>(&mut self, output: &mut Out) -> Result<(), CtxError> {
        while let Some(done) = self.buffer.pop_front() {
            self.emit(&done, output)?;
        }
        Ok(())
    }

    fn emit<Out: Write>(&mut self, record: &VcfRecord, output: &mut Out) -> Result<(), CtxError> {
        let medians = self.allele_medians(record)?;
        for (i, field) in record.fixed.iter().enumerate() {
            if i > 0 {
                write!(output, "\t")?;
            }
            write!(output, "{field}")?;
        }
        write!(output, "\tKCOV")?;
        for per_color in &medians {
            let value = per_color
                .iter()
                .map(|m| match m {
                    Some(v) => v.to_string(),
                    None => ".".to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            write!(output, "\t{value}")?;
        }
        writeln!(output)?;
        self.stats.records_annotated += 1;
        Ok(())
    }

    /// Per-color, per-allele median kmer coverage.
    fn allele_medians(&self, record: &VcfRecord) -> Result<Vec<Vec<Option<u32>>>, CtxError> {
        let k = self.graph.k();
        let ncols = self.graph.num_colors();
        let ref_seq = self.ref_seqs.get(&record.chrom).ok_or_else(|| {
            CtxError::InvalidInput(format!(
                "VCF chromosome {:?} not found in the reference",
                record.chrom
            ))
        })?;
        let pos0 = (record.pos - 1) as usize;
        let ref_len = record.alleles[0].len();
        if pos0 + ref_len > ref_seq.len() {
            return Err(CtxError::Format(format!(
                "VCF record at {}:{} runs past the reference end",
                record.chrom, record.pos
            )));
        }

        let left_start = pos0.saturating_sub(k - 1);
        let right_end = (pos0 + ref_len + k - 1).min(ref_seq.len());

        let mut out: Vec<Vec<Option<u32>>> = vec![Vec::with_capacity(record.alleles.len()); ncols];
        for allele in &record.alleles {
            let mut seq = Vec::with_capacity(allele.len() + 2 * (k - 1));
            seq.extend_from_slice(&ref_seq[left_start..pos0]);
            seq.extend_from_slice(allele.as_bytes());
            seq.extend_from_slice(&ref_seq[pos0 + ref_len..right_end]);

            if seq.len() < k || !seq.iter().all(|b| crate::graph::kmer::encode_base(*b).is_some())
            {
                for per_color in out.iter_mut() {
                    per_color.push(None);
                }
                continue;
            }

            let mut covgs: Vec<Vec<u32>> = vec![Vec::new(); ncols];
            for window in seq.windows(k) {
                let kmer = BinaryKmer::<W>::from_seq(window, k)?;
                let handle = self.graph.find(&kmer);
                for (c, per_color) in covgs.iter_mut().enumerate() {
                    per_color.push(match handle {
                        Some(h) => self.graph.store().covg(h, c) as u32,
                        None => 0,
                    });
                }
            }
            for (c, per_color) in covgs.iter_mut().enumerate() {
                out[c].push(Some(median(per_color)));
            }
        }
        Ok(out)
    }
}

/// Lower median of a list of coverage values.
fn median(values: &mut [u32]) -> u32 {
    debug_assert!(!values.is_empty());
    let mid = (values.len() - 1) / 2;
    let (_, m, _) = values.select_nth_unstable(mid);
    *m
}

fn parse_record(line: &str) -> Result<VcfRecord, CtxError> {
    let mut fields = line.split('\t');
    let mut fixed: [String; 8] = Default::default();
    for slot in fixed.iter_mut() {
        *slot = fields
            .next()
            .ok_or_else(|| {
                CtxError::Format(format!("VCF record has fewer than 8 columns: {line:?}"))
            })?
            .to_string();
    }
    let pos: u64 = fixed[1]
        .parse()
        .map_err(|_| CtxError::Format(format!("bad VCF POS in {line:?}")))?;
    if pos == 0 {
        return Err(CtxError::Format("VCF POS must be 1-based".to_string()));
    }
    let mut alleles = vec![fixed[3].clone()];
    if fixed[4] != "." {
        alleles.extend(fixed[4].split(',').map(|s| s.to_string()));
    }
    Ok(VcfRecord {
        chrom: fixed[0].clone(),
        pos,
        fixed,
        alleles,
    })
}

/// Load reference sequences from a FASTA/FASTQ file, keyed by the first
/// word of each record id.
pub fn load_reference(path: &std::path::Path) -> Result<AHashMap<String, Vec<u8>>, CtxError> {
    let mut reader = needletail::parse_fastx_file(path)
        .map_err(|e| CtxError::Format(format!("cannot open {}: {e}", path.display())))?;
    let mut seqs = AHashMap::new();
    while let Some(record) = reader.next() {
        let record =
            record.map_err(|e| CtxError::Format(format!("{}: {e}", path.display())))?;
        let id = String::from_utf8_lossy(record.id());
        let name = id.split_ascii_whitespace().next().unwrap_or("").to_string();
        seqs.insert(name, record.seq().to_ascii_uppercase());
    }
    Ok(seqs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{load_read, LoadStats};
    use std::io::BufReader;

    const K: usize = 5;

    fn setup() -> (Graph<1>, AHashMap<String, Vec<u8>>) {
        let refseq = b"ACGTAGCCATTGACC".to_vec();
        let graph: Graph<1> = Graph::new(K, 1, 1024).unwrap();
        let stats = LoadStats::default();
        load_read(&graph, &refseq, 0, false, &stats).unwrap();
        load_read(&graph, &refseq, 0, false, &stats).unwrap();
        let mut seqs = AHashMap::new();
        seqs.insert("chr1".to_string(), refseq);
        (graph, seqs)
    }

    fn run(
        graph: &Graph<1>,
        seqs: AHashMap<String, Vec<u8>>,
        vcf: &str,
        max_nvars: usize,
    ) -> (String, VcfCovStats) {
        let mut cov = VcfCov::new(graph, seqs, max_nvars).unwrap();
        let mut out = Vec::new();
        cov.annotate(BufReader::new(vcf.as_bytes()), &mut out).unwrap();
        (String::from_utf8(out).unwrap(), cov.stats())
    }

    const VCF_HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

    #[test]
    fn test_snp_annotation_medians() {
        let (graph, seqs) = setup();
        let vcf = format!("{VCF_HEADER}chr1\t7\t.\tC\tG\t.\tPASS\t.\n");
        let (out, stats) = run(&graph, seqs, &vcf, DEFAULT_MAX_NVARS);
        assert_eq!(stats.records_annotated, 1);
        let record_line = out.lines().last().unwrap();
        let cols: Vec<&str> = record_line.split('\t').collect();
        assert_eq!(cols[8], "KCOV");
        // Reference allele kmers are all covered twice; the alt allele
        // kmers are absent from the graph.
        assert_eq!(cols[9], "2,0");
    }

    #[test]
    fn test_format_header_injected() {
        let (graph, seqs) = setup();
        let vcf = format!("{VCF_HEADER}chr1\t7\t.\tC\tG\t.\tPASS\t.\n");
        let (out, _) = run(&graph, seqs, &vcf, DEFAULT_MAX_NVARS);
        assert!(out.contains("##FORMAT=<ID=KCOV"));
        assert!(out.contains("#CHROM\tPOS"));
    }

    #[test]
    fn test_buffer_high_water_mark() {
        let (graph, seqs) = setup();
        // Two variants 2 bases apart with max_nvars 1: the buffer may
        // briefly hold both, but never three.
        let vcf = format!(
            "{VCF_HEADER}chr1\t7\t.\tC\tG\t.\tPASS\t.\nchr1\t9\t.\tA\tT\t.\tPASS\t.\n"
        );
        let (out, stats) = run(&graph, seqs, &vcf, 1);
        assert_eq!(stats.records_annotated, 2);
        assert!(stats.max_buffered < 3);
        // Both records come out, in order.
        let records: Vec<&str> = out
            .lines()
            .filter(|l| !l.starts_with('#'))
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].starts_with("chr1\t7"));
        assert!(records[1].starts_with("chr1\t9"));
    }

    #[test]
    fn test_distant_records_do_not_accumulate() {
        let (graph, mut seqs) = setup();
        seqs.get_mut("chr1").unwrap().extend_from_slice(b"ACGTAGCCATTGACC");
        let vcf = format!(
            "{VCF_HEADER}chr1\t2\t.\tC\tG\t.\tPASS\t.\nchr1\t25\t.\tA\tT\t.\tPASS\t.\n"
        );
        let (_, stats) = run(&graph, seqs, &vcf, DEFAULT_MAX_NVARS);
        assert_eq!(stats.max_buffered, 1);
    }

    #[test]
    fn test_unknown_chrom_rejected() {
        let (graph, seqs) = setup();
        let vcf = format!("{VCF_HEADER}chrX\t7\t.\tC\tG\t.\tPASS\t.\n");
        let mut cov = VcfCov::new(&graph, seqs, DEFAULT_MAX_NVARS).unwrap();
        let mut out = Vec::new();
        assert!(cov
            .annotate(BufReader::new(vcf.as_bytes()), &mut out)
            .is_err());
    }
}
