//! `reads` — filter reads by graph membership.
//!
//! A read touches the graph when any of its kmers resolves; a pair is
//! kept when either mate touches. `--invert` keeps the reads that do
//! not. Output is gzipped FASTQ (or FASTA), one mutex-guarded writer
//! per file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use clap::Args;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::graph::kmer::{complement_code, encode_base, BinaryKmer};
use crate::graph::Graph;
use crate::io::fastx::{FastxConfig, FastxSource, SeqRead};
use crate::io::output::{write_log, OutputGuard};
use crate::io::threads::run_read_pipeline;

#[derive(Args, Debug)]
pub struct ReadsArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Write FASTA instead of FASTQ
    #[arg(long = "fasta", conflicts_with = "fastq")]
    pub fasta: bool,
    /// Write FASTQ (the default)
    #[arg(long = "fastq")]
    pub fastq: bool,
    /// Keep reads with no kmer in the graph instead
    #[arg(short = 'v', long = "invert")]
    pub invert: bool,
    /// Single-end task <in>:<outbase>; writes <outbase>.fq.gz
    #[arg(long = "seq")]
    pub seq: Vec<String>,
    /// Paired-end task <in1>:<in2>:<outbase>; writes <outbase>.{1,2}.fq.gz
    #[arg(long = "seq2")]
    pub seq2: Vec<String>,
    /// Input graph files
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: ReadsArgs) -> Result<()> {
    if args.seq.is_empty() && args.seq2.is_empty() {
        bail!("give at least one --seq or --seq2 task");
    }
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

// ---------------------------------------------------------------------------
// Gzipped output under a mutex
// ---------------------------------------------------------------------------

struct GzOut {
    guard: OutputGuard,
    writer: Mutex<GzEncoder<BufWriter<File>>>,
}

impl GzOut {
    fn create(path: PathBuf) -> Result<Self> {
        let mut guard = OutputGuard::create(&path)?;
        let writer = GzEncoder::new(guard.take_writer(), Compression::default());
        Ok(Self {
            guard,
            writer: Mutex::new(writer),
        })
    }

    fn finish(self) -> Result<()> {
        let encoder = self.writer.into_inner().unwrap();
        encoder.finish()?.flush()?;
        self.guard.commit_external();
        Ok(())
    }
}

fn write_read<Out: Write>(out: &mut Out, read: &SeqRead, fasta: bool) -> Result<()> {
    if fasta {
        out.write_all(b">")?;
        out.write_all(&read.name)?;
        out.write_all(b"\n")?;
        out.write_all(&read.seq)?;
        out.write_all(b"\n")?;
    } else {
        out.write_all(b"@")?;
        out.write_all(&read.name)?;
        out.write_all(b"\n")?;
        out.write_all(&read.seq)?;
        out.write_all(b"\n+\n")?;
        match &read.qual {
            Some(qual) => out.write_all(qual)?,
            None => out.write_all(&vec![b'I'; read.seq.len()])?,
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Whether any kmer of `seq` is present in the graph.
fn touches_graph<const W: usize>(graph: &Graph<W>, seq: &[u8]) -> bool {
    let k = graph.k();
    let mut fwd = BinaryKmer::<W>::zero();
    let mut rev = BinaryKmer::<W>::zero();
    let mut filled = 0usize;
    for &b in seq {
        let Some(code) = encode_base(b) else {
            filled = 0;
            continue;
        };
        fwd = fwd.shift_left_append(code, k);
        rev = rev.shift_right_prepend(complement_code(code), k);
        filled += 1;
        if filled < k {
            continue;
        }
        let key = if fwd.words() <= rev.words() { fwd } else { rev };
        if graph.table().find(&key).is_some() {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Command body
// ---------------------------------------------------------------------------

fn run_with<const W: usize>(args: &ReadsArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let capacity = inputs.capacity(&args.resources, W)?;
    let graph = inputs.load::<W>(capacity)?;
    let fasta = args.fasta;
    let ext = if fasta { "fa" } else { "fq" };

    let printed = AtomicU64::new(0);
    let total = AtomicU64::new(0);

    // Single-end tasks.
    for spec in &args.seq {
        let Some((input, outbase)) = spec.split_once(':') else {
            bail!("--seq takes <in>:<outbase>, got {spec:?}");
        };
        let out = GzOut::create(PathBuf::from(format!("{outbase}.{ext}.gz")))?;
        let source = FastxSource::new(FastxConfig {
            read1_paths: vec![input.to_string()],
            copy_quality: !fasta,
            ..Default::default()
        })?;
        let graph_ref = &graph;
        let out_ref = &out;
        let printed_ref = &printed;
        let total_ref = &total;
        run_read_pipeline(source, args.resources.threads, move |chunk| {
            let mut keep: Vec<&SeqRead> = Vec::new();
            let mut kept_local = 0u64;
            total_ref.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            for pair in &chunk {
                if touches_graph(graph_ref, &pair.r1.seq) != args.invert {
                    keep.push(&pair.r1);
                    kept_local += 1;
                }
            }
            if !keep.is_empty() {
                let mut writer = out_ref.writer.lock().unwrap();
                for read in keep {
                    write_read(&mut *writer, read, fasta)?;
                }
            }
            printed_ref.fetch_add(kept_local, Ordering::Relaxed);
            Ok(())
        })?;
        out.finish()?;
    }

    // Paired-end tasks.
    for spec in &args.seq2 {
        let parts: Vec<&str> = spec.split(':').collect();
        let &[in1, in2, outbase] = parts.as_slice() else {
            bail!("--seq2 takes <in1>:<in2>:<outbase>, got {spec:?}");
        };
        let out1 = GzOut::create(PathBuf::from(format!("{outbase}.1.{ext}.gz")))?;
        let out2 = GzOut::create(PathBuf::from(format!("{outbase}.2.{ext}.gz")))?;
        let source = FastxSource::new(FastxConfig {
            read1_paths: vec![in1.to_string()],
            read2_paths: vec![in2.to_string()],
            copy_quality: !fasta,
            ..Default::default()
        })?;
        let graph_ref = &graph;
        let out1_ref = &out1;
        let out2_ref = &out2;
        let printed_ref = &printed;
        let total_ref = &total;
        run_read_pipeline(source, args.resources.threads, move |chunk| {
            total_ref.fetch_add(chunk.len() as u64 * 2, Ordering::Relaxed);
            for pair in &chunk {
                let r2 = pair.r2.as_ref().expect("paired source yields pairs");
                let touched = touches_graph(graph_ref, &pair.r1.seq)
                    || touches_graph(graph_ref, &r2.seq);
                if touched != args.invert {
                    // Lock both in a fixed order so mates stay aligned.
                    let mut w1 = out1_ref.writer.lock().unwrap();
                    let mut w2 = out2_ref.writer.lock().unwrap();
                    write_read(&mut *w1, &pair.r1, fasta)?;
                    write_read(&mut *w2, r2, fasta)?;
                    printed_ref.fetch_add(2, Ordering::Relaxed);
                }
            }
            Ok(())
        })?;
        out1.finish()?;
        out2.finish()?;
    }

    let summary = format!(
        "reads: {} of {} reads printed ({})",
        printed.load(Ordering::Relaxed),
        total.load(Ordering::Relaxed),
        if args.invert { "inverted" } else { "matching" },
    );
    let first_out = args
        .seq
        .first()
        .or(args.seq2.first())
        .and_then(|s| s.rsplit(':').next())
        .unwrap_or("reads");
    let stats = serde_json::json!({
        "reads_printed": printed.load(Ordering::Relaxed),
        "reads_total": total.load(Ordering::Relaxed),
        "invert": args.invert,
    });
    write_log(&PathBuf::from(first_out), &summary, &stats)?;
    info!("{summary}");
    Ok(())
}
