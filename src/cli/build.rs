//! `build` — construct a colored graph from sequence reads.

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use crate::cli::ResourceArgs;
use crate::graph::builder::{load_read, LoadStats};
use crate::graph::format::write_graph;
use crate::graph::kmer::{validate_kmer_size, words_for_k};
use crate::graph::Graph;
use crate::io::fastx::{FastxConfig, FastxSource};
use crate::io::output::{write_log, OutputGuard};
use crate::io::threads::run_read_pipeline;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Kmer size (odd, 3..=255)
    #[arg(short = 'k', long = "kmer")]
    pub kmer_size: usize,
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Sample name; repeat once per color, in color order
    #[arg(long = "sample", required = true)]
    pub samples: Vec<String>,
    /// Sequence input as <color>:<file>; repeatable
    #[arg(long = "seq", required = true)]
    pub seqs: Vec<String>,
    /// Fail on non-ACGT bases instead of splitting reads
    #[arg(long)]
    pub strict: bool,
    /// Output graph file
    #[arg(short = 'o', long = "out")]
    pub out: std::path::PathBuf,
}

pub fn run(args: BuildArgs) -> Result<()> {
    validate_kmer_size(args.kmer_size)?;
    let k = args.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn parse_seq_spec(spec: &str, num_colors: usize) -> Result<(usize, String)> {
    let Some((col, path)) = spec.split_once(':') else {
        bail!("--seq takes <color>:<file>, got {spec:?}");
    };
    let color: usize = col
        .parse()
        .with_context(|| format!("bad color in --seq {spec:?}"))?;
    if color >= num_colors {
        bail!(
            "--seq color {} out of range ({} samples given)",
            color,
            num_colors
        );
    }
    Ok((color, path.to_string()))
}

fn run_with<const W: usize>(args: &BuildArgs) -> Result<()> {
    debug_assert_eq!(words_for_k(args.kmer_size), W);
    let num_colors = args.samples.len();
    let capacity = crate::graph::kmers_in_hash(
        args.resources.memory_bytes()?,
        args.resources.nkmers,
        W,
        num_colors,
    )?;
    info!(
        k = args.kmer_size,
        colors = num_colors,
        capacity, "allocating graph"
    );

    let mut graph: Graph<W> = Graph::new(args.kmer_size, num_colors, capacity)?;
    for (color, name) in args.samples.iter().enumerate() {
        graph.info.colors[color].sample_name = name.clone();
    }

    let stats = LoadStats::default();
    for spec in &args.seqs {
        let (color, path) = parse_seq_spec(spec, num_colors)?;
        info!("loading sequence from {path} into color {color}");
        let source = FastxSource::new(FastxConfig::single(vec![path.clone()]))?;
        let graph_ref = &graph;
        let stats_ref = &stats;
        run_read_pipeline(source, args.resources.threads, move |chunk| {
            for pair in chunk {
                load_read(graph_ref, &pair.r1.seq, color, args.strict, stats_ref)?;
                if let Some(r2) = &pair.r2 {
                    load_read(graph_ref, &r2.seq, color, args.strict, stats_ref)?;
                }
            }
            Ok(())
        })
        .with_context(|| format!("loading {path}"))?;
    }

    let snapshot = stats.snapshot();
    graph.info.mean_read_length = stats.mean_read_length();
    graph.info.total_sequence = snapshot.bases_loaded;

    let mut guard = OutputGuard::create(&args.out)?;
    let written = write_graph(&graph, guard.writer())?;
    guard.commit()?;

    let summary = format!(
        "build: {} kmers ({} loaded, {} novel) from {} reads into {} colors -> {}",
        written,
        snapshot.kmers_loaded,
        snapshot.kmers_novel,
        snapshot.reads_loaded,
        num_colors,
        args.out.display()
    );
    write_log(&args.out, &summary, &serde_json::to_value(snapshot)?)?;
    info!("{summary}");
    Ok(())
}
