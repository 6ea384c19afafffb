//! `clean` — tip clipping and unitig coverage pruning.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::graph::cleaner::{
    clean_unitigs, default_tip_threshold, pick_coverage_cutoff, record_cleaning, remove_tips,
    unitig_coverage_histogram, write_histogram_csv, CleanStats,
};
use crate::graph::format::write_graph;
use crate::io::output::{write_log, OutputGuard};

#[derive(Args, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Maximum tip length to clip, in kmers (0 disables; default 2k)
    #[arg(long = "tips")]
    pub tips: Option<usize>,
    /// Prune unitigs below a mean-coverage cutoff
    #[arg(long = "unitigs")]
    pub unitigs: bool,
    /// Coverage cutoff for --unitigs (0 derives one from the histogram)
    #[arg(long = "cutoff", default_value_t = 0)]
    pub cutoff: u32,
    /// Write the before-cleaning coverage histogram CSV here
    #[arg(long = "covg-csv")]
    pub covg_csv: Option<PathBuf>,
    /// Output graph file
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,
    /// Input graph files, each optionally with a color list (in.ctx:0,2)
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: CleanArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn run_with<const W: usize>(args: &CleanArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let capacity = inputs.capacity(&args.resources, W)?;
    let mut graph = inputs.load::<W>(capacity)?;
    let before = graph.num_kmers();

    // Tip clipping (on by default).
    let tip_threshold = match args.tips {
        Some(0) => None,
        Some(t) => Some(t),
        None => Some(default_tip_threshold(graph.k())),
    };
    let tip_stats = match tip_threshold {
        Some(t) => remove_tips(&graph, t),
        None => CleanStats::default(),
    };

    // Unitig coverage pruning.
    let mut prune_stats = CleanStats::default();
    let mut cutoff_used = None;
    if args.unitigs || args.cutoff > 0 || args.covg_csv.is_some() {
        let hist = unitig_coverage_histogram(&graph);
        if let Some(csv) = &args.covg_csv {
            write_histogram_csv(&hist, csv)?;
            info!(path = %csv.display(), "coverage histogram written");
        }
        if args.unitigs || args.cutoff > 0 {
            let cutoff = if args.cutoff > 0 {
                args.cutoff
            } else {
                pick_coverage_cutoff(&hist)
            };
            prune_stats = clean_unitigs(&graph, cutoff);
            cutoff_used = Some(cutoff);
        }
    }

    record_cleaning(&mut graph, tip_threshold, cutoff_used);

    let mut guard = OutputGuard::create(&args.out)?;
    let written = write_graph(&graph, guard.writer())?;
    guard.commit()?;

    let summary = format!(
        "clean: {} -> {} kmers ({} tips, {} low-coverage unitigs removed) -> {}",
        before,
        written,
        tip_stats.tips_removed,
        prune_stats.unitigs_removed,
        args.out.display()
    );
    let stats = serde_json::json!({
        "kmers_before": before,
        "kmers_after": written,
        "tips": serde_json::to_value(tip_stats)?,
        "unitigs": serde_json::to_value(prune_stats)?,
    });
    write_log(&args.out, &summary, &stats)?;
    info!("{summary}");
    Ok(())
}
