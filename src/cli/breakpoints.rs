//! `breakpoints` — call breakpoints of samples against a reference color.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::calls::breakpoints::{call_breakpoints, DEFAULT_MAX_WALK};
use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::links::format::load_links;
use crate::links::store::LinkStore;
use crate::io::output::{write_log, OutputGuard};

#[derive(Args, Debug)]
pub struct BreakpointsArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Color holding the reference sequence
    #[arg(long = "ref")]
    pub ref_color: usize,
    /// Link files to use on the novel walk; repeatable
    #[arg(short = 'p', long = "links")]
    pub link_files: Vec<PathBuf>,
    /// Longest novel walk considered, in kmers
    #[arg(long = "max-walk", default_value_t = DEFAULT_MAX_WALK)]
    pub max_walk: usize,
    /// Output file
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,
    /// Input graph files
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: BreakpointsArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn run_with<const W: usize>(args: &BreakpointsArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let capacity = inputs.capacity(&args.resources, W)?;
    let graph = inputs.load::<W>(capacity)?;

    let links = if args.link_files.is_empty() {
        None
    } else {
        let mut store = LinkStore::new(graph.num_colors());
        for path in &args.link_files {
            load_links(path, &graph, &mut store)?;
        }
        Some(store)
    };

    let mut guard = OutputGuard::create(&args.out)?;
    let stats = call_breakpoints(
        &graph,
        links.as_ref(),
        args.ref_color,
        graph.all_colors(),
        args.max_walk,
        guard.writer(),
    )?;
    guard.commit()?;

    let summary = format!(
        "breakpoints: {} breakpoints from {} divergence anchors -> {}",
        stats.breakpoints_found,
        stats.divergence_anchors,
        args.out.display()
    );
    write_log(&args.out, &summary, &serde_json::to_value(stats)?)?;
    info!("{summary}");
    Ok(())
}
