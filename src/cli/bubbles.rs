//! `bubbles` — call bubbles from a graph (and optional links).

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::calls::bubbles::{call_bubbles, DEFAULT_MAX_ALLELE_LEN};
use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::links::format::load_links;
use crate::links::store::LinkStore;
use crate::io::output::{write_log, OutputGuard};

#[derive(Args, Debug)]
pub struct BubblesArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Link files to use when walking branches; repeatable
    #[arg(short = 'p', long = "links")]
    pub link_files: Vec<PathBuf>,
    /// Longest branch walk considered, in kmers
    #[arg(long = "max-allele", default_value_t = DEFAULT_MAX_ALLELE_LEN)]
    pub max_allele: usize,
    /// Output file
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,
    /// Input graph files
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: BubblesArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn run_with<const W: usize>(args: &BubblesArgs) -> Result<()> {
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
    let stats = call_bubbles(
        &graph,
        links.as_ref(),
        graph.all_colors(),
        args.max_allele,
        guard.writer(),
    )?;
    guard.commit()?;

    let summary = format!(
        "bubbles: {} bubbles from {} branch nodes -> {}",
        stats.bubbles_found,
        stats.branch_nodes_seen,
        args.out.display()
    );
    write_log(&args.out, &summary, &serde_json::to_value(stats)?)?;
    info!("{summary}");
    Ok(())
}
