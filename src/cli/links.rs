//! `links` — inspect, check, and clean link files.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::links::cleaner::clean_links;
use crate::links::format::{load_links, write_links};
use crate::links::store::LinkStore;
use crate::links::threshold::{pick_link_threshold, DEFAULT_FPR};
use crate::io::output::{write_log, OutputGuard};

#[derive(Args, Debug)]
pub struct LinksArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Prune link subtrees below this coverage (0 derives a Poisson
    /// threshold from the data)
    #[arg(long = "clean")]
    pub clean: Option<u32>,
    /// Target false-positive rate for the derived threshold
    #[arg(long = "fpr", default_value_t = DEFAULT_FPR)]
    pub fpr: f64,
    /// Upper bound on the derived threshold
    #[arg(long = "max-threshold", default_value_t = 50)]
    pub max_threshold: u32,
    /// Verify every link path against the graph before anything else
    #[arg(long = "check")]
    pub check: bool,
    /// Output link file (required with --clean)
    #[arg(short = 'o', long = "out")]
    pub out: Option<PathBuf>,
    /// Input link file
    #[arg(short = 'p', long = "links")]
    pub link_file: PathBuf,
    /// Input graph files
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: LinksArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn run_with<const W: usize>(args: &LinksArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let capacity = inputs.capacity(&args.resources, W)?;
    let graph = inputs.load::<W>(capacity)?;

    let mut store = LinkStore::new(graph.num_colors());
    load_links(&args.link_file, &graph, &mut store)?;
    let kmers_with_links = store.num_kmers_with_links();

    if args.check {
        crate::links::check_links(&graph, &store)?;
        info!("link checks passed");
    }

    let mut summary = format!(
        "links: {} kmers with links in {}",
        kmers_with_links,
        args.link_file.display()
    );
    let mut stats = serde_json::json!({ "kmers_with_links": kmers_with_links });

    if let Some(requested) = args.clean {
        let out = args.out.as_ref().ok_or_else(|| {
            anyhow::anyhow!("--clean needs an output file (-o)")
        })?;
        let threshold = if requested > 0 {
            requested
        } else {
            let mut coverages: Vec<u32> = Vec::new();
            for &h in store.handles().iter() {
                for dir in [crate::links::LinkDir::Fwd, crate::links::LinkDir::Rev] {
                    if let Some(root) = store.root(h, dir) {
                        coverages.push(store.trie_coverage(root));
                    }
                }
            }
            pick_link_threshold(&mut coverages, args.fpr, args.max_threshold)
        };
        let (cleaned, clean_stats) = clean_links(&store, threshold);

        let mut guard = OutputGuard::create(out)?;
        write_links(&graph, &cleaned, "links", guard.take_writer())?;
        guard.commit_external();

        summary = format!(
            "links: cleaned at threshold {} ({} -> {} kmers with links) -> {}",
            threshold,
            clean_stats.kmers_before,
            clean_stats.kmers_after,
            out.display()
        );
        stats = serde_json::to_value(clean_stats)?;
        write_log(out, &summary, &stats)?;
    } else if let Some(out) = &args.out {
        write_log(out, &summary, &stats)?;
    }

    info!("{summary}");
    Ok(())
}
