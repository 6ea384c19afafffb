//! `thread` — thread reads through a graph and emit links.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::links::builder::{apply_observations, observe_read, ThreadStats};
use crate::links::format::{load_links, write_links};
use crate::links::store::LinkStore;
use crate::io::fastx::{FastxConfig, FastxSource};
use crate::io::output::{write_log, OutputGuard};
use crate::io::threads::run_read_pipeline;

#[derive(Args, Debug)]
pub struct ThreadArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Load existing link files before threading; repeatable
    #[arg(short = 'p', long = "links")]
    pub link_files: Vec<PathBuf>,
    /// Color to accumulate link counts into
    #[arg(long = "col", default_value_t = 0)]
    pub color: usize,
    /// Sequence files to thread; repeatable
    #[arg(long = "seq", required = true)]
    pub seqs: Vec<String>,
    /// Output link file (.ctp.gz)
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,
    /// Input graph files
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: ThreadArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn run_with<const W: usize>(args: &ThreadArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let capacity = inputs.capacity(&args.resources, W)?;
    let graph = inputs.load::<W>(capacity)?;
    if args.color >= graph.num_colors() {
        anyhow::bail!(
            "--col {} out of range (graph has {} colors)",
            args.color,
            graph.num_colors()
        );
    }

    let mut store = LinkStore::new(graph.num_colors());
    for path in &args.link_files {
        load_links(path, &graph, &mut store)?;
    }

    let stats = ThreadStats::default();
    let store = Mutex::new(store);
    let mask = graph.all_colors();
    for path in &args.seqs {
        info!("threading reads from {path}");
        let source = FastxSource::new(FastxConfig::single(vec![path.clone()]))?;
        let graph_ref = &graph;
        let stats_ref = &stats;
        let store_ref = &store;
        run_read_pipeline(source, args.resources.threads, move |chunk| {
            // Walk lock-free, then merge the batch under the mutex.
            let mut obs = Vec::new();
            for pair in &chunk {
                observe_read(graph_ref, &pair.r1.seq, mask, stats_ref, &mut obs);
                if let Some(r2) = &pair.r2 {
                    observe_read(graph_ref, &r2.seq, mask, stats_ref, &mut obs);
                }
            }
            if !obs.is_empty() {
                let mut store = store_ref.lock().unwrap();
                apply_observations(&mut store, args.color, &obs);
            }
            Ok(())
        })?;
    }

    let store = store.into_inner().unwrap();
    let mut guard = OutputGuard::create(&args.out)?;
    write_links(&graph, &store, "thread", guard.take_writer())?;
    guard.commit_external();

    let snapshot = stats.snapshot();
    let summary = format!(
        "thread: {} reads threaded, {} links on {} kmers -> {}",
        snapshot.reads_threaded,
        snapshot.links_emitted,
        store.num_kmers_with_links(),
        args.out.display()
    );
    write_log(&args.out, &summary, &serde_json::to_value(snapshot)?)?;
    info!("{summary}");
    Ok(())
}
