//! `vcfcov` — annotate a VCF with per-color kmer coverage.

use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::calls::vcfcov::{load_reference, VcfCov, DEFAULT_MAX_NVARS};
use crate::cli::{inspect_graph_inputs, ResourceArgs};
use crate::io::output::{write_log, OutputGuard};

#[derive(Args, Debug)]
pub struct VcfcovArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    /// Input VCF (plain or gzipped), sorted by position
    #[arg(long = "vcf")]
    pub vcf: PathBuf,
    /// Reference FASTA matching the VCF coordinates
    #[arg(long = "ref")]
    pub reference: PathBuf,
    /// Most VCF records buffered at once
    #[arg(long = "max-nvars", default_value_t = DEFAULT_MAX_NVARS)]
    pub max_nvars: usize,
    /// Output VCF
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,
    /// Input graph files
    #[arg(required = true)]
    pub graphs: Vec<String>,
}

pub fn run(args: VcfcovArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let k = inputs.kmer_size;
    crate::dispatch_kmer_words!(k, run_with, &args)
}

fn run_with<const W: usize>(args: &VcfcovArgs) -> Result<()> {
    let inputs = inspect_graph_inputs(&args.graphs)?;
    let capacity = inputs.capacity(&args.resources, W)?;
    let graph = inputs.load::<W>(capacity)?;

    let ref_seqs = load_reference(&args.reference)?;
    let (vcf_reader, _format) = niffler::send::from_path(&args.vcf)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {e}", args.vcf.display()))?;

    let mut annotator = VcfCov::new(&graph, ref_seqs, args.max_nvars)?;
    let mut guard = OutputGuard::create(&args.out)?;
    annotator.annotate(BufReader::new(vcf_reader), guard.writer())?;
    guard.commit()?;

    let stats = annotator.stats();
    let summary = format!(
        "vcfcov: {} records annotated (max {} buffered) -> {}",
        stats.records_annotated,
        stats.max_buffered,
        args.out.display()
    );
    write_log(&args.out, &summary, &serde_json::to_value(stats)?)?;
    info!("{summary}");
    Ok(())
}
