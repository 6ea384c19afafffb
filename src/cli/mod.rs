//! Command-line interface: one module per command.

pub mod breakpoints;
pub mod bubbles;
pub mod build;
pub mod clean;
pub mod links;
pub mod reads;
pub mod thread;
pub mod vcfcov;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::graph::format::{estimate_kmers, parse_graph_spec, peek_header, LoadFilter};
use crate::graph::hash_table::MAX_LOAD_FACTOR;
use crate::graph::Graph;

#[derive(Parser, Debug)]
#[command(name = "mccortex-rs")]
#[command(about = "Colored, linked de Bruijn graph toolkit")]
#[command(version = crate::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Build(build::BuildArgs),
    Clean(clean::CleanArgs),
    Thread(thread::ThreadArgs),
    Links(links::LinksArgs),
    Bubbles(bubbles::BubblesArgs),
    Breakpoints(breakpoints::BreakpointsArgs),
    Vcfcov(vcfcov::VcfcovArgs),
    Reads(reads::ReadsArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build::run(args),
        Commands::Clean(args) => clean::run(args),
        Commands::Thread(args) => thread::run(args),
        Commands::Links(args) => links::run(args),
        Commands::Bubbles(args) => bubbles::run(args),
        Commands::Breakpoints(args) => breakpoints::run(args),
        Commands::Vcfcov(args) => vcfcov::run(args),
        Commands::Reads(args) => reads::run(args),
    }
}

// ---------------------------------------------------------------------------
// Shared flags
// ---------------------------------------------------------------------------

/// Memory and threading flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ResourceArgs {
    /// Memory budget for the hash table (e.g. 4G, 500M)
    #[arg(short = 'm', long = "memory")]
    pub memory: Option<String>,
    /// Number of hash table entries (e.g. 1000000); overrides -m
    #[arg(short = 'n', long = "nkmers")]
    pub nkmers: Option<u64>,
    /// Number of worker threads
    #[arg(short = 't', long = "threads", default_value_t = crate::io::threads::DEFAULT_THREADS)]
    pub threads: usize,
}

impl ResourceArgs {
    pub fn memory_bytes(&self) -> Result<Option<u64>> {
        self.memory.as_deref().map(parse_mem_size).transpose()
    }
}

/// Parse a memory size such as `4G`, `512M`, `1024` (bytes).
pub fn parse_mem_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, mult) = match s.as_bytes().last() {
        Some(b'K' | b'k') => (&s[..s.len() - 1], 1u64 << 10),
        Some(b'M' | b'm') => (&s[..s.len() - 1], 1u64 << 20),
        Some(b'G' | b'g') => (&s[..s.len() - 1], 1u64 << 30),
        Some(b'T' | b't') => (&s[..s.len() - 1], 1u64 << 40),
        _ => (s, 1u64),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("bad memory size {s:?}"))?;
    Ok(value * mult)
}

// ---------------------------------------------------------------------------
// Graph input helpers
// ---------------------------------------------------------------------------

/// Inspected graph inputs: per-file path, selected file colors, and the
/// stacked color layout.
pub(crate) struct GraphInputs {
    pub files: Vec<(PathBuf, Vec<usize>, usize)>, // (path, file colors, target base)
    pub kmer_size: usize,
    pub total_colors: usize,
    pub est_kmers: u64,
}

/// Peek every input graph header: kmer sizes must agree; selected
/// colors stack into consecutive target colors.
pub(crate) fn inspect_graph_inputs(specs: &[String]) -> Result<GraphInputs> {
    if specs.is_empty() {
        bail!("no input graph files given");
    }
    let mut files = Vec::with_capacity(specs.len());
    let mut kmer_size = 0usize;
    let mut total_colors = 0usize;
    let mut est_kmers = 0u64;
    for spec in specs {
        let (path, cols) = parse_graph_spec(spec)?;
        let header =
            peek_header(&path).with_context(|| format!("cannot read {}", path.display()))?;
        if kmer_size == 0 {
            kmer_size = header.kmer_size as usize;
        } else if kmer_size != header.kmer_size as usize {
            bail!(
                "graph files disagree on kmer size ({} vs {})",
                kmer_size,
                header.kmer_size
            );
        }
        let cols = match cols {
            Some(cols) => {
                for &c in &cols {
                    if c >= header.num_colors() {
                        bail!(
                            "{}: color {} out of range (file has {} colors)",
                            path.display(),
                            c,
                            header.num_colors()
                        );
                    }
                }
                cols
            }
            None => (0..header.num_colors()).collect(),
        };
        est_kmers += estimate_kmers(&path)?;
        files.push((path, cols, total_colors));
        total_colors += files.last().unwrap().1.len();
    }
    Ok(GraphInputs {
        files,
        kmer_size,
        total_colors,
        est_kmers,
    })
}

impl GraphInputs {
    /// Hash capacity: explicit count, memory budget, or an estimate
    /// from the input files at the target load factor.
    pub fn capacity(&self, resources: &ResourceArgs, words: usize) -> Result<u64> {
        if let Some(n) = resources.nkmers {
            return Ok(n);
        }
        if let Some(mem) = resources.memory_bytes()? {
            return Ok(crate::graph::kmers_in_hash(
                Some(mem),
                None,
                words,
                self.total_colors,
            )?);
        }
        Ok(((self.est_kmers as f64 / MAX_LOAD_FACTOR) as u64).max(16) + 1)
    }

    /// Allocate a graph and load every input through its color filter.
    pub fn load<const W: usize>(&self, capacity: u64) -> Result<Graph<W>> {
        let mut graph: Graph<W> = Graph::new(self.kmer_size, self.total_colors, capacity)?;
        for (path, cols, base) in &self.files {
            let filter = LoadFilter::offset(cols, *base);
            crate::graph::format::load_graph_into(path, &mut graph, &filter)
                .with_context(|| format!("loading {}", path.display()))?;
        }
        Ok(graph)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
