use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use systems_index::ingest::{ingest_csv, ingest_jsonl};
use systems_index::{AppConfig, NodeStore, Trie};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Builds a fresh name index from a system dump, replacing any index already
/// in the target directory.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input file or '-' to use stdin.
    #[arg(short, long, default_value_t = String::from("-"))]
    input: String,

    /// Layout of the input.
    #[arg(short, long, value_enum, default_value_t = Format::Csv)]
    format: Format,

    /// Config file supplying the index directory and file capacity.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Index directory; overrides the config file.
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Records per index file; overrides the config file.
    #[arg(long)]
    systems_per_file: Option<u64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// CSV with `name` and `ed_system_address` columns.
    Csv,
    /// EDSM JSON dump, one system per line.
    Jsonl,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("SX_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(dir) = args.index_dir.clone() {
        config.file_store.path = dir;
    }
    if let Some(systems_per_file) = args.systems_per_file {
        config.file_store.systems_per_file = systems_per_file;
    }
    config.validate()?;

    let input = open_input(args.input.as_str())
        .with_context(|| format!("unable to open input {}", args.input))?;

    let store = Arc::new(NodeStore::create(
        &config.file_store.path,
        config.file_store.systems_per_file,
    )?);
    tracing::info!(
        dir = %config.file_store.path.display(),
        systems_per_file = config.file_store.systems_per_file,
        "building index"
    );

    let start = Instant::now();
    let mut trie = Trie::open(Arc::clone(&store))?;
    let summary = match args.format {
        Format::Csv => ingest_csv(input, &mut trie)?,
        Format::Jsonl => ingest_jsonl(input, &mut trie)?,
    };
    drop(trie);

    store.sync()?;
    let stats = systems_index::IndexStats::from_store(&store);
    store.close()?;

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        nodes = stats.node_count,
        bytes = stats.size_bytes,
        elapsed_s = start.elapsed().as_secs(),
        "index built"
    );
    Ok(())
}

fn open_input(input: &str) -> io::Result<Box<dyn BufRead>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(io::stdin().lock())));
    }
    Ok(Box::new(BufReader::new(fs::File::open(input)?)))
}
