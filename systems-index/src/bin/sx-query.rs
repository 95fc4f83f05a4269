use anyhow::Result;
use clap::{Parser, Subcommand};

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use systems_index::{AppConfig, NodeStore, SearchOptions, Trie};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Queries a built name index directly, without a server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file supplying the index directory and search defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Index directory; overrides the config file.
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Records per index file; overrides the config file.
    #[arg(long)]
    systems_per_file: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the names starting with a prefix, one per line.
    Search {
        input: String,

        /// Maximum number of names to print.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Match the exact case of the input.
        #[arg(long, default_value_t = false)]
        case_sensitive: bool,
    },
    /// Print size statistics for the index as JSON.
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
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
    if let Some(dir) = args.index_dir {
        config.file_store.path = dir;
    }
    if let Some(systems_per_file) = args.systems_per_file {
        config.file_store.systems_per_file = systems_per_file;
    }
    config.validate()?;

    let store = Arc::new(NodeStore::open(
        &config.file_store.path,
        config.file_store.systems_per_file,
    )?);
    if store.is_empty() {
        anyhow::bail!("no index in {}", config.file_store.path.display());
    }
    let trie = Trie::open(Arc::clone(&store))?;

    let mut stdout = io::stdout().lock();
    match args.command {
        Command::Search {
            input,
            limit,
            case_sensitive,
        } => {
            let defaults = SearchOptions::from(&config.search);
            let names = trie.search_prefix(
                input.trim().as_bytes(),
                limit.unwrap_or(defaults.limit),
                !case_sensitive && defaults.case_insensitive,
            )?;
            for name in names {
                writeln!(stdout, "{name}")?;
            }
        }
        Command::Stats => {
            serde_json::to_writer_pretty(&mut stdout, &trie.stats())?;
            writeln!(stdout)?;
        }
    }

    store.close()?;
    Ok(())
}
