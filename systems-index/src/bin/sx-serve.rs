use anyhow::{Context, Result};
use clap::Parser;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use systems_index::cache::SWEEP_INTERVAL;
use systems_index::server::{Listener, Server, Stopper};
use systems_index::{AppConfig, NodeCache, NodeStore, SearchOptions, Sweeper, Trie};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Serves typeahead queries against a built name index.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file.
    #[arg(short, long, default_value = "./config.json")]
    config: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,
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

    let config = AppConfig::load(&args.config)?;
    let store = Arc::new(
        NodeStore::open(&config.file_store.path, config.file_store.systems_per_file)
            .context("unable to open the index")?,
    );
    if store.is_empty() {
        anyhow::bail!(
            "no index in {}; build one with sx-build first",
            config.file_store.path.display()
        );
    }

    let cache = Arc::new(NodeCache::new());
    let sweeper = Sweeper::spawn(
        Arc::clone(&cache),
        config.file_store.cache_max_age(),
        SWEEP_INTERVAL,
    )?;

    let trie = Trie::open(Arc::clone(&store))?
        .with_cache(cache)
        .with_options(SearchOptions::from(&config.search));
    let server = Arc::new(Server::new(Arc::new(trie), config.access_control.clone()));
    tracing::info!(stats = ?server.trie().stats(), "index opened");

    let listener = Listener::bind((args.bind.as_str(), args.port))
        .with_context(|| format!("unable to listen on {}:{}", args.bind, args.port))?;
    stop_on_ctrl_c(listener.stopper()?)?;
    listener.run(server)?;

    // Every connection thread has exited; release the index.
    sweeper.stop();
    store.close()?;
    tracing::info!("shut down");
    Ok(())
}

fn stop_on_ctrl_c(stopper: Stopper) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("sx-signal".into())
        .spawn(move || {
            if let Err(err) = runtime.block_on(tokio::signal::ctrl_c()) {
                tracing::warn!(%err, "unable to listen for ctrl-c");
                return;
            }
            tracing::info!("ctrl-c received, shutting down");
            stopper.stop();
        })?;
    Ok(())
}
