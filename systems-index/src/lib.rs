//! Prefix index over star-system names.
//!
//! Names are stored in a trie that lives entirely on disk as fixed-size node
//! records (see [`node`]). The records form one append-only log addressed by
//! byte offset, split over numbered files by the [`store`]. At serve time a
//! [`cache`] of recently read nodes sits between the [`trie`] and the store
//! and is swept in the background so that it only holds hot nodes.
//!
//! Building and serving are separate phases. A build opens a fresh
//! [`NodeStore`], wraps it in a [`Trie`] and feeds it names through
//! [`ingest`]. A server reopens the same directory, attaches a [`NodeCache`]
//! and answers prefix queries through [`server`].

pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod node;
pub mod server;
pub mod stats;
pub mod store;
pub mod trie;

pub use cache::{NodeCache, Sweeper};
pub use config::AppConfig;
pub use error::{CodecError, StartupError, StoreError};
pub use node::{TrieNode, NO_NODE, RECORD_SIZE};
pub use stats::IndexStats;
pub use store::NodeStore;
pub use trie::{SearchOptions, Trie};
