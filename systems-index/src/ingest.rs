//! Feeding name dumps into a [`Trie`].
//!
//! Two source formats are understood:
//!
//! * CSV with a header row, where the `name` column holds the system name and
//!   the optional `ed_system_address` column its 64-bit id. Rows whose id does
//!   not parse are skipped.
//! * The EDSM JSON dump: either one object per line or a JSON array laid out
//!   one element per line. Objects without an `id64` are skipped.
//!
//! Malformed rows are counted and skipped; only I/O and store failures abort
//! the ingestion.

use serde::Deserialize;
use std::io::{self, BufRead, Read};

use crate::error::StoreError;
use crate::trie::Trie;

const NAME_COLUMN: &[u8] = b"name";
const ID_COLUMN: &[u8] = b"ed_system_address";

/// Inserts between two progress log lines.
const PROGRESS_EVERY: u64 = 1_000_000;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("input has no `{0}` column")]
    MissingColumn(&'static str),

    #[error("unable to read input")]
    Csv(#[from] csv::Error),

    #[error("unable to read input")]
    Io(#[from] io::Error),

    #[error("unable to insert into the index")]
    Store(#[from] StoreError),
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: u64,
    pub skipped: u64,
}

impl IngestSummary {
    fn inserted(&mut self) {
        self.inserted += 1;
        if self.inserted % PROGRESS_EVERY == 0 {
            tracing::info!(inserted = self.inserted, "index progress");
        }
    }
}

/// One entry of the EDSM systems dump. Only the fields the index needs.
#[derive(Deserialize, Debug)]
struct EdsmSystem {
    id64: Option<i64>,
    name: String,
}

pub fn ingest_csv<R: Read>(reader: R, trie: &mut Trie) -> Result<IngestSummary, IngestError> {
    let mut reader = csv::Reader::from_reader(reader);

    let headers = reader.byte_headers()?;
    let name_idx = headers
        .iter()
        .position(|h| h == NAME_COLUMN)
        .ok_or(IngestError::MissingColumn("name"))?;
    let id_idx = headers.iter().position(|h| h == ID_COLUMN);
    tracing::info!(name = name_idx, id = ?id_idx, "system list header read");

    let mut summary = IngestSummary::default();
    for record in reader.byte_records() {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                tracing::debug!(%err, "skipping malformed row");
                summary.skipped += 1;
                continue;
            }
        };

        if let Some(id_idx) = id_idx {
            let id = record
                .get(id_idx)
                .and_then(|id| std::str::from_utf8(id).ok())
                .and_then(|id| id.trim().parse::<i64>().ok());
            if id.is_none() {
                summary.skipped += 1;
                continue;
            }
        }

        match record.get(name_idx) {
            Some(name) if !name.is_empty() => {
                trie.insert(name)?;
                summary.inserted();
            }
            _ => summary.skipped += 1,
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        "system tree done"
    );
    Ok(summary)
}

pub fn ingest_jsonl<R: BufRead>(reader: R, trie: &mut Trie) -> Result<IngestSummary, IngestError> {
    let mut summary = IngestSummary::default();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        let line = line.strip_suffix(',').unwrap_or(line);
        if line.is_empty() || line == "[" || line == "]" {
            continue;
        }

        match serde_json::from_str::<EdsmSystem>(line) {
            Ok(EdsmSystem {
                id64: Some(_),
                name,
            }) if !name.is_empty() => {
                trie.insert(name.as_bytes())?;
                summary.inserted();
            }
            Ok(_) => summary.skipped += 1,
            Err(err) => {
                tracing::debug!(line = lineno + 1, %err, "skipping malformed line");
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        "system tree done"
    );
    Ok(summary)
}
