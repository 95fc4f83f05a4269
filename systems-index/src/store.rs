//! Offset-addressed, append-only storage of trie nodes.
//!
//! The store is one logical log of [`RECORD_SIZE`] byte records. Physically the
//! log is cut into numbered files (`index.0.dat`, `index.1.dat`, ...) holding
//! `records_per_file` records each, which keeps every individual file well
//! below 32-bit size limits. A record never straddles two files because the
//! file size is a whole multiple of the record size.
//!
//! Reads and writes are positioned (`pread`/`pwrite`), so one handle per file
//! is shared by every thread without a lock around the I/O itself. The only
//! shared mutable state is the table of open handles and the tail counter.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{StartupError, StoreError};
use crate::node::{TrieNode, NO_NODE, RECORD_SIZE};

const FILE_PREFIX: &str = "index.";
const FILE_SUFFIX: &str = ".dat";

pub struct NodeStore {
    dir: PathBuf,
    records_per_file: u64,
    file_bytes: u64,
    files: RwLock<HashMap<u64, Arc<File>>>,
    /// Byte offset where the next record goes. Moves back only to undo an
    /// append whose write failed.
    tail: AtomicI64,
    /// Offset of a record that was reserved but never written, or [`NO_NODE`].
    hole: AtomicI64,
    closed: AtomicBool,
}

impl NodeStore {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// The existing files are inspected once to find the tail of the log;
    /// after that the tail is tracked in memory.
    pub fn open(dir: impl AsRef<Path>, records_per_file: u64) -> Result<Self, StartupError> {
        if records_per_file == 0 {
            return Err(StartupError::ZeroCapacity);
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StartupError::Directory {
            path: dir.clone(),
            source,
        })?;

        let file_bytes = records_per_file * RECORD_SIZE as u64;
        let numbers = list_files(&dir)?;
        let mut tail = 0u64;
        for (expected, &number) in numbers.iter().enumerate() {
            let expected = expected as u64;
            if number != expected {
                return Err(StartupError::MissingFile(file_path(&dir, expected)));
            }
            let path = file_path(&dir, number);
            let len = fs::metadata(&path)
                .map_err(|source| StartupError::File {
                    path: path.clone(),
                    source,
                })?
                .len();

            let is_last = number + 1 == numbers.len() as u64;
            if !is_last && len != file_bytes {
                return Err(StartupError::BadFileSize {
                    path,
                    len,
                    expected: file_bytes,
                });
            }
            if is_last && (len > file_bytes || len % RECORD_SIZE as u64 != 0) {
                return Err(StartupError::BadFileSize {
                    path,
                    len,
                    expected: (len.min(file_bytes) / RECORD_SIZE as u64) * RECORD_SIZE as u64,
                });
            }
            tail += len;
        }

        tracing::debug!(
            dir = %dir.display(),
            files = numbers.len(),
            tail,
            "opened node store"
        );

        Ok(Self {
            dir,
            records_per_file,
            file_bytes,
            files: RwLock::new(HashMap::new()),
            tail: AtomicI64::new(tail as i64),
            hole: AtomicI64::new(NO_NODE),
            closed: AtomicBool::new(false),
        })
    }

    /// Opens an empty store in `dir`, deleting any index files already there.
    pub fn create(dir: impl AsRef<Path>, records_per_file: u64) -> Result<Self, StartupError> {
        if records_per_file == 0 {
            return Err(StartupError::ZeroCapacity);
        }
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| StartupError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        for number in list_files(dir)? {
            let path = file_path(dir, number);
            fs::remove_file(&path).map_err(|source| StartupError::File { path, source })?;
        }
        Self::open(dir, records_per_file)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records_per_file(&self) -> u64 {
        self.records_per_file
    }

    /// Total size of the log in bytes.
    pub fn len_bytes(&self) -> i64 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn node_count(&self) -> i64 {
        self.len_bytes() / RECORD_SIZE as i64
    }

    pub fn is_empty(&self) -> bool {
        self.len_bytes() == 0
    }

    pub fn read_node(&self, offset: i64) -> Result<TrieNode, StoreError> {
        self.check(offset)?;
        let (number, pos) = self.locate(offset);
        let file = self.handle(number)?;

        let mut record = [0u8; RECORD_SIZE];
        let got = read_full_at(&file, &mut record, pos).map_err(|source| StoreError::Io {
            file: number,
            offset,
            source,
        })?;
        if got != RECORD_SIZE {
            return Err(StoreError::ShortRead {
                file: number,
                offset,
                got,
            });
        }
        Ok(TrieNode::decode(&record)?)
    }

    /// Overwrites the record at an offset that was handed out by [`Self::append_node`].
    pub fn update_node(&self, offset: i64, node: &TrieNode) -> Result<(), StoreError> {
        self.check(offset)?;
        let record = node.encode()?;
        self.write_record(offset, &record)
    }

    /// Writes `node` at the tail of the log and returns its offset.
    ///
    /// If the write fails the reservation is handed back. When another append
    /// already reserved past it the gap cannot be closed, and every later
    /// append fails with [`StoreError::Hole`] so the files on disk never grow
    /// beyond it.
    pub fn append_node(&self, node: &TrieNode) -> Result<i64, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let hole = self.hole.load(Ordering::Acquire);
        if hole != NO_NODE {
            return Err(StoreError::Hole { offset: hole });
        }
        // Encode before reserving so a bad node never leaves a hole.
        let record = node.encode()?;
        let offset = self.tail.fetch_add(RECORD_SIZE as i64, Ordering::AcqRel);
        if let Err(err) = self.write_record(offset, &record) {
            self.release(offset);
            return Err(err);
        }
        Ok(offset)
    }

    /// Gives back the record reserved at `offset` after its write failed.
    fn release(&self, offset: i64) {
        let reserved_end = offset + RECORD_SIZE as i64;
        if self
            .tail
            .compare_exchange(reserved_end, offset, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let _ = self.hole.compare_exchange(
                NO_NODE,
                offset,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            tracing::error!(offset, dir = %self.dir.display(), "unwritten record left in node store");
        }
    }

    /// Flushes every open file to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        let files = self.files.read();
        for (&number, file) in files.iter() {
            file.sync_all().map_err(|source| StoreError::Io {
                file: number,
                offset: (number * self.file_bytes) as i64,
                source,
            })?;
        }
        Ok(())
    }

    /// Flushes and releases every open file. Later operations fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> Result<(), StoreError> {
        let mut files = self.files.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        let mut result = Ok(());
        for (number, file) in files.drain() {
            if let Err(source) = file.sync_all() {
                if result.is_ok() {
                    result = Err(StoreError::Io {
                        file: number,
                        offset: (number * self.file_bytes) as i64,
                        source,
                    });
                }
            }
        }
        tracing::debug!(dir = %self.dir.display(), "closed node store");
        result
    }

    fn check(&self, offset: i64) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let tail = self.len_bytes();
        if offset < 0 || offset % RECORD_SIZE as i64 != 0 || offset + RECORD_SIZE as i64 > tail {
            return Err(StoreError::OutOfBounds { offset, tail });
        }
        Ok(())
    }

    /// Maps a log offset to a file number and the offset inside that file.
    #[inline]
    fn locate(&self, offset: i64) -> (u64, u64) {
        let offset = offset as u64;
        (offset / self.file_bytes, offset % self.file_bytes)
    }

    fn write_record(&self, offset: i64, record: &[u8]) -> Result<(), StoreError> {
        let (number, pos) = self.locate(offset);
        let file = self.handle(number)?;
        write_all_at(&file, record, pos).map_err(|source| StoreError::Io {
            file: number,
            offset,
            source,
        })
    }

    fn handle(&self, number: u64) -> Result<Arc<File>, StoreError> {
        if let Some(file) = self.files.read().get(&number) {
            return Ok(Arc::clone(file));
        }

        let mut files = self.files.write();
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if let Some(file) = files.get(&number) {
            return Ok(Arc::clone(file));
        }
        let path = file_path(&self.dir, number);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                file: number,
                offset: (number * self.file_bytes) as i64,
                source,
            })?;
        tracing::debug!(path = %path.display(), "opened index file");
        let file = Arc::new(file);
        files.insert(number, Arc::clone(&file));
        Ok(file)
    }
}

fn file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{number}{FILE_SUFFIX}"))
}

/// Returns the numbers of every `index.<N>.dat` in `dir`, sorted.
fn list_files(dir: &Path) -> Result<Vec<u64>, StartupError> {
    let entries = fs::read_dir(dir).map_err(|source| StartupError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut numbers = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StartupError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let number = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            .and_then(|number| number.parse::<u64>().ok());
        if let Some(number) = number {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

fn read_full_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match read_at(file, &mut buf[done..], pos + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(done)
}

fn write_all_at(file: &File, buf: &[u8], pos: u64) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match write_at(file, &buf[done..], pos + done as u64) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => done += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(unix)]
#[inline]
fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, pos)
}

#[cfg(unix)]
#[inline]
fn write_at(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, pos)
}

#[cfg(windows)]
#[inline]
fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, pos)
}

#[cfg(windows)]
#[inline]
fn write_at(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, pos)
}
