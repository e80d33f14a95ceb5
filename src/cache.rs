//! The write-back cache between codec output and the filesystem.
//!
//! Solid containers decode many small files out of one shared block, and a
//! disk write per delivered chunk is ruinous. The cache accumulates decoded
//! bytes for any number of files in one growable buffer and turns them into
//! large sequential writes at flush time. A file whose data spans a flush
//! boundary is carried across it as the continuation record: its handle
//! stays open and later bytes append where the previous flush stopped.

use std::fs::{self, File};
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::policy::ErrorPolicy;

/// Smallest useful buffer; anything below this flushes too often to matter.
const CAPACITY_FLOOR: usize = 10 << 20;
/// Largest buffer worth holding regardless of machine size.
const CAPACITY_CEILING: usize = 100 << 20;
/// Disk writes are issued in blocks of this size.
const WRITE_BLOCK: usize = 1 << 20;

#[derive(Debug)]
struct PendingFile {
    path: PathBuf,
    declared_size: u64,
    /// Start of this file's bytes in the buffer.
    offset: usize,
    /// Bytes buffered so far (since the last flush, for a continuation).
    buffered: usize,
}

#[derive(Debug)]
struct OpenDestination {
    path: PathBuf,
    /// `None` once the file is in error; later bytes for it are swallowed.
    file: Option<File>,
    written: u64,
    declared_size: u64,
    /// Delete the destination at close instead of leaving it truncated.
    remove: bool,
}

pub struct WriteCache {
    buffer: Vec<u8>,
    capacity: usize,
    pending: Vec<PendingFile>,
    /// Handle left open across a flush boundary for the continuation
    /// record, closed either by the next flush or by [`finalize`].
    ///
    /// [`finalize`]: WriteCache::finalize
    open: Option<OpenDestination>,
}

impl WriteCache {
    /// Capacity chosen from available physical memory, clamped to
    /// [10 MiB, 100 MiB].
    pub fn new() -> WriteCache {
        WriteCache::with_capacity(default_capacity())
    }

    /// Exact capacity, no clamping. The buffer grows toward it on demand
    /// rather than being committed up front.
    pub fn with_capacity(capacity: usize) -> WriteCache {
        WriteCache {
            buffer: Vec::new(),
            capacity: capacity.max(1),
            pending: Vec::new(),
            open: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered and not yet flushed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Begin accumulating a new file at the current write offset.
    pub fn store_file(&mut self, path: PathBuf, declared_size: u64) {
        self.pending.push(PendingFile {
            path,
            declared_size,
            offset: self.buffer.len(),
            buffered: 0,
        });
    }

    /// Append data to the file most recently begun with
    /// [`store_file`](WriteCache::store_file), flushing whenever the buffer
    /// fills.
    pub fn store_data(&mut self, mut data: &[u8], policy: &mut ErrorPolicy<'_>) -> Result<()> {
        debug_assert!(!self.pending.is_empty(), "store_data before store_file");
        if self.pending.is_empty() {
            return Ok(());
        }

        while !data.is_empty() {
            if self.buffer.len() == self.capacity {
                self.flush(policy)?;
            }
            let take = (self.capacity - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            if let Some(record) = self.pending.last_mut() {
                record.buffered += take;
            }
            data = &data[take..];
        }
        Ok(())
    }

    /// Write every pending record's buffered bytes out in arrival order,
    /// then keep only the trailing record (reset to empty) since its data
    /// may continue past this boundary.
    pub fn flush(&mut self, policy: &mut ErrorPolicy<'_>) -> Result<()> {
        let mut records = mem::take(&mut self.pending);
        let flushed = self.buffer.len();

        for (position, record) in records.iter().enumerate() {
            let continuation = position == 0
                && self
                    .open
                    .as_ref()
                    .map_or(false, |open| open.path == record.path);
            if !continuation {
                close_destination(self.open.take(), policy)?;
                self.open = Some(open_destination(record, policy)?);
            }
            if let Some(open) = self.open.as_mut() {
                let data = &self.buffer[record.offset..record.offset + record.buffered];
                write_blocks(open, data, policy)?;
            }
        }

        if let Some(mut trailing) = records.pop() {
            trailing.offset = 0;
            trailing.buffered = 0;
            self.pending.push(trailing);
        }
        self.buffer.clear();
        tracing::trace!(bytes = flushed, "cache flush");
        Ok(())
    }

    /// Final flush, then close the remaining handle. The cache is reusable
    /// afterwards but holds nothing.
    pub fn finalize(&mut self, policy: &mut ErrorPolicy<'_>) -> Result<()> {
        self.flush(policy)?;
        self.pending.clear();
        close_destination(self.open.take(), policy)
    }
}

impl Default for WriteCache {
    fn default() -> WriteCache {
        WriteCache::new()
    }
}

fn default_capacity() -> usize {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let suggested = (system.available_memory() / 8) as usize;
    suggested.clamp(CAPACITY_FLOOR, CAPACITY_CEILING)
}

/// Create the destination and pre-extend it to its declared size, so the
/// filesystem can allocate it contiguously before the streaming writes.
fn open_destination(
    record: &PendingFile,
    policy: &mut ErrorPolicy<'_>,
) -> Result<OpenDestination> {
    let mut open = OpenDestination {
        path: record.path.clone(),
        file: None,
        written: 0,
        declared_size: record.declared_size,
        remove: false,
    };
    match File::create(&record.path) {
        Ok(file) => {
            if let Err(source) = file.set_len(record.declared_size) {
                open.remove = true;
                report_io(policy, &record.path, source)?;
            } else {
                open.file = Some(file);
            }
        }
        Err(source) => {
            report_io(policy, &record.path, source)?;
        }
    }
    Ok(open)
}

fn write_blocks(
    open: &mut OpenDestination,
    data: &[u8],
    policy: &mut ErrorPolicy<'_>,
) -> Result<()> {
    for block in data.chunks(WRITE_BLOCK) {
        let result = match open.file.as_mut() {
            Some(file) => file.write_all(block),
            // in error: swallow the rest of this file's bytes
            None => return Ok(()),
        };
        match result {
            Ok(()) => open.written += block.len() as u64,
            Err(source) => {
                open.file = None;
                open.remove = true;
                let path = open.path.clone();
                report_io(policy, &path, source)?;
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Close a handle: delete a poisoned destination, or trim any pre-extension
/// past what was actually delivered.
fn close_destination(open: Option<OpenDestination>, policy: &mut ErrorPolicy<'_>) -> Result<()> {
    let Some(open) = open else {
        return Ok(());
    };
    if open.remove {
        drop(open.file);
        let _ = fs::remove_file(&open.path);
        tracing::debug!(path = %open.path.display(), "removed failed destination");
        return Ok(());
    }
    if let Some(file) = open.file {
        if open.written != open.declared_size {
            if let Err(source) = file.set_len(open.written) {
                report_io(policy, &open.path, source)?;
            }
        }
    }
    Ok(())
}

fn report_io(policy: &mut ErrorPolicy<'_>, path: &Path, source: std::io::Error) -> Result<()> {
    policy.handle(
        path,
        Error::Io {
            path: path.to_path_buf(),
            source,
        },
        false,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Unattended;

    fn read(path: &Path) -> Vec<u8> {
        fs::read(path).unwrap()
    }

    #[test]
    fn split_file_survives_flush_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x");
        let y = dir.path().join("y");
        let mut ui = Unattended;
        let mut policy = ErrorPolicy::new(&mut ui, false);

        let mut cache = WriteCache::with_capacity(1000);
        cache.store_file(x.clone(), 600);
        cache.store_data(&[0xAA; 600], &mut policy).unwrap();
        cache.store_file(y.clone(), 600);
        cache.store_data(&[0xBB; 600], &mut policy).unwrap();

        // the buffer filled at 1000 bytes, forcing one interior flush: "x"
        // is complete on disk already, "y" got its first 400 bytes
        assert_eq!(read(&x), vec![0xAA; 600]);
        assert_eq!(cache.buffered(), 200);

        cache.finalize(&mut policy).unwrap();
        assert_eq!(read(&y), vec![0xBB; 600]);
        assert!(policy.log().is_empty());
    }

    #[test]
    fn bytes_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let mut ui = Unattended;
        let mut policy = ErrorPolicy::new(&mut ui, false);
        let mut cache = WriteCache::with_capacity(64);

        let payloads: Vec<(PathBuf, Vec<u8>)> = (0u8..5)
            .map(|n| {
                let bytes: Vec<u8> = (0..(n as usize * 37 + 3)).map(|i| i as u8 ^ n).collect();
                (dir.path().join(format!("f{}", n)), bytes)
            })
            .collect();

        for (path, bytes) in &payloads {
            cache.store_file(path.clone(), bytes.len() as u64);
            // deliver in awkward chunk sizes
            for chunk in bytes.chunks(7) {
                cache.store_data(chunk, &mut policy).unwrap();
            }
        }
        cache.finalize(&mut policy).unwrap();

        for (path, bytes) in &payloads {
            assert_eq!(&read(path), bytes, "{}", path.display());
        }
        assert!(policy.log().is_empty());
    }

    #[test]
    fn chunk_larger_than_whole_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let mut ui = Unattended;
        let mut policy = ErrorPolicy::new(&mut ui, false);
        let mut cache = WriteCache::with_capacity(16);

        let bytes: Vec<u8> = (0..100u8).collect();
        cache.store_file(path.clone(), bytes.len() as u64);
        cache.store_data(&bytes, &mut policy).unwrap();
        cache.finalize(&mut policy).unwrap();

        assert_eq!(read(&path), bytes);
    }

    #[test]
    fn over_allocation_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        let mut ui = Unattended;
        let mut policy = ErrorPolicy::new(&mut ui, false);
        let mut cache = WriteCache::with_capacity(1024);

        // declared 100 bytes but only 40 arrive
        cache.store_file(path.clone(), 100);
        cache.store_data(&[7u8; 40], &mut policy).unwrap();
        cache.finalize(&mut policy).unwrap();

        assert_eq!(read(&path).len(), 40);
    }

    #[test]
    fn failed_file_does_not_poison_later_ones() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("a");
        let good = dir.path().join("b");
        let mut ui = Unattended;
        let mut policy = ErrorPolicy::new(&mut ui, false);
        let mut cache = WriteCache::with_capacity(1024);

        cache.store_file(missing.clone(), 3);
        cache.store_data(b"abc", &mut policy).unwrap();
        cache.store_file(good.clone(), 3);
        cache.store_data(b"xyz", &mut policy).unwrap();
        cache.finalize(&mut policy).unwrap();

        assert!(!missing.exists());
        assert_eq!(read(&good), b"xyz");
        assert_eq!(policy.log().len(), 1);
    }

    #[test]
    fn empty_flush_is_harmless() {
        let mut ui = Unattended;
        let mut policy = ErrorPolicy::new(&mut ui, false);
        let mut cache = WriteCache::with_capacity(128);
        cache.flush(&mut policy).unwrap();
        cache.finalize(&mut policy).unwrap();
    }
}
