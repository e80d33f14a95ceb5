//! The extraction scheduler.
//!
//! Expands a selection of tree entries to their file descendants, eagerly
//! creates destination directories, and drives one batch extract call on the
//! codec, routing all output through the [`WriteCache`]. A second pass over
//! the originally selected entries restores attributes and timestamps once
//! every handle is closed.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::cache::WriteCache;
use crate::codec::{
    ArchiveReader, CodecError, ExtractMode, ExtractOutcome, ExtractSink,
};
use crate::entry::{Entry, EntryId};
use crate::error::{Corruption, Error, Result};
use crate::path::sanitize_relative;
use crate::policy::{
    Decision, ErrorLog, ErrorPolicy, FileInfo, InteractionHandler, OverwriteChoice,
};
use crate::progress::AbortFlag;
use crate::tree::Tree;

/// What to do when a destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Ask the UI collaborator, remembering a "for all remaining" answer.
    #[default]
    Ask,
    Always,
    Never,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub destination: PathBuf,
    pub overwrite: OverwritePolicy,
    /// Pre-latch the skip-all state: log every per-file error without
    /// prompting.
    pub ignore_errors: bool,
    /// Write-back cache capacity override; `None` sizes it from available
    /// memory.
    pub cache_capacity: Option<usize>,
    pub abort: Option<AbortFlag>,
}

impl ExtractOptions {
    pub fn new(destination: impl Into<PathBuf>) -> ExtractOptions {
        ExtractOptions {
            destination: destination.into(),
            overwrite: OverwritePolicy::default(),
            ignore_errors: false,
            cache_capacity: None,
            abort: None,
        }
    }
}

pub(crate) fn run(
    reader: &mut dyn ArchiveReader,
    tree: &Tree,
    base: Option<EntryId>,
    selected: &[EntryId],
    options: &ExtractOptions,
    mode: ExtractMode,
    ui: &mut dyn InteractionHandler,
) -> Result<ErrorLog> {
    let mut policy = ErrorPolicy::new(ui, options.ignore_errors);

    // expand directories to file descendants, pre-creating destination
    // directories as we go
    let mut files: Vec<u32> = Vec::new();
    let mut produced: HashMap<EntryId, PathBuf> = HashMap::new();
    for &id in selected {
        expand(tree, id, base, options, mode, &mut policy, &mut files, &mut produced)?;
    }
    files.sort_unstable();
    files.dedup();
    tracing::debug!(files = files.len(), ?mode, "extraction batch");

    let written = {
        let cache = match options.cache_capacity {
            Some(capacity) => WriteCache::with_capacity(capacity),
            None => WriteCache::new(),
        };
        let mut sink = SchedulerSink {
            tree,
            base,
            destination: &options.destination,
            overwrite: options.overwrite,
            mode,
            policy: &mut policy,
            cache,
            remembered: None,
            abort: options.abort.clone(),
            written: Vec::new(),
            first_error: None,
        };
        let outcome = reader.extract(&files, mode, &mut sink);
        sink.finish(outcome)?
    };

    if mode == ExtractMode::Extract {
        for (id, path) in written {
            produced.insert(id, path);
        }
        for &id in selected {
            restore_metadata(tree, id, &produced);
        }
    }

    Ok(policy.into_log())
}

/// Depth-first expansion. Directory creation failures go through the
/// policy; a skipped directory skips its whole subtree.
#[allow(clippy::too_many_arguments)]
fn expand(
    tree: &Tree,
    id: EntryId,
    base: Option<EntryId>,
    options: &ExtractOptions,
    mode: ExtractMode,
    policy: &mut ErrorPolicy<'_>,
    files: &mut Vec<u32>,
    produced: &mut HashMap<EntryId, PathBuf>,
) -> Result<()> {
    let entry = tree.entry(id);
    if !entry.is_directory() {
        if let Some(item) = entry.codec_item {
            files.push(item);
        }
        return Ok(());
    }

    if mode == ExtractMode::Extract {
        let Some(destination) = destination_for(tree, id, base, &options.destination) else {
            let unusable = options.destination.join(&entry.name);
            report_unrepresentable(policy, &unusable)?;
            return Ok(());
        };
        loop {
            match fs::create_dir_all(&destination) {
                Ok(()) => {
                    produced.insert(id, destination.clone());
                    break;
                }
                Err(source) => {
                    let error = Error::Io {
                        path: destination.clone(),
                        source,
                    };
                    match policy.handle(&destination, error, true)? {
                        Decision::Retry => continue,
                        Decision::Skip => return Ok(()),
                    }
                }
            }
        }
    }

    for &child in tree.children(Some(id)) {
        expand(tree, child, base, options, mode, policy, files, produced)?;
    }
    Ok(())
}

fn destination_for(
    tree: &Tree,
    id: EntryId,
    base: Option<EntryId>,
    root: &Path,
) -> Option<PathBuf> {
    let components = tree.relative_components(id, base)?;
    let relative = sanitize_relative(components.into_iter())?;
    Some(root.join(relative))
}

fn report_unrepresentable(policy: &mut ErrorPolicy<'_>, path: &Path) -> Result<()> {
    let error = Error::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "unrepresentable name"),
    };
    policy.handle(path, error, false)?;
    Ok(())
}

struct SchedulerSink<'a, 'u> {
    tree: &'a Tree,
    base: Option<EntryId>,
    destination: &'a Path,
    overwrite: OverwritePolicy,
    mode: ExtractMode,
    policy: &'a mut ErrorPolicy<'u>,
    cache: WriteCache,
    /// Remembered yes-all / no-all overwrite answer.
    remembered: Option<bool>,
    abort: Option<AbortFlag>,
    written: Vec<(EntryId, PathBuf)>,
    /// First error raised inside a callback; the codec only sees a status,
    /// this is the real cause rethrown at the call site.
    first_error: Option<Error>,
}

impl SchedulerSink<'_, '_> {
    /// Decide whether item `index` gets an output stream. `Ok(None)` is an
    /// intentional skip the codec must treat as discarded output.
    fn prepare(&mut self, index: u32) -> Result<Option<()>> {
        if self.mode == ExtractMode::Test {
            return Ok(None);
        }
        let Some(id) = self.tree.entry_for_item(index) else {
            return Ok(None);
        };
        let entry = self.tree.entry(id);
        if entry.is_directory() {
            return Ok(None);
        }

        let Some(destination) = destination_for(self.tree, id, self.base, self.destination)
        else {
            let unusable = self.destination.join(&entry.name);
            report_unrepresentable(self.policy, &unusable)?;
            return Ok(None);
        };

        if let Ok(existing) = fs::symlink_metadata(&destination) {
            if !self.should_overwrite(entry, &destination, &existing)? {
                tracing::debug!(path = %destination.display(), "kept existing file");
                return Ok(None);
            }
            // a read-only survivor would refuse the create call
            let mut permissions = existing.permissions();
            if permissions.readonly() {
                permissions.set_readonly(false);
                let _ = fs::set_permissions(&destination, permissions);
            }
        } else if let Some(parent) = destination.parent() {
            // selected files deep in an unselected subtree still need
            // their directories
            let _ = fs::create_dir_all(parent);
        }

        self.cache.store_file(destination.clone(), entry.size);
        self.written.push((id, destination));
        Ok(Some(()))
    }

    fn should_overwrite(
        &mut self,
        entry: &Entry,
        destination: &Path,
        existing: &fs::Metadata,
    ) -> Result<bool> {
        match self.overwrite {
            OverwritePolicy::Always => Ok(true),
            OverwritePolicy::Never => Ok(false),
            OverwritePolicy::Ask => {
                if let Some(answer) = self.remembered {
                    return Ok(answer);
                }
                let src = FileInfo {
                    size: entry.size,
                    modified: entry.modified,
                };
                let dst = FileInfo {
                    size: existing.len(),
                    modified: existing.modified().ok(),
                };
                match self.policy.ask_overwrite(destination, &src, &dst) {
                    OverwriteChoice::Yes => Ok(true),
                    OverwriteChoice::No => Ok(false),
                    OverwriteChoice::YesAll => {
                        self.remembered = Some(true);
                        Ok(true)
                    }
                    OverwriteChoice::NoAll => {
                        self.remembered = Some(false);
                        Ok(false)
                    }
                    OverwriteChoice::Cancel => Err(Error::Aborted),
                }
            }
        }
    }

    /// Record a fatal callback error and hand the codec the status that
    /// unwinds its call.
    fn fail(&mut self, error: Error) -> CodecError {
        let status = if error.is_abort() {
            CodecError::Aborted
        } else {
            CodecError::other("host callback failed")
        };
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
        status
    }

    fn finish(mut self, outcome: std::result::Result<(), CodecError>) -> Result<Vec<(EntryId, PathBuf)>> {
        if let Some(error) = self.first_error.take() {
            return Err(error);
        }
        match outcome {
            Ok(()) => {
                if self.mode == ExtractMode::Extract {
                    self.cache.finalize(self.policy)?;
                }
                Ok(self.written)
            }
            Err(CodecError::Aborted) => Err(Error::Aborted),
            Err(error) => Err(Error::Codec(error)),
        }
    }
}

impl ExtractSink for SchedulerSink<'_, '_> {
    fn stream(&mut self, index: u32) -> std::result::Result<Option<&mut dyn Write>, CodecError> {
        match self.prepare(index) {
            Ok(Some(())) => Ok(Some(self)),
            Ok(None) => Ok(None),
            Err(error) => Err(self.fail(error)),
        }
    }

    fn result(&mut self, index: u32, outcome: ExtractOutcome) -> std::result::Result<(), CodecError> {
        let kind = match outcome {
            ExtractOutcome::Ok => return Ok(()),
            ExtractOutcome::UnsupportedMethod => Corruption::UnsupportedMethod,
            ExtractOutcome::DataError => Corruption::DataError,
            ExtractOutcome::ChecksumError => Corruption::ChecksumMismatch,
        };
        let path = self
            .tree
            .entry_for_item(index)
            .and_then(|id| destination_for(self.tree, id, self.base, self.destination))
            .unwrap_or_else(|| self.destination.to_path_buf());
        let error = Error::Corrupt {
            path: path.clone(),
            kind,
        };
        match self.policy.handle(&path, error, false) {
            Ok(Decision::Retry | Decision::Skip) => Ok(()),
            Err(error) => Err(self.fail(error)),
        }
    }

    fn progress(&mut self, _completed: u64, _total: u64) -> std::result::Result<(), CodecError> {
        if let Some(abort) = &self.abort {
            if abort.is_raised() {
                return Err(self.fail(Error::Aborted));
            }
        }
        Ok(())
    }
}

/// Decoded bytes land here; the cache decides when the disk sees them.
impl Write for SchedulerSink<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.cache.store_data(buf, self.policy) {
            Ok(()) => Ok(buf.len()),
            Err(error) => {
                if self.first_error.is_none() {
                    self.first_error = Some(error);
                }
                // not Interrupted: write_all would retry that forever
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "extraction callback failed",
                ))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // the cache flushes on its own schedule
        Ok(())
    }
}

/// Restore attributes and timestamps over the selected entries,
/// depth-first so children are finished before their directory: writing
/// into a directory would disturb the timestamps just restored on it.
fn restore_metadata(tree: &Tree, id: EntryId, produced: &HashMap<EntryId, PathBuf>) {
    let entry = tree.entry(id);
    if entry.is_directory() {
        for &child in tree.children(Some(id)) {
            restore_metadata(tree, child, produced);
        }
    }
    let Some(path) = produced.get(&id) else {
        return;
    };
    apply_metadata(entry, path);
}

fn apply_metadata(entry: &Entry, path: &Path) {
    // the target must be writable while its times are set; the final
    // read-only bit goes on last
    if let Ok(metadata) = fs::metadata(path) {
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            let _ = fs::set_permissions(path, permissions);
        }
    }

    let mut times = fs::FileTimes::new();
    let mut any = false;
    if let Some(modified) = entry.modified {
        times = times.set_modified(modified);
        any = true;
    }
    if let Some(accessed) = entry.accessed {
        times = times.set_accessed(accessed);
        any = true;
    }
    if any {
        let handle = if entry.is_directory() {
            File::open(path)
        } else {
            File::options().write(true).open(path)
        };
        match handle {
            Ok(file) => {
                if let Err(error) = file.set_times(times) {
                    tracing::debug!(path = %path.display(), %error, "could not restore timestamps");
                }
            }
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "could not reopen for timestamps");
            }
        }
    }

    if entry.attributes.is_read_only() {
        if let Ok(metadata) = fs::metadata(path) {
            let mut permissions = metadata.permissions();
            permissions.set_readonly(true);
            let _ = fs::set_permissions(path, permissions);
        }
    }
}
