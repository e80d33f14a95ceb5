//! The error/retry policy shared by extraction and index operations.
//!
//! One [`ErrorPolicy`] lives for the duration of one operation. It owns the
//! skip-all latch and the accumulated [`ErrorLog`], and it is the only place
//! that talks to the UI collaborator, so the "continue vs. abort vs. ask"
//! decision is a function of this context plus the incoming error.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::codec::{CodecError, OpenHost};
use crate::error::Error;
use crate::progress::Stopwatch;

/// Answer to an overwrite prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteChoice {
    Yes,
    YesAll,
    No,
    NoAll,
    Cancel,
}

/// Answer to an error prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryChoice {
    Retry,
    Ignore,
    IgnoreAll,
    Cancel,
}

/// What a prompt can say about each side of a conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileInfo {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// The modal-dialog surface the host provides. Prompts happen while the
/// codec's call is still on the stack; the policy pauses its stopwatch
/// around each one.
pub trait InteractionHandler {
    fn ask_overwrite(&mut self, path: &Path, src: &FileInfo, dst: &FileInfo) -> OverwriteChoice;

    fn ask_password(&mut self) -> Option<String>;

    fn ask_retry(&mut self, path: &Path, error: &Error, can_retry: bool) -> RetryChoice;
}

/// Non-interactive handler: keeps existing files, skips failing ones,
/// supplies no password.
pub struct Unattended;

impl InteractionHandler for Unattended {
    fn ask_overwrite(&mut self, _path: &Path, _src: &FileInfo, _dst: &FileInfo) -> OverwriteChoice {
        OverwriteChoice::No
    }

    fn ask_password(&mut self) -> Option<String> {
        None
    }

    fn ask_retry(&mut self, _path: &Path, _error: &Error, _can_retry: bool) -> RetryChoice {
        RetryChoice::Ignore
    }
}

#[derive(Debug)]
pub struct ErrorLogEntry {
    pub path: PathBuf,
    pub error: Error,
}

/// Errors that were skipped over during an operation. A non-empty log on an
/// otherwise successful return is the host's cue to show a summary.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Vec<ErrorLogEntry>,
}

impl ErrorLog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorLogEntry> {
        self.entries.iter()
    }

    fn push(&mut self, path: &Path, error: Error) {
        self.entries.push(ErrorLogEntry {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// What the caller should do after [`ErrorPolicy::handle`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Skip,
}

pub struct ErrorPolicy<'a> {
    ui: &'a mut dyn InteractionHandler,
    watch: Stopwatch,
    ignore_all: bool,
    log: ErrorLog,
}

impl<'a> ErrorPolicy<'a> {
    /// `ignore_all` pre-latched means every error is logged and skipped
    /// without a prompt (the "ignore errors" extraction option).
    pub fn new(ui: &'a mut dyn InteractionHandler, ignore_all: bool) -> ErrorPolicy<'a> {
        ErrorPolicy {
            ui,
            watch: Stopwatch::start(),
            ignore_all,
            log: ErrorLog::default(),
        }
    }

    /// Route one error. `Ok(Decision::Retry)` means the caller should rerun
    /// the failed step; `Ok(Decision::Skip)` means it was logged and the
    /// operation continues; `Err` is the abort unwinding.
    pub fn handle(&mut self, path: &Path, error: Error, can_retry: bool) -> Result<Decision, Error> {
        if error.is_abort() {
            return Err(Error::Aborted);
        }
        if self.ignore_all {
            tracing::warn!(path = %path.display(), %error, "skipped");
            self.log.push(path, error);
            return Ok(Decision::Skip);
        }

        self.watch.pause();
        let choice = self.ui.ask_retry(path, &error, can_retry);
        self.watch.resume();

        match choice {
            RetryChoice::Retry if can_retry => Ok(Decision::Retry),
            RetryChoice::Retry | RetryChoice::Ignore => {
                tracing::warn!(path = %path.display(), %error, "skipped");
                self.log.push(path, error);
                Ok(Decision::Skip)
            }
            RetryChoice::IgnoreAll => {
                self.ignore_all = true;
                tracing::warn!(path = %path.display(), %error, "skipped; ignoring further errors");
                self.log.push(path, error);
                Ok(Decision::Skip)
            }
            RetryChoice::Cancel => Err(Error::Aborted),
        }
    }

    pub fn ask_overwrite(&mut self, path: &Path, src: &FileInfo, dst: &FileInfo) -> OverwriteChoice {
        self.watch.pause();
        let choice = self.ui.ask_overwrite(path, src, dst);
        self.watch.resume();
        choice
    }

    pub fn ask_password(&mut self) -> Option<String> {
        self.watch.pause();
        let password = self.ui.ask_password();
        self.watch.resume();
        password
    }

    /// Working time so far, excluding time spent in prompts.
    pub fn elapsed(&self) -> Duration {
        self.watch.elapsed()
    }

    pub fn log(&self) -> &ErrorLog {
        &self.log
    }

    pub fn into_log(self) -> ErrorLog {
        self.log
    }
}

/// During detection-inside-an-operation the policy doubles as the open
/// host, so password prompts pause the same stopwatch.
impl OpenHost for ErrorPolicy<'_> {
    fn password(&mut self) -> Result<Option<String>, CodecError> {
        Ok(self.ask_password())
    }
}
