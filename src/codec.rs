//! The boundary to the external codec collaborator.
//!
//! Everything format-specific lives on the far side of these traits: a
//! [`CodecRegistry`] enumerates the installed formats, a [`Codec`] knows how
//! to open one of them, and an opened container is an [`ArchiveReader`].
//! Errors never cross this boundary as panics; every callback returns a
//! [`CodecError`] status and the caller translates it back into the crate's
//! error type at its own call site.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;
use std::time::SystemTime;

/// A readable, seekable byte stream a container can be opened from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Identifier for a container format, unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FormatId(pub u32);

/// What a registry knows about one installed format.
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Display name, e.g. `"7z"` or `"tar"`.
    pub name: String,
    pub id: FormatId,
    /// Magic bytes searched for in the stream prefix. Formats without a
    /// signature are only opened when requested by name.
    pub signature: Option<Vec<u8>>,
    /// Lower-case file extensions, without the leading dot.
    pub extensions: Vec<String>,
}

/// Property ids this crate queries per item (or once per archive, for the
/// archive-level timestamp defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemProperty {
    Path,
    IsDirectory,
    Attributes,
    Size,
    PackedSize,
    Created,
    Modified,
    Accessed,
}

/// Tagged value returned by property queries. A codec answering with an
/// unexpected tag is treated the same as one answering not-at-all: the
/// caller falls back to that property's default.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Str(String),
    UInt32(u32),
    UInt64(u64),
    Time(SystemTime),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Accepts both unsigned widths; the narrower one widens.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::UInt32(v) => Some(u64::from(*v)),
            PropertyValue::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<SystemTime> {
        match self {
            PropertyValue::Time(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Decode and deliver data to the sink's streams.
    Extract,
    /// Decode and verify only; the sink is told outcomes but gets no data.
    Test,
}

/// Per-item outcome reported by the codec after processing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    Ok,
    UnsupportedMethod,
    DataError,
    ChecksumError,
}

/// Status type used on every call crossing the codec boundary, in either
/// direction. [`CodecError::Aborted`] is the cancellation signal travelling
/// through the codec's call stack back to this crate.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("operation aborted")]
    Aborted,

    #[error("codec status {0}")]
    Status(i32),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("operation not supported by this codec")]
    Unsupported,

    #[error("{0}")]
    Other(String),
}

impl CodecError {
    pub fn other(message: impl Into<String>) -> CodecError {
        CodecError::Other(message.into())
    }
}

/// Callback object handed to [`Codec::open`]. Lets the codec request a
/// password and report open progress.
pub trait OpenHost {
    fn password(&mut self) -> Result<Option<String>, CodecError> {
        Ok(None)
    }

    fn progress(&mut self, _position: u64) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Open host that supplies no password and ignores progress.
pub struct SilentOpenHost;

impl OpenHost for SilentOpenHost {}

/// An unopened codec instance for one format. Opening consumes it; a
/// successfully opened container is an [`ArchiveReader`].
pub trait Codec {
    fn open(
        self: Box<Self>,
        stream: Box<dyn ReadSeek>,
        host: &mut dyn OpenHost,
    ) -> Result<Box<dyn ArchiveReader>, CodecError>;
}

/// Callback object driven by [`ArchiveReader::extract`]. The codec asks for
/// an output stream per item (`None` meaning the item is intentionally
/// discarded), pushes decoded bytes through it, and reports the outcome once
/// the item is done.
pub trait ExtractSink {
    fn stream(&mut self, index: u32) -> Result<Option<&mut dyn Write>, CodecError>;

    fn result(&mut self, index: u32, outcome: ExtractOutcome) -> Result<(), CodecError>;

    fn progress(&mut self, _completed: u64, _total: u64) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Metadata and data supplier for [`ArchiveReader::update`].
pub trait UpdateSource {
    fn item_property(
        &mut self,
        index: u32,
        property: ItemProperty,
    ) -> Result<Option<PropertyValue>, CodecError>;

    fn item_stream(&mut self, index: u32) -> Result<Box<dyn Read + '_>, CodecError>;
}

/// An opened container. Items are addressed by the codec's flat zero-based
/// index; structure is this crate's business, not the codec's.
pub trait ArchiveReader {
    fn item_count(&self) -> Result<u32, CodecError>;

    fn item_property(
        &self,
        index: u32,
        property: ItemProperty,
    ) -> Result<Option<PropertyValue>, CodecError>;

    /// Archive-level property, used as the default for items that omit it.
    fn archive_property(&self, _property: ItemProperty) -> Result<Option<PropertyValue>, CodecError> {
        Ok(None)
    }

    /// Batch extraction. `indices` must be sorted ascending.
    fn extract(
        &mut self,
        indices: &[u32],
        mode: ExtractMode,
        sink: &mut dyn ExtractSink,
    ) -> Result<(), CodecError>;

    /// The single embedded payload stream, for container-in-container
    /// formats (e.g. a self-extractor wrapping a plain archive).
    fn main_substream(&mut self) -> Result<Option<Box<dyn ReadSeek>>, CodecError> {
        Ok(None)
    }

    /// Write a new revision of the container with `item_count` new or
    /// changed items supplied by `source`. Optional; read-only codecs keep
    /// the default.
    fn update(
        &mut self,
        _item_count: u32,
        _source: &mut dyn UpdateSource,
        _output: &mut dyn Write,
    ) -> Result<(), CodecError> {
        Err(CodecError::Unsupported)
    }
}

/// The installed-codec enumeration this crate consumes.
pub trait CodecRegistry {
    fn formats(&self) -> &[FormatInfo];

    fn create(&self, id: FormatId) -> Option<Box<dyn Codec>>;

    /// Formats whose extension list matches `file_name`, in registry order.
    fn formats_for_extension(&self, file_name: &str) -> Vec<FormatId> {
        let lower = file_name.to_ascii_lowercase();
        self.formats()
            .iter()
            .filter(|info| {
                info.extensions
                    .iter()
                    .any(|ext| lower.ends_with(&format!(".{}", ext)))
            })
            .map(|info| info.id)
            .collect()
    }
}

type CodecFactory = Box<dyn Fn() -> Box<dyn Codec>>;

/// In-process [`CodecRegistry`] over closures. Hosts with real module
/// loading implement the trait themselves.
#[derive(Default)]
pub struct Registry {
    formats: Vec<FormatInfo>,
    factories: HashMap<FormatId, CodecFactory>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register<F>(&mut self, info: FormatInfo, factory: F)
    where
        F: Fn() -> Box<dyn Codec> + 'static,
    {
        self.factories.insert(info.id, Box::new(factory));
        self.formats.push(info);
    }
}

impl CodecRegistry for Registry {
    fn formats(&self) -> &[FormatInfo] {
        &self.formats
    }

    fn create(&self, id: FormatId) -> Option<Box<dyn Codec>> {
        self.factories.get(&id).map(|factory| factory())
    }
}

/// Clonable handle over a single underlying stream, so several open
/// attempts (and an opened reader) can share it the way the original
/// reference-counted stream interface did. Single-threaded by design:
/// borrows last only for the duration of one `read`/`seek` call.
#[derive(Clone)]
pub struct SharedStream {
    inner: Rc<RefCell<Box<dyn ReadSeek>>>,
}

impl SharedStream {
    pub fn new(stream: Box<dyn ReadSeek>) -> SharedStream {
        SharedStream {
            inner: Rc::new(RefCell::new(stream)),
        }
    }
}

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.borrow_mut().read(buf)
    }
}

impl Seek for SharedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.borrow_mut().seek(pos)
    }
}
