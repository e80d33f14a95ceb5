mod archive;
mod cache;
pub mod codec;
mod detect;
mod entry;
mod error;
mod extract;
pub mod path;
mod policy;
mod progress;
mod tree;

pub use archive::Archive;
pub use cache::WriteCache;
pub use codec::{
    ArchiveReader, Codec, CodecError, CodecRegistry, ExtractMode, ExtractOutcome, ExtractSink,
    FormatId, FormatInfo, ItemProperty, OpenHost, PropertyValue, ReadSeek, Registry, SharedStream,
    SilentOpenHost, UpdateSource,
};
pub use detect::{detect, open_as, DetectOptions, DetectedChain};
pub use entry::{Attributes, Entry, EntryId};
pub use error::{Corruption, Error, Result};
pub use extract::{ExtractOptions, OverwritePolicy};
pub use policy::{
    Decision, ErrorLog, ErrorLogEntry, ErrorPolicy, FileInfo, InteractionHandler, OverwriteChoice,
    RetryChoice, Unattended,
};
pub use progress::{AbortFlag, Stopwatch};
pub use tree::Tree;
