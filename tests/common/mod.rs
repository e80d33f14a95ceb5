#![allow(dead_code)]

//! In-memory codec collaborator used by the integration tests: a scripted
//! item list behind a magic-checked open, with chunked data delivery and
//! optional embedded payloads for nested-format scenarios.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};

use arcvfs::{
    detect, Archive, ArchiveReader, Codec, CodecError, DetectOptions, Error, ExtractMode,
    ExtractOutcome, ExtractSink, FileInfo, FormatId, FormatInfo, InteractionHandler, ItemProperty,
    OpenHost, OverwriteChoice, PropertyValue, ReadSeek, Registry, RetryChoice, SilentOpenHost,
};

/// Delivery chunk size, deliberately awkward.
pub const CHUNK: usize = 11;

pub fn ts(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[derive(Clone)]
pub struct MockItem {
    pub path: Option<String>,
    pub dir: bool,
    pub data: Vec<u8>,
    pub attributes: u32,
    pub modified: Option<SystemTime>,
    pub outcome: ExtractOutcome,
}

impl MockItem {
    pub fn file(path: &str, data: &[u8]) -> MockItem {
        MockItem {
            path: Some(path.to_string()),
            dir: false,
            data: data.to_vec(),
            attributes: 0,
            modified: None,
            outcome: ExtractOutcome::Ok,
        }
    }

    pub fn dir(path: &str) -> MockItem {
        MockItem {
            path: Some(path.to_string()),
            dir: true,
            data: Vec::new(),
            attributes: 0,
            modified: None,
            outcome: ExtractOutcome::Ok,
        }
    }

    pub fn nameless(data: &[u8]) -> MockItem {
        MockItem {
            path: None,
            dir: false,
            data: data.to_vec(),
            attributes: 0,
            modified: None,
            outcome: ExtractOutcome::Ok,
        }
    }

    pub fn read_only(mut self) -> MockItem {
        self.attributes |= 0x1;
        self
    }

    pub fn modified_at(mut self, secs: u64) -> MockItem {
        self.modified = Some(ts(secs));
        self
    }

    pub fn outcome(mut self, outcome: ExtractOutcome) -> MockItem {
        self.outcome = outcome;
        self
    }
}

#[derive(Clone)]
pub struct Blueprint {
    pub magic: Vec<u8>,
    pub items: Vec<MockItem>,
    /// Bytes served as the main embedded sub-stream, if any.
    pub payload: Option<Vec<u8>>,
    pub refuse_open: bool,
    pub archive_modified: Option<SystemTime>,
}

impl Blueprint {
    pub fn new(magic: &[u8]) -> Blueprint {
        Blueprint {
            magic: magic.to_vec(),
            items: Vec::new(),
            payload: None,
            refuse_open: false,
            archive_modified: None,
        }
    }

    pub fn items(mut self, items: Vec<MockItem>) -> Blueprint {
        self.items = items;
        self
    }

    pub fn payload(mut self, bytes: Vec<u8>) -> Blueprint {
        self.payload = Some(bytes);
        self
    }

    pub fn refuse_open(mut self) -> Blueprint {
        self.refuse_open = true;
        self
    }

    pub fn archive_modified(mut self, secs: u64) -> Blueprint {
        self.archive_modified = Some(ts(secs));
        self
    }
}

pub struct MockCodec {
    pub blueprint: Blueprint,
}

impl Codec for MockCodec {
    fn open(
        self: Box<Self>,
        mut stream: Box<dyn ReadSeek>,
        _host: &mut dyn OpenHost,
    ) -> Result<Box<dyn ArchiveReader>, CodecError> {
        if self.blueprint.refuse_open {
            return Err(CodecError::other("refused by codec"));
        }
        stream.seek(SeekFrom::Start(0))?;
        let mut magic = vec![0u8; self.blueprint.magic.len()];
        stream.read_exact(&mut magic)?;
        if magic != self.blueprint.magic {
            return Err(CodecError::other("magic mismatch"));
        }
        Ok(Box::new(MockReader {
            blueprint: self.blueprint,
            _stream: stream,
        }))
    }
}

pub struct MockReader {
    blueprint: Blueprint,
    _stream: Box<dyn ReadSeek>,
}

impl ArchiveReader for MockReader {
    fn item_count(&self) -> Result<u32, CodecError> {
        Ok(self.blueprint.items.len() as u32)
    }

    fn item_property(
        &self,
        index: u32,
        property: ItemProperty,
    ) -> Result<Option<PropertyValue>, CodecError> {
        let Some(item) = self.blueprint.items.get(index as usize) else {
            return Ok(None);
        };
        Ok(match property {
            ItemProperty::Path => item.path.clone().map(PropertyValue::Str),
            ItemProperty::IsDirectory => Some(PropertyValue::Bool(item.dir)),
            ItemProperty::Attributes => Some(PropertyValue::UInt32(item.attributes)),
            ItemProperty::Size => Some(PropertyValue::UInt64(item.data.len() as u64)),
            ItemProperty::PackedSize => Some(PropertyValue::UInt64((item.data.len() / 2) as u64)),
            ItemProperty::Modified => item.modified.map(PropertyValue::Time),
            ItemProperty::Created | ItemProperty::Accessed => None,
        })
    }

    fn archive_property(&self, property: ItemProperty) -> Result<Option<PropertyValue>, CodecError> {
        Ok(match property {
            ItemProperty::Modified => self.blueprint.archive_modified.map(PropertyValue::Time),
            _ => None,
        })
    }

    fn extract(
        &mut self,
        indices: &[u32],
        mode: ExtractMode,
        sink: &mut dyn ExtractSink,
    ) -> Result<(), CodecError> {
        assert!(
            indices.windows(2).all(|pair| pair[0] < pair[1]),
            "extract indices must be sorted and unique"
        );
        let total = indices.len() as u64;
        for (done, &index) in indices.iter().enumerate() {
            sink.progress(done as u64, total)?;
            let item = self.blueprint.items[index as usize].clone();
            if mode == ExtractMode::Extract {
                if let Some(writer) = sink.stream(index)? {
                    for chunk in item.data.chunks(CHUNK) {
                        writer.write_all(chunk)?;
                    }
                }
            }
            sink.result(index, item.outcome)?;
        }
        sink.progress(total, total)?;
        Ok(())
    }

    fn main_substream(&mut self) -> Result<Option<Box<dyn ReadSeek>>, CodecError> {
        Ok(self
            .blueprint
            .payload
            .clone()
            .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn ReadSeek>))
    }
}

pub fn format(name: &str, id: u32, signature: &[u8]) -> FormatInfo {
    FormatInfo {
        name: name.to_string(),
        id: FormatId(id),
        signature: Some(signature.to_vec()),
        extensions: vec![name.to_string()],
    }
}

pub fn registry_of(formats: Vec<(FormatInfo, Blueprint)>) -> Registry {
    let mut registry = Registry::new();
    for (info, blueprint) in formats {
        registry.register(info, move || {
            Box::new(MockCodec {
                blueprint: blueprint.clone(),
            })
        });
    }
    registry
}

/// A stream that carries `magic` at offset zero plus enough filler to look
/// like a real container.
pub fn container_bytes(magic: &[u8]) -> Vec<u8> {
    let mut bytes = magic.to_vec();
    bytes.resize(magic.len() + 64, 0);
    bytes.write_u32::<LittleEndian>(bytes.len() as u32).unwrap();
    bytes
}

/// Open an archive session over a single mock format holding `items`.
pub fn open_archive(items: Vec<MockItem>) -> Archive {
    open_archive_with(Blueprint::new(b"MBX1").items(items))
}

pub fn open_archive_with(blueprint: Blueprint) -> Archive {
    let magic = blueprint.magic.clone();
    let registry = registry_of(vec![(format("mbx", 1, &magic), blueprint)]);
    let stream = Cursor::new(container_bytes(&magic));
    let chains = detect(
        &registry,
        Box::new(stream),
        &mut SilentOpenHost,
        &DetectOptions::default(),
    )
    .unwrap();
    Archive::new(chains.into_iter().next().unwrap())
}

/// UI collaborator with pre-scripted answers; falls back to "no"/"ignore"
/// when a script runs dry, and counts every prompt.
#[derive(Default)]
pub struct ScriptedUi {
    pub overwrite_answers: Vec<OverwriteChoice>,
    pub retry_answers: Vec<RetryChoice>,
    pub overwrite_asked: usize,
    pub retry_asked: usize,
}

impl ScriptedUi {
    pub fn new() -> ScriptedUi {
        ScriptedUi::default()
    }

    pub fn on_overwrite(mut self, answer: OverwriteChoice) -> ScriptedUi {
        self.overwrite_answers.push(answer);
        self
    }

    pub fn on_retry(mut self, answer: RetryChoice) -> ScriptedUi {
        self.retry_answers.push(answer);
        self
    }
}

impl InteractionHandler for ScriptedUi {
    fn ask_overwrite(&mut self, _path: &Path, _src: &FileInfo, _dst: &FileInfo) -> OverwriteChoice {
        let answer = self
            .overwrite_answers
            .get(self.overwrite_asked)
            .copied()
            .unwrap_or(OverwriteChoice::No);
        self.overwrite_asked += 1;
        answer
    }

    fn ask_password(&mut self) -> Option<String> {
        None
    }

    fn ask_retry(&mut self, _path: &Path, _error: &Error, _can_retry: bool) -> RetryChoice {
        let answer = self
            .retry_answers
            .get(self.retry_asked)
            .copied()
            .unwrap_or(RetryChoice::Ignore);
        self.retry_asked += 1;
        answer
    }
}
