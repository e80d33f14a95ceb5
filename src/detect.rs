//! Format detection over a byte stream.
//!
//! Signatures are searched in a bounded stream prefix, every hit is verified
//! by actually opening the stream with that format's codec, and containers
//! that expose an embedded payload are recursed into, producing chains like
//! `[sfx, tar]`. A signature match whose open fails is a false positive and
//! is dropped silently; only chains whose every link really opened are ever
//! returned.

use std::io::{Read, Seek, SeekFrom};

use crate::codec::{
    ArchiveReader, CodecRegistry, FormatId, FormatInfo, OpenHost, ReadSeek, SharedStream,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// How much of the stream head is searched for signatures.
    pub max_scan: usize,
    /// Hard bound on container-in-container recursion. Streams nested
    /// deeper fail closed instead of recursing without limit.
    pub max_depth: usize,
    /// `false` stops at the first viable chain; `true` collects every
    /// independently viable chain for the caller to disambiguate.
    pub probe_all: bool,
}

impl Default for DetectOptions {
    fn default() -> DetectOptions {
        DetectOptions {
            max_scan: 1 << 20,
            max_depth: 8,
            probe_all: false,
        }
    }
}

/// A successfully opened container: the format chain outermost-first, and
/// the live reader for the innermost layer.
pub struct DetectedChain {
    pub formats: Vec<FormatId>,
    pub reader: Box<dyn ArchiveReader>,
}

/// Detect which format(s) can open `stream`, recursing into embedded
/// payloads. Fails with [`Error::UnknownFormat`] when nothing opens, or
/// [`Error::NestingTooDeep`] when the only viable chains exceeded the
/// recursion bound.
pub fn detect(
    registry: &dyn CodecRegistry,
    stream: Box<dyn ReadSeek>,
    host: &mut dyn OpenHost,
    options: &DetectOptions,
) -> Result<Vec<DetectedChain>> {
    let shared = SharedStream::new(stream);
    let mut chains = Vec::new();
    let mut capped = false;
    detect_layer(registry, shared, host, options, 0, &[], &mut chains, &mut capped)?;

    if chains.is_empty() {
        return Err(if capped {
            Error::NestingTooDeep {
                limit: options.max_depth,
            }
        } else {
            Error::UnknownFormat
        });
    }
    Ok(chains)
}

/// Open `stream` as the named format without consulting signatures. This is
/// the only way to open a format that has no signature.
pub fn open_as(
    registry: &dyn CodecRegistry,
    id: FormatId,
    stream: Box<dyn ReadSeek>,
    host: &mut dyn OpenHost,
) -> Result<DetectedChain> {
    let codec = registry.create(id).ok_or(Error::UnknownFormat)?;
    let reader = codec.open(stream, host)?;
    Ok(DetectedChain {
        formats: vec![id],
        reader,
    })
}

#[allow(clippy::too_many_arguments)]
fn detect_layer(
    registry: &dyn CodecRegistry,
    stream: SharedStream,
    host: &mut dyn OpenHost,
    options: &DetectOptions,
    depth: usize,
    chain_so_far: &[FormatId],
    chains: &mut Vec<DetectedChain>,
    capped: &mut bool,
) -> Result<()> {
    let head = read_prefix(&stream, options.max_scan)?;

    let candidates: Vec<FormatId> = registry
        .formats()
        .iter()
        .filter(|info| matches_signature(info, &head))
        .map(|info| info.id)
        .collect();
    tracing::debug!(depth, candidates = candidates.len(), "signature scan");

    for id in candidates {
        let Some(codec) = registry.create(id) else {
            continue;
        };

        let mut attempt = stream.clone();
        attempt
            .seek(SeekFrom::Start(0))
            .map_err(|source| Error::Stream { source })?;

        let mut reader = match codec.open(Box::new(attempt), host) {
            Ok(reader) => reader,
            Err(error) => {
                tracing::debug!(format = id.0, %error, "signature matched but open failed");
                continue;
            }
        };

        let mut chain = chain_so_far.to_vec();
        chain.push(id);

        match reader.main_substream() {
            Ok(Some(substream)) => {
                if depth + 1 >= options.max_depth {
                    *capped = true;
                    tracing::warn!(
                        depth,
                        format = id.0,
                        "nesting depth bound reached; dropping chain"
                    );
                } else {
                    let before = chains.len();
                    let mut sub_capped = false;
                    detect_layer(
                        registry,
                        SharedStream::new(substream),
                        host,
                        options,
                        depth + 1,
                        &chain,
                        chains,
                        &mut sub_capped,
                    )?;
                    if sub_capped {
                        *capped = true;
                    } else if chains.len() == before {
                        // nothing recognised the payload, so the chain
                        // ends at this layer
                        chains.push(DetectedChain {
                            formats: chain,
                            reader,
                        });
                    }
                }
            }
            Ok(None) | Err(_) => {
                chains.push(DetectedChain {
                    formats: chain,
                    reader,
                });
            }
        }

        if !options.probe_all && !chains.is_empty() {
            return Ok(());
        }
    }

    Ok(())
}

fn read_prefix(stream: &SharedStream, max_scan: usize) -> Result<Vec<u8>> {
    let mut head = Vec::new();
    let mut reader = stream.clone();
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|source| Error::Stream { source })?;
    reader
        .take(max_scan as u64)
        .read_to_end(&mut head)
        .map_err(|source| Error::Stream { source })?;
    Ok(head)
}

fn matches_signature(info: &FormatInfo, head: &[u8]) -> bool {
    match &info.signature {
        Some(signature) if !signature.is_empty() => head
            .windows(signature.len())
            .any(|window| window == &signature[..]),
        _ => false,
    }
}
