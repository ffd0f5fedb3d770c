//! Container framing.
//!
//! Layout of an encoded object:
//!
//! ```text
//! "DOBJ" | section payloads ... | footer JSON | footer_len: u32 LE | "DOBJ"
//! ```
//!
//! The footer lists every section as `{ kind, offset, len }`, where `offset`
//! is relative to the end of the leading magic. Sections are exposed as
//! zero-copy slices of the object's bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    context::QueryContext,
    dataobj::{
        SectionKind,
        error::{
            BadMagicSnafu, ContextSnafu, DataObjResult, FooterSnafu, MissingStreamsSectionSnafu,
            SectionBoundsSnafu, StorageSnafu, TruncatedSnafu, UnsupportedVersionSnafu,
        },
    },
    storage::StorageLocation,
};

const MAGIC: &[u8; 4] = b"DOBJ";
const FORMAT_VERSION: u32 = 1;
// magic + footer_len + magic
const MIN_LEN: usize = MAGIC.len() * 2 + 4;

#[derive(Debug, Serialize, Deserialize)]
struct Footer {
    format_version: u32,
    sections: Vec<FooterEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FooterEntry {
    kind: SectionKind,
    offset: u64,
    len: u64,
}

/// One section of a data object, not yet decoded.
#[derive(Clone, Debug)]
pub struct RawSection {
    kind: SectionKind,
    ordinal: u32,
    position: usize,
    data: Bytes,
}

impl RawSection {
    /// Section type.
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// One-based position among sections of the same kind.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Zero-based position among all sections of the object.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Encoded section payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// A decoded data object container.
///
/// Cloning shares the underlying bytes.
#[derive(Clone, Debug)]
pub struct DataObject {
    size: usize,
    sections: Vec<RawSection>,
}

impl DataObject {
    /// Parse container framing. Section payloads are not decoded.
    pub fn from_bytes(bytes: Bytes) -> DataObjResult<Self> {
        ensure!(
            bytes.len() >= MIN_LEN,
            TruncatedSnafu {
                detail: format!("{} bytes is shorter than the framing", bytes.len()),
            }
        );
        let size = bytes.len();
        ensure!(
            &bytes[..4] == MAGIC && &bytes[size - 4..] == MAGIC,
            BadMagicSnafu
        );

        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&bytes[size - 8..size - 4]);
        let footer_len = u32::from_le_bytes(len_buf) as usize;
        let footer_end = size - 8;
        ensure!(
            footer_len <= footer_end - MAGIC.len(),
            TruncatedSnafu {
                detail: format!("footer length {footer_len} exceeds object size {size}"),
            }
        );
        let footer_start = footer_end - footer_len;
        let footer: Footer =
            serde_json::from_slice(&bytes[footer_start..footer_end]).context(FooterSnafu)?;
        ensure!(
            footer.format_version == FORMAT_VERSION,
            UnsupportedVersionSnafu {
                version: footer.format_version
            }
        );

        let payload = bytes.slice(MAGIC.len()..footer_start);
        let payload_len = payload.len() as u64;

        let mut sections = Vec::with_capacity(footer.sections.len());
        let mut per_kind = [0u32; 3];
        for (position, entry) in footer.sections.iter().enumerate() {
            let end = entry.offset.checked_add(entry.len);
            ensure!(
                end.is_some_and(|end| end <= payload_len),
                SectionBoundsSnafu {
                    kind: entry.kind,
                    offset: entry.offset,
                    len: entry.len,
                    payload_len,
                }
            );
            let counter = &mut per_kind[kind_slot(entry.kind)];
            *counter += 1;
            let start = entry.offset as usize;
            sections.push(RawSection {
                kind: entry.kind,
                ordinal: *counter,
                position,
                data: payload.slice(start..start + entry.len as usize),
            });
        }

        Ok(Self { size, sections })
    }

    /// Fetch `path` from storage and parse it, honouring cancellation.
    pub async fn open(
        ctx: &QueryContext,
        storage: &StorageLocation,
        path: &str,
    ) -> DataObjResult<Self> {
        let bytes = ctx
            .run(storage.read_all_bytes(path))
            .await
            .context(ContextSnafu)?
            .context(StorageSnafu)?;
        Self::from_bytes(bytes)
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// All sections in object order.
    pub fn sections(&self) -> &[RawSection] {
        &self.sections
    }

    /// Sections of one kind in object order.
    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &RawSection> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    /// Section of `kind` with the given one-based ordinal.
    pub fn section(&self, kind: SectionKind, ordinal: u32) -> Option<&RawSection> {
        self.sections_of(kind).find(|s| s.ordinal == ordinal)
    }

    /// Streams section describing `logs`: the closest Streams section before it.
    pub fn streams_for(&self, logs: &RawSection) -> Option<&RawSection> {
        self.sections[..logs.position.min(self.sections.len())]
            .iter()
            .rev()
            .find(|s| s.kind == SectionKind::Streams)
    }

    /// Like [`DataObject::streams_for`], but a Logs section without a
    /// Streams section before it is a malformed object.
    pub fn require_streams_for(&self, logs: &RawSection) -> DataObjResult<&RawSection> {
        self.streams_for(logs).context(MissingStreamsSectionSnafu {
            ordinal: logs.ordinal,
        })
    }
}

fn kind_slot(kind: SectionKind) -> usize {
    match kind {
        SectionKind::Streams => 0,
        SectionKind::Logs => 1,
        SectionKind::Index => 2,
    }
}

/// Incremental writer for the container framing.
#[derive(Debug)]
pub(crate) struct ObjectEncoder {
    buf: Vec<u8>,
    entries: Vec<FooterEntry>,
}

impl ObjectEncoder {
    pub(crate) fn new() -> Self {
        Self {
            buf: MAGIC.to_vec(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn append(&mut self, kind: SectionKind, payload: &[u8]) {
        let offset = (self.buf.len() - MAGIC.len()) as u64;
        self.buf.extend_from_slice(payload);
        self.entries.push(FooterEntry {
            kind,
            offset,
            len: payload.len() as u64,
        });
    }

    pub(crate) fn finish(mut self) -> DataObjResult<Bytes> {
        let footer = Footer {
            format_version: FORMAT_VERSION,
            sections: self.entries,
        };
        let json = serde_json::to_vec(&footer).context(FooterSnafu)?;
        let footer_len = u32::try_from(json.len()).map_err(|_| {
            TruncatedSnafu {
                detail: format!("footer of {} bytes does not fit u32", json.len()),
            }
            .build()
        })?;
        self.buf.extend_from_slice(&json);
        self.buf.extend_from_slice(&footer_len.to_le_bytes());
        self.buf.extend_from_slice(MAGIC);
        Ok(Bytes::from(self.buf))
    }
}
