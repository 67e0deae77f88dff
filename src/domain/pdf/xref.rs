//! Cross-reference tables and streams, including `/Prev` chains.

use super::filters::decode_stream;
use super::object::{Dictionary, Object};
use super::parser::{rfind, Parser};
use crate::infra::error::{SigningError, SigningResult};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free,
    InUse { offset: usize, gen: u16 },
    Compressed { stream_id: u32, index: u32 },
}

/// Merged view of every section, newest entries winning.
#[derive(Debug, Clone)]
pub struct XrefTable {
    entries: BTreeMap<u32, XrefEntry>,
    trailer: Dictionary,
    startxref: usize,
    newest_is_stream: bool,
}

impl XrefTable {
    /// Read `startxref` and every reachable section.
    pub fn load(data: &[u8]) -> SigningResult<Self> {
        let startxref = find_startxref(data)?;
        let mut entries = BTreeMap::new();
        let mut trailer: Option<Dictionary> = None;
        let mut newest_is_stream = false;
        let mut visited = HashSet::new();
        let mut pending = vec![startxref];

        while let Some(offset) = pending.pop() {
            if !visited.insert(offset) {
                continue;
            }
            let section = read_section(data, offset)?;
            if trailer.is_none() {
                newest_is_stream = section.is_stream;
            }
            for (id, entry) in section.entries {
                entries.entry(id).or_insert(entry);
            }
            if let Some(prev) = section.trailer.get("Prev").and_then(Object::as_integer) {
                pending.push(usize::try_from(prev).map_err(|_| {
                    SigningError::DocumentError(format!("negative /Prev offset {prev}"))
                })?);
            }
            // Hybrid files: the stream section ranks between this table and /Prev.
            if let Some(stm) = section.trailer.get("XRefStm").and_then(Object::as_integer) {
                if let Ok(stm) = usize::try_from(stm) {
                    pending.push(stm);
                }
            }
            if trailer.is_none() {
                trailer = Some(section.trailer);
            }
        }

        let trailer = trailer
            .ok_or_else(|| SigningError::DocumentError("no cross-reference section".into()))?;
        Ok(Self {
            entries,
            trailer,
            startxref,
            newest_is_stream,
        })
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<XrefEntry> {
        self.entries.get(&id).copied()
    }

    /// Trailer of the newest section.
    #[must_use]
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    #[must_use]
    pub fn startxref(&self) -> usize {
        self.startxref
    }

    /// Whether the newest section is a cross-reference stream.
    #[must_use]
    pub fn uses_xref_stream(&self) -> bool {
        self.newest_is_stream
    }

    /// Next free object number (`/Size`).
    #[must_use]
    pub fn size(&self) -> u32 {
        let declared = self
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .and_then(|s| u32::try_from(s).ok())
            .unwrap_or(0);
        let highest = self.entries.keys().next_back().map_or(0, |id| id + 1);
        declared.max(highest)
    }
}

struct Section {
    entries: Vec<(u32, XrefEntry)>,
    trailer: Dictionary,
    is_stream: bool,
}

/// Offset after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> SigningResult<usize> {
    let tail_start = data.len().saturating_sub(2048);
    let rel = rfind(&data[tail_start..], b"startxref")
        .ok_or_else(|| SigningError::DocumentError("startxref not found".into()))?;
    let mut parser = Parser::new(data, tail_start + rel + b"startxref".len());
    let offset = parser.read_unsigned()?;
    let offset = usize::try_from(offset)
        .ok()
        .filter(|o| *o < data.len())
        .ok_or_else(|| SigningError::DocumentError(format!("startxref {offset} out of range")))?;
    Ok(offset)
}

fn read_section(data: &[u8], offset: usize) -> SigningResult<Section> {
    let mut parser = Parser::new(data, offset);
    if parser.eat_keyword("xref") {
        read_table(&mut parser)
    } else {
        read_stream(data, offset)
    }
}

fn read_table(parser: &mut Parser<'_>) -> SigningResult<Section> {
    let mut entries = Vec::new();
    loop {
        if parser.eat_keyword("trailer") {
            break;
        }
        let start = parser.read_unsigned()?;
        let count = parser.read_unsigned()?;
        for i in 0..count {
            let field1 = parser.read_unsigned()?;
            let gen = parser.read_unsigned()?;
            let id = u32::try_from(start + i)
                .map_err(|_| SigningError::DocumentError("object number overflow".into()))?;
            let entry = if parser.eat_keyword("n") {
                XrefEntry::InUse {
                    offset: field1 as usize,
                    gen: u16::try_from(gen).unwrap_or(u16::MAX),
                }
            } else if parser.eat_keyword("f") {
                XrefEntry::Free
            } else {
                return Err(SigningError::DocumentError(format!(
                    "malformed xref entry for object {id}"
                )));
            };
            entries.push((id, entry));
        }
    }
    let trailer = match parser.parse_object()? {
        Object::Dictionary(d) => d,
        other => {
            return Err(SigningError::DocumentError(format!(
                "trailer is a {}, not a dictionary",
                other.type_name()
            )))
        }
    };
    Ok(Section {
        entries,
        trailer,
        is_stream: false,
    })
}

fn read_stream(data: &[u8], offset: usize) -> SigningResult<Section> {
    let mut parser = Parser::new(data, offset);
    let (_, object) = parser.parse_indirect(&|_| None)?;
    let Object::Stream { dict, data: raw } = object else {
        return Err(SigningError::DocumentError(format!(
            "no xref table or stream at offset {offset}"
        )));
    };
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(SigningError::DocumentError(format!(
            "object at offset {offset} is not a cross-reference stream"
        )));
    }
    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| {
            w.iter()
                .filter_map(Object::as_integer)
                .map(|n| n.max(0) as usize)
                .collect()
        })
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(SigningError::DocumentError("invalid /W in xref stream".into()));
    }
    let size = dict.get("Size").and_then(Object::as_integer).unwrap_or(0);
    let index: Vec<i64> = dict
        .get("Index")
        .and_then(Object::as_array)
        .map(|a| a.iter().filter_map(Object::as_integer).collect())
        .unwrap_or_else(|| vec![0, size]);

    let decoded = decode_stream(&dict, &raw)?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(SigningError::DocumentError("zero-width xref rows".into()));
    }
    let mut rows = decoded.chunks_exact(row_len);
    let mut entries = Vec::new();
    for pair in index.chunks(2) {
        let [start, count] = pair else { break };
        for i in 0..*count {
            let Some(row) = rows.next() else { break };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let id = u32::try_from(start + i)
                .map_err(|_| SigningError::DocumentError("object number overflow".into()))?;
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse {
                    offset: read_be(f2) as usize,
                    gen: read_be(f3) as u16,
                },
                2 => XrefEntry::Compressed {
                    stream_id: read_be(f2) as u32,
                    index: read_be(f3) as u32,
                },
                _ => continue,
            };
            entries.push((id, entry));
        }
    }
    Ok(Section {
        entries,
        trailer: dict,
        is_stream: true,
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
