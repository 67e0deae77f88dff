//! Incremental update writer.
//!
//! New and replaced objects are appended after the original bytes, followed
//! by a cross-reference section of the same flavour as the newest existing
//! one (classic table or xref stream) chained through `/Prev`.

use super::document::PdfDocument;
use super::object::{dict, Dictionary, Object, ObjectRef};
use super::serializer::{serialize, serialize_indirect};
use crate::infra::error::{SigningError, SigningResult};
use std::collections::BTreeMap;

/// Objects queued for an incremental update.
#[derive(Debug)]
pub struct IncrementalWriter {
    next_id: u32,
    objects: BTreeMap<ObjectRef, Vec<u8>>,
}

/// Appended file plus the offset of each written object.
#[derive(Debug)]
pub struct IncrementalOutput {
    pub data: Vec<u8>,
    pub offsets: BTreeMap<ObjectRef, usize>,
}

impl IncrementalWriter {
    #[must_use]
    pub fn new(doc: &PdfDocument) -> Self {
        Self {
            next_id: doc.next_object_id(),
            objects: BTreeMap::new(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Queue `obj` under `r`, replacing any earlier revision.
    pub fn put(&mut self, r: ObjectRef, obj: &Object) {
        self.objects.insert(r, serialize(obj));
    }

    /// Queue an already serialized direct object.
    pub fn put_raw(&mut self, r: ObjectRef, body: Vec<u8>) {
        self.objects.insert(r, body);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append the queued objects and a new cross-reference section.
    pub fn write(mut self, doc: &PdfDocument) -> SigningResult<IncrementalOutput> {
        if self.objects.is_empty() {
            return Err(SigningError::DocumentError(
                "incremental update has no objects".to_string(),
            ));
        }
        let mut data = doc.data().to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }

        let mut offsets = BTreeMap::new();
        for (r, body) in &self.objects {
            offsets.insert(*r, data.len());
            data.extend_from_slice(format!("{} {} obj\n", r.id, r.gen).as_bytes());
            data.extend_from_slice(body);
            data.extend_from_slice(b"\nendobj\n");
        }

        let mut trailer = carried_trailer(doc.trailer());
        trailer.insert(
            "Prev".to_string(),
            Object::Integer(doc.xref().startxref() as i64),
        );

        if doc.xref().uses_xref_stream() {
            let stream_ref = self.allocate();
            let xref_offset = data.len();
            offsets.insert(stream_ref, xref_offset);
            trailer.insert("Size".to_string(), Object::Integer(i64::from(self.next_id)));
            let stream = xref_stream(&offsets, trailer)?;
            data.extend_from_slice(&serialize_indirect(stream_ref.id, 0, &stream));
            data.extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());
        } else {
            let xref_offset = data.len();
            trailer.insert("Size".to_string(), Object::Integer(i64::from(self.next_id)));
            data.extend_from_slice(b"xref\n");
            for run in runs(&offsets) {
                data.extend_from_slice(format!("{} {}\n", run[0].0.id, run.len()).as_bytes());
                for (r, offset) in run {
                    data.extend_from_slice(format!("{offset:010} {:05} n \n", r.gen).as_bytes());
                }
            }
            data.extend_from_slice(b"trailer\n");
            data.extend_from_slice(&serialize(&Object::Dictionary(trailer)));
            data.extend_from_slice(format!("\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes());
        }

        log::debug!(
            "Incremental update wrote {} object(s), {} bytes total",
            offsets.len(),
            data.len()
        );
        Ok(IncrementalOutput { data, offsets })
    }
}

fn carried_trailer(previous: &Dictionary) -> Dictionary {
    ["Root", "Info", "ID"]
        .iter()
        .filter_map(|k| previous.get(*k).map(|v| ((*k).to_string(), v.clone())))
        .collect()
}

/// Consecutive object-number runs, as xref subsections.
fn runs(offsets: &BTreeMap<ObjectRef, usize>) -> Vec<Vec<(ObjectRef, usize)>> {
    let mut out: Vec<Vec<(ObjectRef, usize)>> = Vec::new();
    for (r, offset) in offsets {
        match out.last_mut() {
            Some(run) if run.last().is_some_and(|(last, _)| last.id + 1 == r.id) => {
                run.push((*r, *offset));
            }
            _ => out.push(vec![(*r, *offset)]),
        }
    }
    out
}

fn xref_stream(offsets: &BTreeMap<ObjectRef, usize>, trailer: Dictionary) -> SigningResult<Object> {
    let mut index = Vec::new();
    let mut rows = Vec::new();
    for run in runs(offsets) {
        index.push(Object::Integer(i64::from(run[0].0.id)));
        index.push(Object::Integer(run.len() as i64));
        for (r, offset) in run {
            let offset = u32::try_from(offset).map_err(|_| {
                SigningError::DocumentError("document too large for 4-byte xref offsets".into())
            })?;
            rows.push(1u8);
            rows.extend_from_slice(&offset.to_be_bytes());
            rows.extend_from_slice(&r.gen.to_be_bytes());
        }
    }
    let mut stream_dict = trailer;
    stream_dict.extend(dict([
        ("Type", Object::name("XRef")),
        (
            "W",
            Object::Array(vec![Object::Integer(1), Object::Integer(4), Object::Integer(2)]),
        ),
        ("Index", Object::Array(index)),
    ]));
    Ok(Object::Stream {
        dict: stream_dict,
        data: rows,
    })
}
