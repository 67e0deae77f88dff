//! Read-side view of an existing PDF: object lookup, pages, form fields.

use super::filters::decode_stream;
use super::object::{Dictionary, Object, ObjectRef};
use super::parser::Parser;
use super::xref::{XrefEntry, XrefTable};
use crate::infra::error::{SigningError, SigningResult};
use std::collections::HashSet;

/// Maximum depth followed through `/Kids` trees.
const MAX_TREE_DEPTH: usize = 64;

pub struct PdfDocument {
    data: Vec<u8>,
    xref: XrefTable,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("size", &self.xref.size())
            .finish()
    }
}

impl PdfDocument {
    /// Parse the cross-reference structure. Encrypted documents are refused.
    pub fn load(data: Vec<u8>) -> SigningResult<Self> {
        if !data.starts_with(b"%PDF-") {
            return Err(SigningError::DocumentError(
                "input does not start with a %PDF header".to_string(),
            ));
        }
        let xref = XrefTable::load(&data)?;
        if xref.trailer().contains_key("Encrypt") {
            return Err(SigningError::DocumentError(
                "encrypted PDF documents are not supported".to_string(),
            ));
        }
        let doc = Self { data, xref };
        log::debug!("Loaded {doc:?}");
        Ok(doc)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn xref(&self) -> &XrefTable {
        &self.xref
    }

    #[must_use]
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// First object number available for new objects.
    #[must_use]
    pub fn next_object_id(&self) -> u32 {
        self.xref.size().max(1)
    }

    /// Fetch an indirect object. Missing or free objects resolve to `Null`.
    pub fn get(&self, r: ObjectRef) -> SigningResult<Object> {
        match self.xref.get(r.id) {
            None | Some(XrefEntry::Free) => Ok(Object::Null),
            Some(XrefEntry::InUse { offset, .. }) => self.read_at(offset, r),
            Some(XrefEntry::Compressed { stream_id, index }) => {
                self.read_compressed(stream_id, index, r)
            }
        }
    }

    fn read_at(&self, offset: usize, expected: ObjectRef) -> SigningResult<Object> {
        if offset >= self.data.len() {
            return Err(SigningError::DocumentError(format!(
                "object {expected} points past end of file"
            )));
        }
        let resolve_length = |len_ref: ObjectRef| -> Option<i64> {
            match self.xref.get(len_ref.id)? {
                XrefEntry::InUse { offset, .. } => {
                    let (_, obj) = Parser::new(&self.data, offset)
                        .parse_indirect(&|_| None)
                        .ok()?;
                    obj.as_integer()
                }
                _ => None,
            }
        };
        let (found, object) = Parser::new(&self.data, offset).parse_indirect(&resolve_length)?;
        if found.id != expected.id {
            return Err(SigningError::DocumentError(format!(
                "xref points at object {found} while looking for {expected}"
            )));
        }
        Ok(object)
    }

    fn read_compressed(&self, stream_id: u32, index: u32, expected: ObjectRef) -> SigningResult<Object> {
        let container = match self.xref.get(stream_id) {
            Some(XrefEntry::InUse { offset, .. }) => {
                self.read_at(offset, ObjectRef::new(stream_id, 0))?
            }
            _ => {
                return Err(SigningError::DocumentError(format!(
                    "object stream {stream_id} for {expected} is missing"
                )))
            }
        };
        let Object::Stream { dict, data } = container else {
            return Err(SigningError::DocumentError(format!(
                "object {stream_id} is not an object stream"
            )));
        };
        let count = dict.get("N").and_then(Object::as_integer).unwrap_or(0);
        let first = dict
            .get("First")
            .and_then(Object::as_integer)
            .and_then(|f| usize::try_from(f).ok())
            .ok_or_else(|| SigningError::DocumentError("object stream without /First".into()))?;
        let decoded = decode_stream(&dict, &data)?;

        let mut header = Parser::new(&decoded, 0);
        for i in 0..count {
            let id = header.read_unsigned()?;
            let rel = header.read_unsigned()? as usize;
            if i == i64::from(index) {
                if id != u64::from(expected.id) {
                    return Err(SigningError::DocumentError(format!(
                        "object stream {stream_id} slot {index} holds {id}, not {expected}"
                    )));
                }
                return Parser::new(&decoded, first + rel).parse_object();
            }
        }
        Err(SigningError::DocumentError(format!(
            "object stream {stream_id} has no slot {index}"
        )))
    }

    /// Follow a reference chain to a direct object.
    pub fn resolve(&self, obj: &Object) -> SigningResult<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_TREE_DEPTH {
            match current {
                Object::Reference(r) => current = self.get(r)?,
                other => return Ok(other),
            }
        }
        Err(SigningError::DocumentError("reference chain too deep".into()))
    }

    /// Resolve `key` in `dict` to a dictionary, if present.
    pub fn resolve_dict(&self, dict: &Dictionary, key: &str) -> SigningResult<Option<Dictionary>> {
        match dict.get(key) {
            None => Ok(None),
            Some(value) => Ok(self.resolve(value)?.as_dict().cloned()),
        }
    }

    pub fn catalog_ref(&self) -> SigningResult<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| SigningError::DocumentError("trailer has no /Root reference".into()))
    }

    pub fn catalog(&self) -> SigningResult<Dictionary> {
        let root = self.catalog_ref()?;
        self.get(root)?
            .as_dict()
            .cloned()
            .ok_or_else(|| SigningError::DocumentError(format!("catalog {root} is not a dictionary")))
    }

    /// Leaf page references in document order.
    pub fn page_refs(&self) -> SigningResult<Vec<ObjectRef>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| SigningError::DocumentError("catalog has no /Pages".into()))?;
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        self.collect_pages(root, 0, &mut seen, &mut pages)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node: ObjectRef,
        depth: usize,
        seen: &mut HashSet<ObjectRef>,
        out: &mut Vec<ObjectRef>,
    ) -> SigningResult<()> {
        if depth > MAX_TREE_DEPTH || !seen.insert(node) {
            return Err(SigningError::DocumentError(format!(
                "page tree loops at {node}"
            )));
        }
        let obj = self.get(node)?;
        let dict = obj.as_dict().ok_or_else(|| {
            SigningError::DocumentError(format!("page tree node {node} is not a dictionary"))
        })?;
        match dict.get("Kids") {
            Some(kids) => {
                let kids = self.resolve(kids)?;
                for kid in kids.as_array().into_iter().flatten() {
                    if let Some(kid) = kid.as_reference() {
                        self.collect_pages(kid, depth + 1, seen, out)?;
                    }
                }
            }
            None => out.push(node),
        }
        Ok(())
    }

    pub fn page_count(&self) -> SigningResult<usize> {
        Ok(self.page_refs()?.len())
    }

    /// Page `number` (1-based) with its dictionary.
    pub fn page(&self, number: u32) -> SigningResult<(ObjectRef, Dictionary)> {
        let pages = self.page_refs()?;
        let index = usize::try_from(number)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|i| *i < pages.len())
            .ok_or_else(|| {
                SigningError::InvalidInput(format!(
                    "page {number} is out of range, document has {} page(s)",
                    pages.len()
                ))
            })?;
        let page_ref = pages[index];
        let dict = self
            .get(page_ref)?
            .as_dict()
            .cloned()
            .ok_or_else(|| SigningError::DocumentError(format!("page {page_ref} is not a dictionary")))?;
        Ok((page_ref, dict))
    }

    /// `/Annots` of a page as an owned array, resolving an indirect array.
    pub fn page_annotations(&self, page: &Dictionary) -> SigningResult<Vec<Object>> {
        match page.get("Annots") {
            None => Ok(Vec::new()),
            Some(value) => Ok(self
                .resolve(value)?
                .as_array()
                .cloned()
                .unwrap_or_default()),
        }
    }

    /// Fully qualified names of every terminal form field.
    pub fn field_names(&self) -> SigningResult<HashSet<String>> {
        let mut names = HashSet::new();
        let catalog = self.catalog()?;
        let Some(acroform) = self.resolve_dict(&catalog, "AcroForm")? else {
            return Ok(names);
        };
        let fields = match acroform.get("Fields") {
            Some(f) => self.resolve(f)?,
            None => return Ok(names),
        };
        let mut seen = HashSet::new();
        for field in fields.as_array().into_iter().flatten() {
            self.collect_field_names(field, "", 0, &mut seen, &mut names)?;
        }
        Ok(names)
    }

    fn collect_field_names(
        &self,
        field: &Object,
        prefix: &str,
        depth: usize,
        seen: &mut HashSet<ObjectRef>,
        out: &mut HashSet<String>,
    ) -> SigningResult<()> {
        if depth > MAX_TREE_DEPTH {
            return Ok(());
        }
        if let Some(r) = field.as_reference() {
            if !seen.insert(r) {
                return Ok(());
            }
        }
        let resolved = self.resolve(field)?;
        let Some(dict) = resolved.as_dict() else {
            return Ok(());
        };
        let partial = dict
            .get("T")
            .and_then(Object::as_string_bytes)
            .map(decode_text_string);
        let name = match (prefix.is_empty(), partial) {
            (_, None) => prefix.to_string(),
            (true, Some(p)) => p,
            (false, Some(p)) => format!("{prefix}.{p}"),
        };
        match dict.get("Kids").map(|k| self.resolve(k)).transpose()? {
            Some(Object::Array(kids)) if !kids.is_empty() => {
                for kid in &kids {
                    self.collect_field_names(kid, &name, depth + 1, seen, out)?;
                }
            }
            _ => {
                if !name.is_empty() {
                    out.insert(name);
                }
            }
        }
        Ok(())
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise byte-per-char.
#[must_use]
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xfe, 0xff]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a classic-xref PDF from object bodies numbered from 1.
    fn build_pdf(bodies: &[&str]) -> Vec<u8> {
        let mut out = b"%PDF-1.7\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", bodies.len() + 1).as_bytes());
        for off in offsets {
            out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
                bodies.len() + 1
            )
            .as_bytes(),
        );
        out
    }

    #[test]
    fn walks_nested_page_tree() {
        let pdf = build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 3 >>",
            "<< /Type /Page /Parent 2 0 R >>",
            "<< /Type /Pages /Kids [5 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 4 0 R /Annots [] >>",
        ]);
        let doc = PdfDocument::load(pdf).unwrap();
        assert_eq!(doc.page_refs().unwrap(), vec![ObjectRef::new(3, 0), ObjectRef::new(5, 0)]);
        assert_eq!(doc.page(2).unwrap().0, ObjectRef::new(5, 0));
        assert!(matches!(doc.page(3), Err(SigningError::InvalidInput(_))));
        assert!(matches!(doc.page(0), Err(SigningError::InvalidInput(_))));
        assert_eq!(doc.next_object_id(), 6);
    }

    #[test]
    fn collects_qualified_field_names() {
        let pdf = build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R 5 0 R] >> >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
            "<< /T (eMark__P_1_1234) /FT /Sig >>",
            "<< /T (group) /Kids [6 0 R] >>",
            "<< /T (child) /Parent 5 0 R >>",
        ]);
        let doc = PdfDocument::load(pdf).unwrap();
        let names = doc.field_names().unwrap();
        assert!(names.contains("eMark__P_1_1234"));
        assert!(names.contains("group.child"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn encrypted_documents_are_refused() {
        let mut pdf = build_pdf(&["<< /Type /Catalog >>"]);
        let text = String::from_utf8(pdf.clone()).unwrap();
        pdf = text.replace("/Root 1 0 R", "/Root 1 0 R /Encrypt 9 0 R").into_bytes();
        assert!(matches!(
            PdfDocument::load(pdf),
            Err(SigningError::DocumentError(msg)) if msg.contains("encrypted")
        ));
    }

    #[test]
    fn non_pdf_input_is_rejected() {
        assert!(PdfDocument::load(b"hello".to_vec()).is_err());
    }

    #[test]
    fn utf16_text_strings() {
        assert_eq!(decode_text_string(&[0xfe, 0xff, 0x00, 0x41, 0x00, 0xeb]), "Aë");
        assert_eq!(decode_text_string(b"plain"), "plain");
    }
}
