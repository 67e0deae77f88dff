//! Signature field preparation.
//!
//! Appends an incremental update holding the signature dictionary with a
//! zero-filled `/Contents` placeholder, the widget, the appearance and the
//! updated page and catalog, then patches `/ByteRange` in place. The result
//! is ready to digest; [`PreparedDocument::embed`] writes the container.

use crate::domain::pdf::parser::find;
use crate::domain::pdf::serializer::{serialize, text_string};
use crate::domain::pdf::{
    dict, ByteRangeCalculator, Dictionary, IncrementalWriter, Object, ObjectRef, PdfDocument,
    BYTE_RANGE_PLACEHOLDER,
};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::appearance_builder::AppearancePlan;
use crate::services::appearance_stream::render_appearance;
use chrono::{DateTime, FixedOffset};
use sha2::{Digest, Sha256};

/// Annotation flags: Print | Locked.
const WIDGET_FLAGS: i64 = 4 | 128;

/// `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Document with a sized placeholder and a final ByteRange.
#[derive(Debug)]
pub struct PreparedDocument {
    data: Vec<u8>,
    byte_range: [usize; 4],
    contents_offset: usize,
    calculator: ByteRangeCalculator,
}

impl PreparedDocument {
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn byte_range(&self) -> [usize; 4] {
        self.byte_range
    }

    /// Offset of the `<` opening the `/Contents` hex string.
    #[must_use]
    pub fn contents_offset(&self) -> usize {
        self.contents_offset
    }

    /// Bytes the container may occupy.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.calculator.capacity()
    }

    /// SHA-256 over both ByteRange segments.
    pub fn digest(&self) -> SigningResult<Vec<u8>> {
        let signed = ByteRangeCalculator::extract_signed_bytes(&self.data, &self.byte_range)?;
        Ok(Sha256::digest(&signed).to_vec())
    }

    /// Write the CMS container into the placeholder.
    pub fn embed(mut self, container: &[u8]) -> SigningResult<Vec<u8>> {
        self.calculator
            .insert_signature(&mut self.data, self.contents_offset, container)?;
        log::info!(
            "Embedded {} byte signature container ({} reserved)",
            container.len(),
            self.calculator.capacity()
        );
        Ok(self.data)
    }
}

/// PDF date string, e.g. `D:20240309140507+05'30'`.
#[must_use]
pub fn pdf_date(time: &DateTime<FixedOffset>) -> String {
    let offset = time.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.abs();
    format!(
        "D:{}{sign}{:02}'{:02}'",
        time.format("%Y%m%d%H%M%S"),
        offset / 3600,
        (offset % 3600) / 60
    )
}

pub struct PdfPreparer;

impl PdfPreparer {
    /// Add the signature field described by `plan`, reserving
    /// `reserved_bytes` for the container.
    pub fn prepare(
        doc: &PdfDocument,
        plan: &AppearancePlan,
        reserved_bytes: usize,
    ) -> SigningResult<PreparedDocument> {
        let calculator = ByteRangeCalculator::new(reserved_bytes);
        let mut writer = IncrementalWriter::new(doc);
        let sig_ref = writer.allocate();
        let widget_ref = writer.allocate();

        writer.put_raw(sig_ref, signature_dictionary(plan, &calculator));

        let page_number = plan.placement.as_ref().map_or(1, |p| p.page);
        let (page_ref, mut page) = doc.page(page_number)?;

        let mut widget = dict([
            ("Type", Object::name("Annot")),
            ("Subtype", Object::name("Widget")),
            ("FT", Object::name("Sig")),
            ("T", text_string(&plan.field_name)),
            ("V", sig_ref.into()),
            ("F", Object::Integer(WIDGET_FLAGS)),
            ("P", page_ref.into()),
        ]);
        let corners = match &plan.placement {
            Some(placement) => {
                let ap = render_appearance(plan, &placement.rect, &mut writer)?;
                widget.insert(
                    "AP".into(),
                    Object::Dictionary(dict([("N", ap.into())])),
                );
                placement.rect.corners()
            }
            None => [0.0; 4],
        };
        widget.insert(
            "Rect".into(),
            Object::Array(corners.iter().map(|c| Object::from(*c)).collect()),
        );
        writer.put(widget_ref, &Object::Dictionary(widget));

        let mut annots = doc.page_annotations(&page)?;
        annots.push(widget_ref.into());
        page.insert("Annots".into(), Object::Array(annots));
        writer.put(page_ref, &Object::Dictionary(page));

        Self::update_catalog(doc, &mut writer, plan, sig_ref, widget_ref)?;

        let output = writer.write(doc)?;
        let mut data = output.data;
        let sig_offset = *output.offsets.get(&sig_ref).ok_or_else(|| {
            SigningError::DocumentError("signature dictionary was not written".into())
        })?;

        let contents_offset = locate(&data, sig_offset, b"/Contents <")? + b"/Contents ".len();
        let range_offset = locate(&data, sig_offset, BYTE_RANGE_PLACEHOLDER.as_bytes())?;
        let byte_range = calculator.calculate_byte_range(data.len(), contents_offset);
        ByteRangeCalculator::validate_byte_range(&byte_range, data.len())?;
        let formatted = ByteRangeCalculator::format_byte_range(&byte_range)?;
        data[range_offset..range_offset + formatted.len()].copy_from_slice(formatted.as_bytes());

        log::debug!(
            "Prepared signature field {}: ByteRange {byte_range:?}, placeholder {} bytes",
            plan.field_name,
            calculator.placeholder_size()
        );
        Ok(PreparedDocument {
            data,
            byte_range,
            contents_offset,
            calculator,
        })
    }

    fn update_catalog(
        doc: &PdfDocument,
        writer: &mut IncrementalWriter,
        plan: &AppearancePlan,
        sig_ref: ObjectRef,
        widget_ref: ObjectRef,
    ) -> SigningResult<()> {
        let catalog_ref = doc.catalog_ref()?;
        let mut catalog = doc.catalog()?;

        let acroform_ref = catalog.get("AcroForm").and_then(Object::as_reference);
        let mut acroform = doc.resolve_dict(&catalog, "AcroForm")?.unwrap_or_default();
        let mut fields = match acroform.get("Fields") {
            Some(f) => doc.resolve(f)?.as_array().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        fields.push(widget_ref.into());
        acroform.insert("Fields".into(), Object::Array(fields));
        acroform.insert("SigFlags".into(), Object::Integer(SIG_FLAGS));
        match acroform_ref {
            Some(r) => writer.put(r, &Object::Dictionary(acroform)),
            None => {
                catalog.insert("AcroForm".into(), Object::Dictionary(acroform));
            }
        }

        if plan.docmdp_permission.is_some() {
            catalog.insert(
                "Perms".into(),
                Object::Dictionary(dict([("DocMDP", sig_ref.into())])),
            );
        }
        writer.put(catalog_ref, &Object::Dictionary(catalog));
        Ok(())
    }
}

/// `<</ByteRange [placeholder] /Contents <00..> ...>>` with the placeholders
/// first so their offsets are easy to find.
fn signature_dictionary(plan: &AppearancePlan, calculator: &ByteRangeCalculator) -> Vec<u8> {
    let mut sig = dict([
        ("Type", Object::name("Sig")),
        ("Filter", Object::name("Adobe.PPKLite")),
        ("SubFilter", Object::name("ETSI.CAdES.detached")),
        ("M", Object::String(pdf_date(&plan.signing_time).into_bytes())),
        (
            "Prop_Build",
            Object::Dictionary(dict([(
                "App",
                Object::Dictionary(dict([("Name", Object::name(&plan.creator))])),
            )])),
        ),
    ]);
    if let Some(name) = &plan.signer_name {
        sig.insert("Name".into(), text_string(name));
    }
    if let Some(reason) = &plan.reason {
        sig.insert("Reason".into(), text_string(reason));
    }
    if let Some(location) = &plan.location {
        sig.insert("Location".into(), text_string(location));
    }
    if let Some(p) = plan.docmdp_permission {
        sig.insert("Reference".into(), Object::Array(vec![docmdp_reference(p)]));
    }

    let rest = serialize(&Object::Dictionary(sig));
    let mut body = format!(
        "<</ByteRange {BYTE_RANGE_PLACEHOLDER} /Contents {} ",
        calculator.generate_placeholder()
    )
    .into_bytes();
    body.extend_from_slice(&rest[2..]);
    body
}

fn docmdp_reference(permission: u8) -> Object {
    Object::Dictionary(dict([
        ("Type", Object::name("SigRef")),
        ("TransformMethod", Object::name("DocMDP")),
        (
            "TransformParams",
            Object::Dictionary(dict([
                ("Type", Object::name("TransformParams")),
                ("P", Object::Integer(i64::from(permission))),
                ("V", Object::name("1.2")),
            ])),
        ),
    ]))
}

fn locate(data: &[u8], from: usize, needle: &[u8]) -> SigningResult<usize> {
    find(&data[from..], needle)
        .map(|pos| from + pos)
        .ok_or_else(|| {
            SigningError::DocumentError(format!(
                "{} not found in the signature dictionary",
                String::from_utf8_lossy(needle)
            ))
        })
}
