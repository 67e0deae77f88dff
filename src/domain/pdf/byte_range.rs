//! ByteRange arithmetic for signature placeholders.
//!
//! The ByteRange is `[0 before_sig after_sig_start after_sig_len]`: everything
//! except the hex `/Contents` value (angle brackets included) is signed.

use crate::infra::error::{SigningError, SigningResult};

/// Fixed-width ByteRange placeholder, patched in place once offsets are known.
pub const BYTE_RANGE_PLACEHOLDER: &str = "[0 ********** ********** **********]";

#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Hex digits plus the two angle brackets.
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Reserve room for `reserved_bytes` of DER.
    #[must_use]
    pub fn new(reserved_bytes: usize) -> Self {
        Self {
            placeholder_size: reserved_bytes * 2 + 2,
        }
    }

    #[must_use]
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Container bytes that fit in the placeholder.
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    #[must_use]
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    #[must_use]
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [usize; 4] {
        let after_sig_start = contents_offset + self.placeholder_size;
        [
            0,
            contents_offset,
            after_sig_start,
            file_size - after_sig_start,
        ]
    }

    /// Render the array padded to the placeholder width.
    pub fn format_byte_range(byte_range: &[usize; 4]) -> SigningResult<String> {
        let body = format!(
            "[{} {} {} {}]",
            byte_range[0], byte_range[1], byte_range[2], byte_range[3]
        );
        if body.len() > BYTE_RANGE_PLACEHOLDER.len() {
            return Err(SigningError::DocumentError(format!(
                "ByteRange {body} does not fit its placeholder"
            )));
        }
        Ok(format!("{body:<width$}", width = BYTE_RANGE_PLACEHOLDER.len()))
    }

    /// Concatenate the two signed ranges.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[usize; 4]) -> SigningResult<Vec<u8>> {
        let [offset1, length1, offset2, length2] = *byte_range;
        if offset1 + length1 > pdf_data.len() || offset2 + length2 > pdf_data.len() {
            return Err(SigningError::DocumentError(format!(
                "ByteRange {byte_range:?} exceeds file size {}",
                pdf_data.len()
            )));
        }
        let mut signed = Vec::with_capacity(length1 + length2);
        signed.extend_from_slice(&pdf_data[offset1..offset1 + length1]);
        signed.extend_from_slice(&pdf_data[offset2..offset2 + length2]);
        Ok(signed)
    }

    /// Starts at zero, ends at EOF, and leaves exactly one gap.
    pub fn validate_byte_range(byte_range: &[usize; 4], file_size: usize) -> SigningResult<()> {
        let [offset1, length1, offset2, length2] = *byte_range;
        if offset1 != 0 {
            return Err(SigningError::DocumentError(format!(
                "ByteRange must start at 0, got {offset1}"
            )));
        }
        if offset2 + length2 != file_size {
            return Err(SigningError::DocumentError(format!(
                "ByteRange must end at file size {file_size}, got {}",
                offset2 + length2
            )));
        }
        if length1 > offset2 {
            return Err(SigningError::DocumentError(
                "ByteRange ranges overlap".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the DER container into the placeholder, zero padded.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        container: &[u8],
    ) -> SigningResult<()> {
        if container.len() > self.capacity() {
            return Err(SigningError::SigningProcess {
                context: "Signature container does not fit the reserved space".to_string(),
                cause: format!(
                    "{} bytes needed, {} reserved",
                    container.len(),
                    self.capacity()
                ),
                root_cause: "envelope size estimate too small".to_string(),
            });
        }
        let end = contents_offset + self.placeholder_size;
        if end > pdf_data.len() || pdf_data[contents_offset] != b'<' || pdf_data[end - 1] != b'>' {
            return Err(SigningError::DocumentError(
                "signature placeholder not found at the recorded offset".to_string(),
            ));
        }
        let hex = hex::encode_upper(container);
        let slot = &mut pdf_data[contents_offset + 1..end - 1];
        slot.fill(b'0');
        slot[..hex.len()].copy_from_slice(hex.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_size() {
        let calc = ByteRangeCalculator::new(1024);
        assert_eq!(calc.placeholder_size(), 2050);
        assert_eq!(calc.capacity(), 1024);
        assert_eq!(ByteRangeCalculator::new(4).generate_placeholder(), "<00000000>");
    }

    #[test]
    fn byte_range_arithmetic() {
        let calc = ByteRangeCalculator::new(49);
        let range = calc.calculate_byte_range(1000, 400);
        assert_eq!(range, [0, 400, 500, 500]);
        assert!(ByteRangeCalculator::validate_byte_range(&range, 1000).is_ok());
        assert!(ByteRangeCalculator::validate_byte_range(&[10, 1, 2, 3], 1000).is_err());
    }

    #[test]
    fn formatted_range_keeps_placeholder_width() {
        let text = ByteRangeCalculator::format_byte_range(&[0, 1234, 92036, 5678]).unwrap();
        assert_eq!(text.len(), BYTE_RANGE_PLACEHOLDER.len());
        assert!(text.starts_with("[0 1234 92036 5678]"));
    }

    #[test]
    fn extract_and_insert() {
        let calc = ByteRangeCalculator::new(4);
        let mut pdf = b"XX<00000000>YY".to_vec();
        let range = calc.calculate_byte_range(pdf.len(), 2);
        assert_eq!(
            ByteRangeCalculator::extract_signed_bytes(&pdf, &range).unwrap(),
            b"XXYY"
        );
        calc.insert_signature(&mut pdf, 2, &[0xab, 0xcd]).unwrap();
        assert_eq!(&pdf, b"XX<ABCD0000>YY");
        assert!(calc.insert_signature(&mut pdf, 2, &[0; 5]).is_err());
    }
}
