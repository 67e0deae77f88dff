//! Minimal PDF object model: enough to read an existing document and append
//! a signed incremental update.

pub mod byte_range;
pub mod document;
pub mod filters;
pub mod object;
pub mod parser;
pub mod serializer;
pub mod writer;
pub mod xref;

pub use byte_range::{ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
pub use document::PdfDocument;
pub use object::{dict, Dictionary, Object, ObjectRef};
pub use writer::{IncrementalOutput, IncrementalWriter};
