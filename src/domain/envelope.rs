//! Upper bound on the CMS container size, fixed before the document is finalized.

use crate::domain::constants::{
    BASE_SIGNATURE_SIZE, CERTIFICATE_SIZE_ESTIMATE, CMS_OVERHEAD, LTV_SIZE_ESTIMATE,
    SAFETY_MARGIN, TIMESTAMP_SIZE_ESTIMATE,
};

/// Bytes to reserve for the signature container.
///
/// Under-estimating truncates the signature and corrupts the output, so each
/// term is generous. LTV evidence dominates.
#[must_use]
pub fn estimate_envelope_size(chain_len: usize, timestamp: bool, ltv: bool) -> usize {
    BASE_SIGNATURE_SIZE
        + chain_len * CERTIFICATE_SIZE_ESTIMATE
        + if timestamp { TIMESTAMP_SIZE_ESTIMATE } else { 0 }
        + if ltv { LTV_SIZE_ESTIMATE } else { 0 }
        + CMS_OVERHEAD
        + SAFETY_MARGIN
}
