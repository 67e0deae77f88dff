pub mod appearance;
pub mod asn1; // DER writer/reader helpers
pub mod certificate;
pub mod constants;
pub mod descriptor;
pub mod dn;
pub mod envelope;
pub mod pdf;
pub mod session;
pub mod types;
