//! Workflow pipelines orchestrating stateless services.

pub mod candidates;
pub mod sign;

pub use candidates::{eligible_candidates, provider_for};
pub use sign::{EngineState, SignatureEngine, SignedDocument};
