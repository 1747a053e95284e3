pub mod cache;
pub mod engine;
pub mod fingerprint;

pub use engine::{EventOutcome, FetchOutcome, PendingSend, SyncEngine};
