// src/machine/mod.rs
pub mod extractor;
pub mod rate_gate;
pub mod session;
pub mod state;
pub mod stop;
#[cfg(test)]
pub mod testing;

pub use extractor::Extractor;
pub use rate_gate::RateGate;
pub use session::{ExtractResult, ExtractionSession};
pub use stop::StopSignal;
