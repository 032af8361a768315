pub mod analysis;
pub mod llm;
#[cfg(test)]
pub mod testing;

pub use analysis::{AnalysisEngine, AnalysisError, AnalysisInput};
pub use llm::{GroqProvider, Message};
