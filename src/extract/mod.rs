pub mod progress;
pub mod run;
pub mod source;

pub use run::Orchestrator;
pub use source::SourceExtractor;
