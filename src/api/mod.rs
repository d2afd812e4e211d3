pub mod error;
pub mod wire;

pub use error::PipelineError;
