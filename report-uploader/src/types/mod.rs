mod environment;
mod error;

pub use environment::{Environment, Settings};
pub use error::{PipelineError, PipelineResult};
