//! Step execution
//!
//! A step consumes an input (file, URL, prior output, tool directive, or
//! literal), prompts a model or runs a tool, and places its output
//! (STDOUT, a file template, a pipe, or a variable). Errors always carry
//! the step name.

mod executor;

pub use executor::StepExecutor;

use thiserror::Error;

use crate::llm::LlmError;
use crate::tools::ToolError;

/// Errors from executing a single step
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step '{step}' has no action")]
    MissingAction { step: String },

    #[error("step '{step}': input file not found: {path}")]
    InputFileNotFound { step: String, path: String },

    #[error("step '{step}': no files match pattern '{pattern}'")]
    NoGlobMatches { step: String, pattern: String },

    #[error("step '{step}': failed to fetch {url}: {message}")]
    Fetch {
        step: String,
        url: String,
        message: String,
    },

    #[error("step '{step}': unresolved variable reference ${name}")]
    UnresolvedVariable { step: String, name: String },

    #[error("step '{step}': {source}")]
    Tool {
        step: String,
        #[source]
        source: ToolError,
    },

    #[error("step '{step}': provider error: {source}")]
    Provider {
        step: String,
        #[source]
        source: LlmError,
    },

    #[error("step '{step}': io error: {source}")]
    Io {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("step '{step}': {message}")]
    Invalid { step: String, message: String },
}
