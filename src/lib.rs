pub mod chart;
pub mod context;
pub mod conversation;
pub mod error;
pub mod execution;
pub mod extract;
pub mod field_guide;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod preflight;
pub mod rules;
pub mod schema;
pub mod tables;
pub mod validator;

pub use error::{InsightsError, Result};
pub use pipeline::{QueryOutcome, QueryPipeline};
