//! Assessment configuration: YAML schema, loader and validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, parse_duration};
pub use schema::{AssessmentFile, RuntimeSettings};
pub use validation::{ValidationResult, Validator};
