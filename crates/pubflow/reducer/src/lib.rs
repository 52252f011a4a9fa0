//! Content reduction for the publishing pipeline
//!
//! A [`Reducer`] extracts the field/value hierarchy of a master artifact and
//! produces reduced artifacts limited to a selection. [`TabularReducer`] is
//! the built-in implementation for JSON content packages.

mod error;
mod tabular;
mod traits;

pub use error::{ReducerError, ReducerResult};
pub use tabular::{ContentPackage, PackageField, TabularReducer};
pub use traits::{reduced_output_path, ReducedArtifact, Reducer};
