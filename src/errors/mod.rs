//! Error handling for the operator.

mod types;

pub use types::{Error, Result};
