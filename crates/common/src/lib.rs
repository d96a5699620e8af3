//! Common utilities and types shared across ipsecd components.

pub mod error;
pub mod logging;

pub use error::{Error, ErrorKind, Result};
