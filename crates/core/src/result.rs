//! Result type for drover operations.

use crate::error::Error;

/// The standard Result type for drover operations.
///
/// Library code propagates with `?`; callers match or use combinators.
pub type Result<T> = std::result::Result<T, Error>;
