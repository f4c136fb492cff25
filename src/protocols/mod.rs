//! Protocol implementations.
//!
//! - `delimited`: delimiter-framed commands with `key=value` arguments,
//!   answered with an echo of each frame.

pub mod delimited;
