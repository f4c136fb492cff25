//! Delimited command protocol.
//!
//! A text-ish protocol framed by a single delimiter byte (default `;`):
//! - Client sends: `<command>[?key=value&key=value]<delim>`
//! - Server echoes: `Echo:<frame><delim>`
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  PING;
//! Response: Echo:PING;
//!
//! Request:  SET?key=val&ttl=10;
//! Response: Echo:SET?key=val&ttl=10;
//! ```
//!
//! Frames are split on raw bytes and may arrive fragmented across any
//! number of reads. Consecutive delimiters produce empty frames, which are
//! answered like any other (`Echo:;`). Argument tokens without `=` are
//! accepted and ignored; the server never reports a parse failure to the
//! peer.

pub mod framer;
pub mod parser;
pub mod response;

pub use framer::{FrameError, Framer, DEFAULT_DELIMITER};
pub use parser::decode_bytes;
pub use response::respond;
