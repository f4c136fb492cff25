//! Echo response construction.

use bytes::{BufMut, Bytes, BytesMut};

/// Tag prefixed to every echoed frame.
pub const ECHO_PREFIX: &[u8] = b"Echo:";

/// Build the echo response for `frame`: `Echo:` + frame + delimiter.
pub fn respond(frame: &[u8], delimiter: u8) -> Bytes {
    let mut output = BytesMut::with_capacity(ECHO_PREFIX.len() + frame.len() + 1);
    respond_into(frame, delimiter, &mut output);
    output.freeze()
}

/// Append the echo response for `frame` to `output`.
pub fn respond_into(frame: &[u8], delimiter: u8, output: &mut BytesMut) {
    output.reserve(ECHO_PREFIX.len() + frame.len() + 1);
    output.put_slice(ECHO_PREFIX);
    output.put_slice(frame);
    output.put_u8(delimiter);
}
