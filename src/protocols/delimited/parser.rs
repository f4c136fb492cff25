//! Message decoder.
//!
//! Turns one frame into a command and its arguments. Decoding is total:
//! malformed input degrades to fewer recognized arguments and never fails.

use std::collections::HashMap;

/// Decoded form of a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Text before the first `?`, or the whole trimmed frame.
    pub command: String,
    /// Argument map. Duplicate keys keep the last value.
    pub args: HashMap<String, String>,
    /// Number of argument tokens dropped for lacking `=`.
    pub ignored: usize,
}

/// Decode a frame's text.
///
/// Syntax: `command ["?" pair *("&" pair)]` where `pair = key "=" value`.
/// Tokens without `=` are counted in [`Message::ignored`] and otherwise
/// dropped. Values may contain `=`; only the first one splits.
pub fn decode(frame: &str) -> Message {
    let frame = frame.trim();

    let (command, rest) = match frame.split_once('?') {
        Some((command, rest)) => (command, rest),
        None => (frame, ""),
    };

    let mut message = Message {
        command: command.to_string(),
        ..Message::default()
    };

    if rest.is_empty() {
        return message;
    }

    for token in rest.split('&') {
        match token.split_once('=') {
            Some((key, value)) => {
                message.args.insert(key.to_string(), value.to_string());
            }
            None => message.ignored += 1,
        }
    }

    message
}

/// Decode a raw frame, replacing invalid UTF-8 before parsing.
pub fn decode_bytes(frame: &[u8]) -> Message {
    decode(&String::from_utf8_lossy(frame))
}
