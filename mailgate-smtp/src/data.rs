//! Framing of message content inside the DATA phase (RFC 5321 section 4.5.2).

/// Terminates the DATA phase.
pub const END_OF_DATA: &[u8] = b".\r\n";

/// Prepares a message for transmission after a 354 reply.
///
/// Bare LF line endings become CRLF, every line starting with `.` gains one
/// more leading `.`, and the end-of-data sequence is appended. The input is
/// treated as unstuffed content; stuffing is applied exactly once.
pub fn encode(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 8);
    let mut line_start = true;

    for (idx, &byte) in message.iter().enumerate() {
        if line_start && byte == b'.' {
            out.push(b'.');
        }

        if byte == b'\n' && (idx == 0 || message[idx - 1] != b'\r') {
            out.push(b'\r');
        }

        out.push(byte);
        line_start = byte == b'\n';
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(END_OF_DATA);

    out
}

/// Reverses the transparency procedure for one received line.
///
/// Returns `None` for the lone `.` that ends the DATA phase.
pub fn decode_line(line: &[u8]) -> Option<&[u8]> {
    match line {
        b"." => None,
        [b'.', rest @ ..] => Some(rest),
        _ => Some(line),
    }
}
