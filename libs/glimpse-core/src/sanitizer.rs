/// Strip protocol and control bytes from a sandbox's combined output stream.
///
/// Keeps printable ASCII (32..=126) plus tab, newline and carriage return;
/// everything else, including the framing headers an attached exec stream can
/// leave behind, is dropped.
pub fn sanitize(bytes: &[u8]) -> String {
    bytes
        .iter()
        .copied()
        .filter(|b| is_retained(*b))
        .map(char::from)
        .collect()
}

fn is_retained(byte: u8) -> bool {
    matches!(byte, 32..=126 | b'\t' | b'\n' | b'\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(sanitize(b"Hello, world!\n"), "Hello, world!\n");
        assert_eq!(sanitize(b"a\tb\r\nc"), "a\tb\r\nc");
    }

    #[test]
    fn test_strips_stream_frame_header() {
        // stdout frame: [1, 0, 0, 0, len(4 bytes BE)] followed by payload
        let mut framed = vec![1u8, 0, 0, 0, 0, 0, 0, 4];
        framed.extend_from_slice(b"abc\n");
        assert_eq!(sanitize(&framed), "abc\n");
    }

    #[test]
    fn test_drops_escape_and_high_bytes() {
        let raw = [0x1b, b'[', b'3', b'1', b'm', b'x', 0x7f, 0xc3, 0xa9, b'\n'];
        assert_eq!(sanitize(&raw), "[31mx\n");
    }

    #[test]
    fn test_empty() {
        assert_eq!(sanitize(&[]), "");
        assert_eq!(sanitize(&[0, 1, 2, 3]), "");
    }
}
