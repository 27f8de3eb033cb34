// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Percent encoding of client ids and topic filters into file names.

/// Bytes that pass through unencoded.
fn is_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~')
}

/// Encode an arbitrary string into a safe file name. `/`, `\0`, `%` and
/// everything else outside the safe set become `%XX` escapes.
#[must_use]
pub fn encode_name(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if is_safe(b) {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        }
    }
    out
}

/// Decode a file name produced by [`encode_name`]; returns `None` for
/// malformed escapes or invalid UTF-8.
#[must_use]
pub fn decode_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for s in [
            "plain",
            "sport/tennis/+",
            "#",
            "with space",
            "per%cent",
            "nul\u{0}byte",
            "日本語",
        ] {
            let encoded = encode_name(s);
            assert!(
                !encoded.contains('/') && !encoded.contains('\u{0}'),
                "{encoded:?}"
            );
            assert_eq!(decode_name(&encoded).as_deref(), Some(s));
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode_name("%"), None);
        assert_eq!(decode_name("%z1"), None);
        assert_eq!(decode_name("abc%4"), None);
    }
}
