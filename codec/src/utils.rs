// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate random alphanumeric string.
#[must_use]
pub fn random_string(len: usize) -> String {
    let bytes: Vec<u8> = thread_rng().sample_iter(&Alphanumeric).take(len).collect();
    // Alphanumeric samples are always valid single byte code points.
    String::from_utf8(bytes).unwrap_or_default()
}

/// Generate a server-unique client id for connections without one.
#[must_use]
pub fn random_client_id() -> String {
    format!("kestrel-{}", random_string(15))
}

/// Invalid UTF-8 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length exceeds 64KiB.
    TooManyData,

    /// Contains discouraged control characters.
    InvalidChar,

    /// Contains U+0000 or a noncharacter; receiver shall close the
    /// connection.
    SeriousError,
}

impl From<std::string::FromUtf8Error> for StringError {
    fn from(_e: std::string::FromUtf8Error) -> Self {
        Self::SeriousError
    }
}

/// Check string characters and length.
///
/// A UTF-8 encoded string in an MQTT packet must not contain U+0000
/// [MQTT-1.5.3-2] nor code points between U+D800 and U+DFFF [MQTT-1.5.3-1];
/// the latter cannot occur in a Rust `&str`. Noncharacters and control
/// characters are rejected as well.
///
/// # Errors
///
/// Returns error if `s` is too long or contains forbidden code points.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(StringError::TooManyData);
    }

    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::SeriousError);
        }

        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }

        // Noncharacters U+FDD0..U+FDEF and the last two code points of every
        // plane.
        let cp = u32::from(c);
        if (0xFDD0..=0xFDEF).contains(&cp) || (cp & 0xFFFE) == 0xFFFE {
            return Err(StringError::SeriousError);
        }
    }

    // Empty string is valid.
    Ok(())
}

/// Convert range of bytes to a valid MQTT UTF-8 string.
///
/// # Errors
///
/// Returns error if bytes are not well-formed or contain forbidden code
/// points.
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(buf.to_vec())?;
    validate_utf8_string(&s)?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("sport/tennis").is_ok());
        assert!(validate_utf8_string("温度").is_ok());

        assert_eq!(
            validate_utf8_string("a\u{0000}b"),
            Err(StringError::SeriousError)
        );
        assert_eq!(
            validate_utf8_string("a\u{0007}b"),
            Err(StringError::InvalidChar)
        );
        assert_eq!(
            validate_utf8_string("a\u{fdd0}"),
            Err(StringError::SeriousError)
        );
        assert_eq!(
            validate_utf8_string("a\u{ffff}"),
            Err(StringError::SeriousError)
        );
    }

    #[test]
    fn test_to_utf8_string() {
        assert_eq!(to_utf8_string(b"hello").unwrap(), "hello");
        assert!(to_utf8_string(&[0xc3, 0x28]).is_err());
    }

    #[test]
    fn test_random_client_id() {
        let id = random_client_id();
        assert!(id.starts_with("kestrel-"));
        assert_eq!(id.len(), "kestrel-".len() + 15);
    }
}
