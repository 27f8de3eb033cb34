// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Salted password hashes of the users database.
//!
//! On-disk line format: `username:base64(salt):base64(sha512(password+salt))`.
//! Empty lines and lines starting with `#` are ignored.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::hash::{Hasher, MessageDigest};
use rand::Rng;

use crate::error::{Error, ErrorKind};

pub const SALT_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct Passwd {
    salt: [u8; SALT_LEN],
    passwd_hash: Vec<u8>,
}

fn sha512(password: &[u8], salt: &[u8]) -> Result<Vec<u8>, Error> {
    let mut hasher = Hasher::new(MessageDigest::sha512())?;
    hasher.update(password)?;
    hasher.update(salt)?;
    Ok(hasher.finish()?.to_vec())
}

impl Passwd {
    /// Hash a new password with a random salt.
    ///
    /// # Errors
    ///
    /// Returns error if the hash backend fails.
    pub fn generate(password: &[u8]) -> Result<Self, Error> {
        let salt: [u8; SALT_LEN] = rand::thread_rng().gen();
        let passwd_hash = sha512(password, &salt)?;
        Ok(Self { salt, passwd_hash })
    }

    /// Check a cleartext password against this entry.
    ///
    /// # Errors
    ///
    /// Returns error if the hash backend fails.
    pub fn matches(&self, password: &[u8]) -> Result<bool, Error> {
        Ok(sha512(password, &self.salt)? == self.passwd_hash)
    }

    /// Parse one users database line; `Ok(None)` for comments and empty
    /// lines.
    ///
    /// # Errors
    ///
    /// Returns error for malformed entries.
    pub fn parse(line: &str) -> Result<Option<(String, Self)>, Error> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.splitn(3, ':');
        let username = parts.next().unwrap_or_default();
        let (Some(salt_part), Some(hash_part)) = (parts.next(), parts.next()) else {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid passwd line: {line:?}"),
            ));
        };
        if username.is_empty() {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("Empty username in passwd line: {line:?}"),
            ));
        }

        let salt_bytes = BASE64.decode(salt_part).map_err(|err| {
            Error::from_string(ErrorKind::ConfigError, format!("Invalid salt: {err}"))
        })?;
        let salt: [u8; SALT_LEN] = salt_bytes.try_into().map_err(|_| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid salt length in passwd line: {line:?}"),
            )
        })?;
        let passwd_hash = BASE64.decode(hash_part).map_err(|err| {
            Error::from_string(ErrorKind::ConfigError, format!("Invalid hash: {err}"))
        })?;

        Ok(Some((username.to_string(), Self { salt, passwd_hash })))
    }

    /// Format this entry as a users database line.
    #[must_use]
    pub fn dump(&self, username: &str) -> String {
        format!(
            "{username}:{}:{}",
            BASE64.encode(self.salt),
            BASE64.encode(&self.passwd_hash)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_match() {
        let passwd = Passwd::generate(b"secret").unwrap();
        assert!(passwd.matches(b"secret").unwrap());
        assert!(!passwd.matches(b"wrong").unwrap());
    }

    #[test]
    fn test_dump_parse_round_trip() {
        let passwd = Passwd::generate(b"secret").unwrap();
        let line = passwd.dump("alice");
        let (username, parsed) = Passwd::parse(&line).unwrap().unwrap();
        assert_eq!(username, "alice");
        assert!(parsed.matches(b"secret").unwrap());
    }

    #[test]
    fn test_parse_skips_comments() {
        assert!(Passwd::parse("").unwrap().is_none());
        assert!(Passwd::parse("# a comment").unwrap().is_none());
        assert!(Passwd::parse("malformed").is_err());
    }
}
