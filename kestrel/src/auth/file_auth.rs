// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Users database backed by a passwd style file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::backend::AuthBackend;
use super::passwd::Passwd;
use crate::error::{Error, ErrorKind};

#[derive(Debug, Default)]
pub struct FileAuthBackend {
    users: HashMap<String, Passwd>,
}

impl FileAuthBackend {
    /// Parse a users database file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read; malformed lines are
    /// skipped with a log entry.
    pub fn load_file(&mut self, path: &Path) -> Result<(), Error> {
        let fd = File::open(path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Failed to open users db {path:?}, err: {err}"),
            )
        })?;
        let reader = BufReader::new(fd);
        for line in reader.lines() {
            let line = line?;
            match Passwd::parse(&line) {
                Ok(Some((username, passwd))) => {
                    self.users.insert(username, passwd);
                }
                Ok(None) => {}
                Err(err) => {
                    log::error!("auth: skipping invalid passwd line: {err}");
                }
            }
        }
        Ok(())
    }
}

impl AuthBackend for FileAuthBackend {
    fn load(&mut self, domain: &str, path: Option<&Path>) -> Result<(), Error> {
        let Some(path) = path else {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("domain {domain}: plain backend requires users_db"),
            ));
        };
        self.load_file(path)
    }

    fn user_exists(&self, _client_id: &str, username: &str) -> bool {
        self.users.contains_key(username)
    }

    fn auth(
        &self,
        _domain_selected: bool,
        _client_id: &str,
        username: Option<&str>,
        password: &[u8],
    ) -> bool {
        let Some(username) = username else {
            return false;
        };
        self.users
            .get(username)
            .is_some_and(|passwd| passwd.matches(password).unwrap_or(false))
    }

    fn unload(&mut self) {
        self.users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::utils::random_string;
    use std::io::Write;

    #[test]
    fn test_load_and_auth() {
        let path = std::env::temp_dir()
            .join("kestrel-tests")
            .join(format!("users-{}.db", random_string(8)));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let alice = Passwd::generate(b"wonder").unwrap();
        let bob = Passwd::generate(b"builder").unwrap();
        let mut fd = File::create(&path).unwrap();
        writeln!(fd, "# users").unwrap();
        writeln!(fd, "{}", alice.dump("alice")).unwrap();
        writeln!(fd, "{}", bob.dump("bob")).unwrap();
        drop(fd);

        let mut backend = FileAuthBackend::default();
        backend.load("example.com", Some(&path)).unwrap();

        assert!(backend.user_exists("c1", "alice"));
        assert!(!backend.user_exists("c1", "carol"));
        assert!(backend.auth(true, "c1", Some("alice"), b"wonder"));
        assert!(!backend.auth(true, "c1", Some("alice"), b"wrong"));
        assert!(!backend.auth(true, "c1", Some("carol"), b"wonder"));
        assert!(!backend.auth(true, "c1", None, b""));

        backend.unload();
        assert!(!backend.user_exists("c1", "alice"));
        std::fs::remove_file(&path).unwrap();
    }
}
