// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Pluggable authentication backends.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Error;

/// One authentication backend instance bound to a domain.
///
/// A domain selects exactly one backend at load time by its registry
/// label.
pub trait AuthBackend: Send + std::fmt::Debug {
    /// Load backend state from the domain's users database.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be read.
    fn load(&mut self, domain: &str, path: Option<&Path>) -> Result<(), Error>;

    /// Whether the backend knows this username or client id.
    fn user_exists(&self, client_id: &str, username: &str) -> bool;

    /// Authenticate a connecting client.
    ///
    /// `domain_selected` is false while the broker is still probing
    /// domains for a match; backends may refuse loose auth methods in
    /// that phase.
    fn auth(
        &self,
        domain_selected: bool,
        client_id: &str,
        username: Option<&str>,
        password: &[u8],
    ) -> bool;

    /// Drop backend state.
    fn unload(&mut self);
}

/// Constructor of a backend instance, keyed by label.
pub type BackendFactory = fn() -> Box<dyn AuthBackend>;

/// Registry mapping backend labels to factories.
#[must_use]
pub fn default_backends() -> HashMap<String, BackendFactory> {
    let mut backends: HashMap<String, BackendFactory> = HashMap::new();
    backends.insert("anonymous".to_string(), || {
        Box::new(AnonymousBackend::default())
    });
    backends.insert("plain".to_string(), || {
        Box::new(super::file_auth::FileAuthBackend::default())
    });
    backends
}

/// Backend admitting every client; used by domains without credentials.
#[derive(Debug, Default)]
pub struct AnonymousBackend {}

impl AuthBackend for AnonymousBackend {
    fn load(&mut self, _domain: &str, _path: Option<&Path>) -> Result<(), Error> {
        Ok(())
    }

    fn user_exists(&self, _client_id: &str, _username: &str) -> bool {
        false
    }

    fn auth(
        &self,
        _domain_selected: bool,
        _client_id: &str,
        _username: Option<&str>,
        _password: &[u8],
    ) -> bool {
        true
    }

    fn unload(&mut self) {}
}
