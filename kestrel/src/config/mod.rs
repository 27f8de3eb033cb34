// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;

use crate::error::Error;

mod domain;
mod general;
mod listener;
mod log;
mod storage;

pub use self::log::{Log, LogLevel};
pub use domain::{AclAction, AclRule, Domain};
pub use general::General;
pub use listener::{Certificate, Listener, Protocol};
pub use storage::Storage;

/// Server main config.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "General::default")]
    general: General,

    #[serde(default = "Listener::default_listeners")]
    listeners: Vec<Listener>,

    #[serde(default = "Storage::default")]
    storage: Storage,

    #[serde(default = "Domain::default_domains")]
    domains: Vec<Domain>,

    #[serde(default = "Log::default")]
    log: Log,
}

impl Config {
    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if some options in config are invalid.
    pub fn validate(&self, bind_address: bool) -> Result<(), Error> {
        self.general.validate()?;

        for listener in &self.listeners {
            listener.validate(bind_address)?;
        }

        self.storage.validate()?;

        for domain in &self.domains {
            domain.validate()?;
        }

        self.log.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.listeners().is_empty());
        assert_eq!(config.storage().bucket_count(), 4096);
    }

    #[test]
    fn test_parse_config() {
        let content = r#"
[general]
sys_interval = 5

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1883"

[storage]
path = "/tmp/kestrel-test/storage"
bucket_count = 64

[[domains]]
name = "example.com"
storage_path = "example.com"
conn_limit = 10
message_size_limit = 65536
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.listeners().len(), 1);
        assert_eq!(config.domains().len(), 1);
        assert_eq!(config.domains()[0].name(), "example.com");
        assert_eq!(config.domains()[0].conn_limit(), 10);
        assert!(config.validate(false).is_ok());
    }
}
