// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;

use crate::error::Error;

/// General section of the config.
#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// Time interval in seconds between periodic housekeeping runs,
    /// covering quota day/month roll over detection.
    ///
    /// Default is 30.
    #[serde(default = "General::default_sys_interval")]
    sys_interval: u64,

    /// Server name announced on administrative topics when the connection
    /// carries no server name indication of its own.
    ///
    /// Default is "kestrel".
    #[serde(default = "General::default_server_name")]
    server_name: String,
}

impl General {
    #[must_use]
    pub const fn default_sys_interval() -> u64 {
        30
    }

    #[must_use]
    pub fn default_server_name() -> String {
        "kestrel".to_string()
    }

    #[must_use]
    pub const fn sys_interval(&self) -> u64 {
        self.sys_interval
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if some options are invalid.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sys_interval == 0 {
            return Err(Error::new(
                crate::error::ErrorKind::ConfigError,
                "sys_interval must be larger than 0",
            ));
        }
        Ok(())
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            sys_interval: Self::default_sys_interval(),
            server_name: Self::default_server_name(),
        }
    }
}
