// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Durable session store section of the config.
#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
    /// Root directory of the per-client session store. Each domain gets a
    /// sub directory below this root.
    ///
    /// Default is `/var/lib/kestrel/storage`.
    #[serde(default = "Storage::default_path")]
    path: PathBuf,

    /// Number of hash buckets bounding directory fan-out; must be a power
    /// of two.
    ///
    /// Default is 4096.
    #[serde(default = "Storage::default_bucket_count")]
    bucket_count: usize,
}

impl Storage {
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("/var/lib/kestrel/storage")
    }

    #[must_use]
    pub const fn default_bucket_count() -> usize {
        4096
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if `bucket_count` is not a power of two.
    pub fn validate(&self) -> Result<(), Error> {
        if self.bucket_count == 0 || !self.bucket_count.is_power_of_two() {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "storage bucket_count must be a power of two, got {}",
                    self.bucket_count
                ),
            ));
        }
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            bucket_count: Self::default_bucket_count(),
        }
    }
}
