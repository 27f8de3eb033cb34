// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::config::Config;

mod init;
mod run;

pub use run::{run_server, run_server_with_config, DEFAULT_CONFIG};

/// Process wide state: the loaded config plus the handles wired between
/// the long running tasks.
#[derive(Debug)]
pub struct ServerContext {
    config: Config,
}

impl ServerContext {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
