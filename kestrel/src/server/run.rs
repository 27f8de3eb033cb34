// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use super::ServerContext;
use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::log::init_log;

pub const DEFAULT_CONFIG: &str = "/etc/kestrel/kestrel.toml";

#[derive(Debug, Parser)]
#[command(name = "kestrel", about = "Multi-tenant MQTT broker", version)]
struct Arguments {
    /// Specify config file path.
    #[arg(short, long, value_name = "config_file")]
    config: Option<PathBuf>,

    /// Test config file and exit.
    #[arg(short, long)]
    test: bool,
}

fn load_config(config_file: Option<&Path>) -> Result<Config, Error> {
    let config_file = match config_file {
        Some(config_file) => Some(config_file.to_path_buf()),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            default.exists().then(|| default.to_path_buf())
        }
    };

    match config_file {
        Some(config_file) => {
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str(&content).map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Invalid config file {config_file:?}: {err}"),
                )
            })
        }
        None => Ok(Config::default()),
    }
}

/// Entry point of the server binary.
///
/// # Errors
///
/// Returns error if the config is invalid or the server fails to start.
pub fn run_server() -> Result<(), Error> {
    let args = Arguments::parse();

    let config = load_config(args.config.as_deref())?;
    config.validate(false)?;

    if args.test {
        println!("The configuration file syntax is Ok");
        return Ok(());
    }

    init_log(config.log())?;

    let mut server = ServerContext::new(config);
    let runtime = Runtime::new()?;
    runtime.block_on(server.run())
}

/// Run server with a predefined config.
///
/// Useful for integration tests.
///
/// # Errors
///
/// Returns error if the config is invalid or the server fails to start.
pub fn run_server_with_config(config: Config) -> Result<(), Error> {
    config.validate(false)?;
    let mut server = ServerContext::new(config);
    let runtime = Runtime::new()?;
    runtime.block_on(server.run())
}
