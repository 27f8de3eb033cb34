// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

#![allow(dead_code)]

use std::time::Duration;

use kestrel::config::Config;
use kestrel::server::ServerContext;
use kite::{AsyncClient, ConnectOptions};

/// Per-test wait limit; every await in the tests is bounded by this.
pub const WAIT: Duration = Duration::from_secs(5);

/// Render a broker config listening on `port`, with per-test storage below
/// the system temp directory. `extra` appends config sections, e.g.
/// domains.
#[must_use]
pub fn broker_config(name: &str, port: u16, extra: &str) -> Config {
    let storage = std::env::temp_dir().join("kestrel-tests").join(name);
    let content = format!(
        r#"
[general]
sys_interval = 5

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:{port}"

[storage]
path = "{}"
bucket_count = 64

[log]
console_log = false

{extra}
"#,
        storage.display()
    );
    toml::from_str(&content).expect("valid test config")
}

/// Spawn the broker on the test runtime.
pub fn start_broker(config: Config) {
    let mut server = ServerContext::new(config);
    tokio::spawn(async move {
        if let Err(err) = server.run().await {
            eprintln!("broker failed: {err}");
        }
    });
}

/// Connect a client, retrying while the broker is still binding.
pub async fn connect_client(options: ConnectOptions) -> AsyncClient {
    for _ in 0..50 {
        match AsyncClient::connect(options.clone()).await {
            Ok(client) => return client,
            Err(_err) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    panic!("failed to connect to test broker at {}", options.address());
}

/// Default options of a test client.
#[must_use]
pub fn client_options(port: u16, client_id: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(&format!("127.0.0.1:{port}"));
    options.set_client_id(client_id);
    options
}
