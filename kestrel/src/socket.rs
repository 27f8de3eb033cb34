// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use tokio::net::TcpListener;

use crate::error::{Error, ErrorKind};

/// Bind a TCP listener to `address`.
///
/// # Errors
///
/// Returns error if the address is invalid or already in use.
pub async fn new_tcp_listener(address: &str) -> Result<TcpListener, Error> {
    TcpListener::bind(address).await.map_err(|err| {
        Error::from_string(
            ErrorKind::SocketError,
            format!("Failed to bind to {address}, err: {err}"),
        )
    })
}
