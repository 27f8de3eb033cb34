// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod async_client;
mod connect_options;
mod error;
mod status;
mod stream;

pub use async_client::AsyncClient;
pub use connect_options::{
    ConnectOptions, ConnectType, MqttConnect, MqttsConnect, SslProtocol, TlsOptions, WillOptions,
    WsConnect, WssConnect,
};
pub use error::{Error, ErrorKind};
pub use status::StreamStatus;
