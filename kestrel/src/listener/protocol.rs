// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Runtime state of a bound listener socket per protocol label.
pub enum Protocol {
    /// Plain MQTT over TCP.
    Mqtt(TcpListener),

    /// MQTT over TLS.
    Mqtts(TcpListener, TlsAcceptor),

    /// MQTT over WebSocket.
    Ws(TcpListener),

    /// MQTT over WebSocket over TLS.
    Wss(TcpListener, TlsAcceptor),
}
