// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{utils::random_string, QoS};
use std::path::PathBuf;
use std::time::Duration;

/// Requested TLS protocol family.
///
/// Only TLS 1.2 and newer are actually negotiated; the legacy variants
/// exist for configuration compatibility and map to the default version
/// set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SslProtocol {
    /// Let the library pick among all supported versions.
    #[default]
    Sslv23,

    Sslv3,
    Tlsv1,
    Tlsv11,
}

/// TLS options of encrypted transports.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Extra root CA file for self signed deployments; the system web PKI
    /// roots are always loaded.
    pub root_ca_file: Option<PathBuf>,

    /// Verify the server certificate. Disabling this accepts any peer and
    /// is only meant for testing.
    pub verify_peer: bool,

    pub protocol: SslProtocol,
}

impl TlsOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root_ca_file: None,
            verify_peer: true,
            protocol: SslProtocol::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MqttConnect {}

#[derive(Clone, Debug)]
pub struct MqttsConnect {
    /// Server name used for SNI and certificate checks.
    pub domain: String,

    pub tls: TlsOptions,
}

#[derive(Clone, Debug)]
pub struct WsConnect {
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct WssConnect {
    pub domain: String,
    pub path: String,
    pub tls: TlsOptions,
}

#[derive(Clone, Debug)]
pub enum ConnectType {
    Mqtt(MqttConnect),
    Mqtts(MqttsConnect),
    Ws(WsConnect),
    Wss(WssConnect),
}

/// Will message announced in CONNECT.
#[derive(Clone, Debug)]
pub struct WillOptions {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    address: String,
    connect_type: ConnectType,
    client_id: String,
    username: Option<String>,
    password: Option<Vec<u8>>,
    clean_session: bool,
    will: Option<WillOptions>,
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:1883".to_string(),
            connect_type: ConnectType::Mqtt(MqttConnect {}),
            client_id: format!("kite-{}", random_string(8)),
            username: None,
            password: None,
            clean_session: true,
            will: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_connect_type(&mut self, connect_type: ConnectType) -> &mut Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_auth(&mut self, username: &str, password: &[u8]) -> &mut Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_vec());
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_will(&mut self, will: WillOptions) -> &mut Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&WillOptions> {
        self.will.as_ref()
    }

    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}
