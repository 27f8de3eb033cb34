// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::net::{TcpListener, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Binding protocol types.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Raw Mqtt protocol over TCP.
    #[serde(alias = "mqtt")]
    Mqtt,

    /// Raw Mqtt protocol over TCP with TLS encryption.
    #[serde(alias = "mqtts", alias = "tls", alias = "ssl", alias = "mqtt-ssl")]
    Mqtts,

    /// Websocket protocol.
    #[serde(alias = "ws", alias = "mqtt-ws")]
    Ws,

    /// Secure Websocket protocol.
    #[serde(alias = "wss", alias = "mqtt-wss")]
    Wss,
}

/// Certificate entry for SNI based server name resolution.
#[derive(Debug, Deserialize, Clone)]
pub struct Certificate {
    /// Server name this certificate answers for.
    server_name: String,

    cert_file: PathBuf,
    key_file: PathBuf,
}

impl Certificate {
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[must_use]
    pub fn cert_file(&self) -> &Path {
        &self.cert_file
    }

    #[must_use]
    pub fn key_file(&self) -> &Path {
        &self.key_file
    }
}

/// Listener represents a unique ip/port combination and mqtt connection
/// protocol.
#[derive(Debug, Deserialize, Clone)]
pub struct Listener {
    /// The maximum number of client connections to this listener allowed.
    ///
    /// Default is 0, which means unlimited connections.
    #[serde(default = "Listener::default_maximum_connections")]
    maximum_connections: usize,

    /// Binding protocol.
    ///
    /// Default is mqtt.
    #[serde(default = "Listener::default_protocol")]
    protocol: Protocol,

    /// Binding address, including address and port.
    ///
    /// Common addresses are:
    /// - 0.0.0.0:1883, for mqtt
    /// - 0.0.0.0:8883, for mqtts
    /// - 0.0.0.0:8083, for mqtt over WebSocket
    /// - 0.0.0.0:8084, for mqtt over secure WebSocket
    ///
    /// Default is 0.0.0.0:1883
    #[serde(default = "Listener::default_address")]
    address: String,

    /// Url path to bind to, only used for websocket protocols.
    ///
    /// Default is None, which means do not check url path.
    #[serde(default = "Listener::default_path")]
    path: Option<String>,

    /// Path to the default TLS cert file, used when no SNI entry matches.
    ///
    /// Default is None.
    #[serde(default = "Listener::default_cert_file")]
    cert_file: Option<PathBuf>,

    /// Path to the default TLS private key file.
    ///
    /// Default is None.
    #[serde(default = "Listener::default_key_file")]
    key_file: Option<PathBuf>,

    /// Per server name certificates for SNI resolution.
    ///
    /// Default is empty.
    #[serde(default = "Listener::default_certificates")]
    certificates: Vec<Certificate>,

    /// Connection keep alive timeout in seconds, used when the client sets
    /// no keep alive value in its CONNECT packet.
    ///
    /// Default is 60.
    #[serde(default = "Listener::default_keep_alive")]
    keep_alive: u16,

    /// Timeout value in seconds before receiving a CONNECT packet from the
    /// client. The timer starts when the client stream is connected.
    ///
    /// Default is 60.
    #[serde(default = "Listener::default_connect_timeout")]
    connect_timeout: u16,

    /// MAY allow a Client to supply a ClientId that has a length of zero
    /// bytes. The broker treats this as a special case and assigns a
    /// unique ClientId to that client if this flag is true and the client
    /// requested a clean session.
    ///
    /// Sends an IdentifierRejected CONNACK otherwise.
    ///
    /// Default is true.
    #[serde(default = "Listener::default_allow_empty_client_id")]
    allow_empty_client_id: bool,

    /// The maximum number of QoS 1 and 2 messages currently inflight per
    /// client.
    ///
    /// Default is 20.
    #[serde(default = "Listener::default_maximum_inflight_messages")]
    maximum_inflight_messages: usize,
}

impl Listener {
    #[must_use]
    pub fn default_listeners() -> Vec<Self> {
        Vec::new()
    }

    #[must_use]
    pub const fn default_maximum_connections() -> usize {
        0
    }

    #[must_use]
    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    #[must_use]
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    #[must_use]
    pub const fn default_path() -> Option<String> {
        None
    }

    #[must_use]
    pub const fn default_cert_file() -> Option<PathBuf> {
        None
    }

    #[must_use]
    pub const fn default_key_file() -> Option<PathBuf> {
        None
    }

    #[must_use]
    pub const fn default_certificates() -> Vec<Certificate> {
        Vec::new()
    }

    #[must_use]
    pub const fn default_keep_alive() -> u16 {
        60
    }

    #[must_use]
    pub const fn default_connect_timeout() -> u16 {
        60
    }

    #[must_use]
    pub const fn default_allow_empty_client_id() -> bool {
        true
    }

    #[must_use]
    pub const fn default_maximum_inflight_messages() -> usize {
        20
    }

    #[must_use]
    pub const fn maximum_connections(&self) -> usize {
        self.maximum_connections
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }

    #[must_use]
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    #[must_use]
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> u16 {
        self.connect_timeout
    }

    #[must_use]
    pub const fn allow_empty_client_id(&self) -> bool {
        self.allow_empty_client_id
    }

    #[must_use]
    pub const fn maximum_inflight_messages(&self) -> usize {
        self.maximum_inflight_messages
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if socket address is invalid, already in use, or TLS
    /// protocols miss their certificate files.
    pub fn validate(&self, bind_address: bool) -> Result<(), Error> {
        if bind_address {
            let _socket = TcpListener::bind(&self.address).map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!(
                        "Failed to bind to address {} for listener, err: {err:?}",
                        &self.address
                    ),
                )
            })?;
        } else {
            let _addr = self.address.to_socket_addrs().map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Invalid socket address: {}, err: {err:?}", &self.address),
                )
            })?;
        }

        if matches!(self.protocol, Protocol::Mqtts | Protocol::Wss)
            && self.certificates.is_empty()
            && (self.cert_file.is_none() || self.key_file.is_none())
        {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "cert_file and key_file are required for listener at {}",
                    &self.address
                ),
            ));
        }

        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            maximum_connections: Self::default_maximum_connections(),
            protocol: Self::default_protocol(),
            address: Self::default_address(),
            path: Self::default_path(),
            cert_file: Self::default_cert_file(),
            key_file: Self::default_key_file(),
            certificates: Self::default_certificates(),
            keep_alive: Self::default_keep_alive(),
            connect_timeout: Self::default_connect_timeout(),
            allow_empty_client_id: Self::default_allow_empty_client_id(),
            maximum_inflight_messages: Self::default_maximum_inflight_messages(),
        }
    }
}
