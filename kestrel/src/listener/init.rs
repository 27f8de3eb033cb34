// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Listener binding and transport handshakes.

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_rustls::rustls::{
    self,
    server::{ClientHello, ResolvesServerCert, ResolvesServerCertUsingSni},
    sign::CertifiedKey,
};
use tokio_rustls::TlsAcceptor;

use super::{Listener, Protocol, CHANNEL_CAPACITY};
use crate::commands::{
    AclToListenerCmd, AuthToListenerCmd, DispatcherToListenerCmd, ListenerToAclCmd,
    ListenerToAuthCmd, ListenerToDispatcherCmd,
};
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::socket::new_tcp_listener;
use crate::stream::Stream;
use crate::types::ListenerId;

/// SNI certificate resolver with an optional default certificate for
/// clients sending no server name.
#[derive(Debug)]
struct CertResolver {
    sni: ResolvesServerCertUsingSni,
    default: Option<Arc<CertifiedKey>>,
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        self.sni.resolve(client_hello).or_else(|| self.default.clone())
    }
}

impl Listener {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: ListenerId,
        protocol: Protocol,
        listener_config: config::Listener,
        // dispatcher module
        dispatcher_sender: Sender<ListenerToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToListenerCmd>,
        // auth module
        auth_sender: Sender<ListenerToAuthCmd>,
        auth_receiver: Receiver<AuthToListenerCmd>,
        // acl module
        acl_sender: Sender<ListenerToAclCmd>,
        acl_receiver: Receiver<AclToListenerCmd>,
    ) -> Self {
        let (session_sender, session_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            id,
            protocol,
            config: listener_config,
            current_session_id: 0,

            session_senders: HashMap::new(),
            session_infos: HashMap::new(),
            pending_wills: HashMap::new(),

            session_sender,
            session_receiver: Some(session_receiver),

            dispatcher_sender,
            dispatcher_receiver: Some(dispatcher_receiver),

            auth_sender,
            auth_receiver: Some(auth_receiver),

            acl_sender,
            acl_receiver: Some(acl_receiver),
        }
    }

    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to load cert file at {path:?}, got: {err:?}"),
                )
            })
    }

    fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to load key file at {path:?}, got: {err:?}"),
                )
            })?
            .ok_or_else(|| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("No private key found in {path:?}"),
                )
            })
    }

    fn load_certified_key(cert_file: &Path, key_file: &Path) -> Result<CertifiedKey, Error> {
        let certs = Self::load_certs(cert_file)?;
        let key = Self::load_key(key_file)?;
        let signing_key =
            rustls::crypto::aws_lc_rs::sign::any_supported_type(&key).map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Unsupported private key in {key_file:?}, got: {err:?}"),
                )
            })?;
        Ok(CertifiedKey::new(certs, signing_key))
    }

    /// Build the TLS server config, resolving certificates by SNI server
    /// name with a fallback to the listener's default certificate.
    fn get_cert_config(listener_config: &config::Listener) -> Result<rustls::ServerConfig, Error> {
        let mut sni = ResolvesServerCertUsingSni::new();
        for certificate in listener_config.certificates() {
            let ck =
                Self::load_certified_key(certificate.cert_file(), certificate.key_file())?;
            sni.add(certificate.server_name(), ck).map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!(
                        "Failed to register certificate for {:?}, got: {err:?}",
                        certificate.server_name()
                    ),
                )
            })?;
        }

        let default = match (listener_config.cert_file(), listener_config.key_file()) {
            (Some(cert_file), Some(key_file)) => {
                Some(Arc::new(Self::load_certified_key(cert_file, key_file)?))
            }
            _ => None,
        };

        if default.is_none() && listener_config.certificates().is_empty() {
            return Err(Error::new(
                ErrorKind::CertError,
                "cert_file and key_file are required",
            ));
        }

        Ok(rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(CertResolver { sni, default })))
    }

    /// Bind to the configured socket address.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound or certificates fail
    /// to load.
    #[allow(clippy::too_many_arguments)]
    pub async fn bind(
        id: ListenerId,
        listener_config: config::Listener,
        // dispatcher
        dispatcher_sender: Sender<ListenerToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToListenerCmd>,
        // auth
        auth_sender: Sender<ListenerToAuthCmd>,
        auth_receiver: Receiver<AuthToListenerCmd>,
        // acl
        acl_sender: Sender<ListenerToAclCmd>,
        acl_receiver: Receiver<AclToListenerCmd>,
    ) -> Result<Self, Error> {
        let address = listener_config.address();

        let new_listener = |protocol| {
            Ok(Self::new(
                id,
                protocol,
                listener_config.clone(),
                dispatcher_sender,
                dispatcher_receiver,
                auth_sender,
                auth_receiver,
                acl_sender,
                acl_receiver,
            ))
        };
        match listener_config.protocol() {
            config::Protocol::Mqtt => {
                log::info!("bind mqtt://{address}");
                let listener = new_tcp_listener(address).await?;
                new_listener(Protocol::Mqtt(listener))
            }
            config::Protocol::Mqtts => {
                log::info!("bind mqtts://{address}");
                let tls_config = Self::get_cert_config(&listener_config)?;
                let acceptor = TlsAcceptor::from(Arc::new(tls_config));
                let listener = new_tcp_listener(address).await?;
                new_listener(Protocol::Mqtts(listener, acceptor))
            }
            config::Protocol::Ws => {
                log::info!("bind ws://{address}");
                let listener = new_tcp_listener(address).await?;
                new_listener(Protocol::Ws(listener))
            }
            config::Protocol::Wss => {
                log::info!("bind wss://{address}");
                let tls_config = Self::get_cert_config(&listener_config)?;
                let acceptor = TlsAcceptor::from(Arc::new(tls_config));
                let listener = new_tcp_listener(address).await?;
                new_listener(Protocol::Wss(listener, acceptor))
            }
        }
    }

    /// Accept one connection and run the transport handshake, returning the
    /// framed stream and the server name learnt from TLS SNI or the
    /// WebSocket `Host` header.
    pub(super) async fn accept(&mut self) -> Result<(Stream, Option<String>), Error> {
        use tokio_tungstenite::tungstenite::handshake::server as ws_server;

        let listener_path = self.config.path();
        match &mut self.protocol {
            Protocol::Mqtt(listener) => {
                let (tcp_stream, _address) = listener.accept().await?;
                Ok((Stream::Mqtt(tcp_stream), None))
            }
            Protocol::Mqtts(listener, acceptor) => {
                let (tcp_stream, _address) = listener.accept().await?;
                let tls_stream = acceptor.accept(tcp_stream).await?;
                let server_name = tls_stream
                    .get_ref()
                    .1
                    .server_name()
                    .map(ToString::to_string);
                Ok((Stream::Mqtts(Box::new(tls_stream)), server_name))
            }
            Protocol::Ws(listener) => {
                let (tcp_stream, _address) = listener.accept().await?;
                let mut host = None;
                let check_header = |request: &ws_server::Request,
                                    response: ws_server::Response|
                 -> Result<ws_server::Response, ws_server::ErrorResponse> {
                    host = host_of(request);
                    check_ws_path(listener_path, request, response)
                };
                let ws_stream =
                    tokio_tungstenite::accept_hdr_async(tcp_stream, check_header).await?;
                Ok((Stream::Ws(Box::new(ws_stream)), host))
            }
            Protocol::Wss(listener, acceptor) => {
                let (tcp_stream, _address) = listener.accept().await?;
                let tls_stream = acceptor.accept(tcp_stream).await?;
                let sni_name = tls_stream
                    .get_ref()
                    .1
                    .server_name()
                    .map(ToString::to_string);
                let mut host = None;
                let check_header = |request: &ws_server::Request,
                                    response: ws_server::Response|
                 -> Result<ws_server::Response, ws_server::ErrorResponse> {
                    host = host_of(request);
                    check_ws_path(listener_path, request, response)
                };
                let wss_stream =
                    tokio_tungstenite::accept_hdr_async(tls_stream, check_header).await?;
                Ok((Stream::Wss(Box::new(wss_stream)), sni_name.or(host)))
            }
        }
    }
}

/// Server name from the `Host` header, with any port stripped.
fn host_of(
    request: &tokio_tungstenite::tungstenite::handshake::server::Request,
) -> Option<String> {
    request
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| host.split(':').next().unwrap_or(host).to_string())
        .filter(|host| !host.is_empty())
}

/// Refuse WebSocket upgrades on unexpected url paths.
fn check_ws_path(
    listener_path: Option<&str>,
    request: &tokio_tungstenite::tungstenite::handshake::server::Request,
    response: tokio_tungstenite::tungstenite::handshake::server::Response,
) -> Result<
    tokio_tungstenite::tungstenite::handshake::server::Response,
    tokio_tungstenite::tungstenite::handshake::server::ErrorResponse,
> {
    let path = request.uri().path();
    match listener_path {
        None => Ok(response),
        Some(expected) if expected == path => Ok(response),
        Some(_) => {
            let builder = http::Response::builder().status(http::StatusCode::NOT_FOUND);
            // Building a 404 with an empty body cannot fail.
            let resp = builder.body(None).expect("static response");
            Err(resp)
        }
    }
}
