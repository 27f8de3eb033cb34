// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::ServerName;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::{
    tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

use crate::connect_options::{ConnectOptions, ConnectType, TlsOptions};
use crate::error::{Error, ErrorKind};

/// Certificate verifier accepting any peer, for `verify_peer=false`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn tls_client_config(tls: &TlsOptions) -> Result<rustls::ClientConfig, Error> {
    if !tls.verify_peer {
        return Ok(rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth());
    }

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(ca_file) = &tls.root_ca_file {
        let mut reader = BufReader::new(File::open(ca_file)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to read CA file {ca_file:?}: {err:?}"),
                )
            })?;
            root_store.add(cert).map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Invalid CA certificate in {ca_file:?}: {err:?}"),
                )
            })?;
        }
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

async fn tls_connect(
    address: &str,
    domain: &str,
    tls: &TlsOptions,
) -> Result<TlsStream<TcpStream>, Error> {
    let config = tls_client_config(tls)?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(domain.to_string()).map_err(|err| {
        Error::from_string(
            ErrorKind::ParameterError,
            format!("Invalid server name {domain:?}: {err}"),
        )
    })?;
    let tcp_stream = TcpStream::connect(address).await?;
    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(Into::into)
}

/// Client side duplex stream over one of the supported transports.
#[derive(Debug)]
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

impl Stream {
    /// Connect the transport configured in `options`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection or handshake fails.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        match options.connect_type() {
            ConnectType::Mqtt(_) => {
                let tcp_stream = TcpStream::connect(options.address()).await?;
                Ok(Self::Mqtt(tcp_stream))
            }
            ConnectType::Mqtts(mqtts) => {
                let tls_stream = tls_connect(options.address(), &mqtts.domain, &mqtts.tls).await?;
                Ok(Self::Mqtts(Box::new(tls_stream)))
            }
            ConnectType::Ws(ws) => {
                let url = format!("ws://{}{}", options.address(), ws.path);
                let (ws_stream, _response) =
                    tokio_tungstenite::connect_async(url.as_str()).await?;
                Ok(Self::Ws(Box::new(ws_stream)))
            }
            ConnectType::Wss(wss) => {
                let url = format!("wss://{}{}", wss.domain, wss.path);
                let (ws_stream, _response) =
                    tokio_tungstenite::connect_async(url.as_str()).await?;
                Ok(Self::Ws(Box::new(ws_stream)))
            }
        }
    }

    /// Read from stream, appending to `buf`; zero means the peer closed
    /// the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying socket fails.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.read_buf(buf).await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.read_buf(buf).await?),
            Self::Ws(ws_stream) => {
                if let Some(msg) = ws_stream.next().await {
                    let msg = msg?;
                    let data = msg.into_data();
                    let data_len = data.len();
                    buf.extend(data);
                    Ok(data_len)
                } else {
                    Ok(0)
                }
            }
        }
    }

    /// Write a whole packet to the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying socket fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match self {
            Self::Mqtt(tcp_stream) => {
                tcp_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Self::Mqtts(tls_stream) => {
                tls_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Self::Ws(ws_stream) => {
                let msg = Message::binary(buf.to_vec());
                ws_stream.send(msg).await?;
                Ok(buf.len())
            }
        }
    }
}
