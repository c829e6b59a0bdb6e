//! Socket plumbing: one type over plain TCP and the two TLS profiles.

use crate::config::{Endpoint, TlsProfile};
use crate::errors::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// The connection's byte stream.
pub enum BoltStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl BoltStream {
    /// Open a TCP connection, then layer TLS according to the profile.
    pub async fn connect(
        endpoint: &Endpoint,
        tls: TlsProfile,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let address = (endpoint.host.as_str(), endpoint.port);
        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Connection {
                endpoint: endpoint.to_string(),
                detail: format!("connect timed out after {connect_timeout:?}"),
            })?
            .map_err(|e| Error::Connection {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;
        tcp.set_nodelay(true).map_err(|e| Error::Connection {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;

        match tls {
            TlsProfile::None => Ok(BoltStream::Plain(tcp)),
            profile => {
                let config = match profile {
                    TlsProfile::Insecure => insecure_config(),
                    _ => verified_config(),
                };
                let connector = TlsConnector::from(config);
                let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|_| {
                    Error::Configuration(format!("`{}` is not a valid TLS name", endpoint.host))
                })?;
                let stream = tokio::time::timeout(
                    connect_timeout,
                    connector.connect(server_name, tcp),
                )
                .await
                .map_err(|_| Error::Connection {
                    endpoint: endpoint.to_string(),
                    detail: format!("TLS handshake timed out after {connect_timeout:?}"),
                })?
                .map_err(|e| Error::Connection {
                    endpoint: endpoint.to_string(),
                    detail: format!("TLS handshake failed: {e}"),
                })?;
                debug!(endpoint = %endpoint, "TLS established");
                Ok(BoltStream::Tls(Box::new(stream)))
            }
        }
    }
}

fn verified_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

fn insecure_config() -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth(),
    )
}

/// Verifier for the `+ssc`/`+s` profiles: accepts every certificate chain,
/// including self-signed ones. Signature checks are skipped as well; the
/// profile trades authenticity for encryption only.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

impl AsyncRead for BoltStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BoltStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            BoltStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BoltStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            BoltStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            BoltStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BoltStream::Plain(s) => Pin::new(s).poll_flush(cx),
            BoltStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BoltStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            BoltStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
